//! Shared fixtures: a proxied copy of the host toolchain in a temp dir.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use kiln_env::ResolvedEnv;
use kiln_graph::LocalExecutor;
use kiln_toolchain::{install_proxies, Introspector, ProxyConfig, ToolchainDescriptor};
use tempfile::TempDir;

pub const PROXY: &str = env!("CARGO_BIN_EXE_kiln-proxy");

pub const HELLO_C: &str = r#"#include <stdio.h>
int main(int argc, char **argv) {
    (void)argv;
    printf("hello from kiln %d\n", argc);
    return 0;
}
"#;

/// The host compilers with kiln proxies installed in front of them.
pub struct ProxiedHost {
    pub dir: TempDir,
    pub descriptor: ToolchainDescriptor,
    pub config: ProxyConfig,
}

impl ProxiedHost {
    /// `None` when the machine has no usable C and C++ compiler pair.
    pub fn new() -> Option<Self> {
        let executor = LocalExecutor::new();
        let found = Introspector::new(&executor).toolchain_components(&ResolvedEnv::from_process(), None, None);
        let mut descriptor = match found {
            Ok(d) => d,
            Err(err) => {
                eprintln!("skipping: no host toolchain ({err})");
                return None;
            }
        };
        let dir = tempfile::tempdir().unwrap();
        descriptor.root = dir.path().join("toolchain");
        fs::create_dir_all(&descriptor.root).unwrap();
        let config = install_proxies(&descriptor, Path::new(PROXY), None).unwrap();
        Some(Self {
            dir,
            descriptor,
            config,
        })
    }

    pub fn tool(&self, name: &str) -> PathBuf {
        self.descriptor.root.join("kiln/bin").join(name)
    }

    /// A fresh work directory with `hello.c`.
    pub fn workdir(&self, name: &str) -> PathBuf {
        let work = self.dir.path().join(name);
        fs::create_dir_all(&work).unwrap();
        fs::write(work.join("hello.c"), HELLO_C).unwrap();
        work
    }

    pub fn run(&self, tool: &str, cwd: &Path, args: &[&str]) -> Output {
        Command::new(self.tool(tool))
            .args(args)
            .current_dir(cwd)
            .output()
            .unwrap()
    }
}

pub fn assert_success(out: &Output, what: &str) {
    assert!(
        out.status.success(),
        "{what} failed\nstdout: {}\nstderr: {}",
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
}

/// Copy a directory tree, following no symlinks.
pub fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let dest = to.join(entry.file_name());
        let ty = entry.file_type().unwrap();
        if ty.is_dir() {
            copy_dir(&entry.path(), &dest);
        } else if ty.is_file() {
            fs::copy(entry.path(), &dest).unwrap();
        }
    }
}
