//! Locating and identifying the toolchain an environment provides.
//!
//! Compilers are found on the environment's `PATH`. Their target triple is
//! determined by asking the compiler itself; only when it cannot be run is
//! the compiler binary's own header consulted.

use std::path::{Path, PathBuf};

use kiln_env::ResolvedEnv;
use kiln_graph::{CancelToken, ExecError, ExecRequest, Executor};
use kiln_triple::Triple;
use tracing::{debug, info};

use crate::binary;
use crate::descriptor::ToolchainDescriptor;
use crate::error::{Result, ToolchainError};
use crate::flavor::Flavor;

/// A compiler pair to look for, in preference order.
struct Candidate {
    cc: &'static str,
    cxx: &'static str,
    flavor: Option<Flavor>,
}

const GCC: Candidate = Candidate {
    cc: "gcc",
    cxx: "g++",
    flavor: Some(Flavor::Gcc),
};
const CLANG: Candidate = Candidate {
    cc: "clang",
    cxx: "clang++",
    flavor: Some(Flavor::Llvm),
};
const GENERIC: Candidate = Candidate {
    cc: "cc",
    cxx: "c++",
    flavor: None,
};

/// Runs probes through an executor so that introspection inside a build
/// step sees exactly that step's environment.
pub struct Introspector<'a> {
    executor: &'a dyn Executor,
    cancel: CancelToken,
}

impl<'a> Introspector<'a> {
    pub fn new(executor: &'a dyn Executor) -> Self {
        Self {
            executor,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Describe the toolchain `env` provides.
    ///
    /// `target`, when it differs from `host`, selects `<target>-` prefixed
    /// tools.
    pub fn toolchain_components(
        &self,
        env: &ResolvedEnv,
        host: Option<&Triple>,
        target: Option<&Triple>,
    ) -> Result<ToolchainDescriptor> {
        let search = env.search_path("PATH");
        let prefix = match (host, target) {
            (Some(h), Some(t)) if !h.same_platform(t) => t.tool_prefix(),
            (None, Some(t)) => t.tool_prefix(),
            _ => String::new(),
        };

        let (cc, cxx, flavor) = self.find_compiler(&search, &prefix, host, env)?;
        let detected_target = self.probe_target(&cc, flavor, env)?;
        let target = match target {
            Some(t) => t.clone(),
            None => detected_target.clone(),
        };
        let host = match host {
            Some(h) => h.clone(),
            None if prefix.is_empty() => detected_target,
            None => self.platform_of(&cc)?,
        };

        let root = toolchain_root(&cc);
        let ld = self.find_ld(&search, &prefix, &cc, flavor, env, &root)?;
        let strip = which(&search, &format!("{prefix}strip"));
        let fortran = which(&search, &format!("{prefix}gfortran"));

        let sysroot = self
            .probe_path(&cc, "-print-sysroot", env)
            .filter(|p| p.is_dir());
        let (internal_dirs, resource_dir) = match flavor {
            Flavor::Gcc => {
                let libgcc = self.probe_path(&cc, "-print-libgcc-file-name", env);
                let dirs = libgcc
                    .and_then(|p| p.parent().map(Path::to_path_buf))
                    .filter(|d| d.is_dir())
                    .into_iter()
                    .collect();
                (dirs, None)
            }
            Flavor::Llvm => (
                Vec::new(),
                self.probe_path(&cc, "-print-resource-dir", env)
                    .filter(|d| d.is_dir()),
            ),
        };

        let mut lib_dirs = self.library_dirs(&cc, env);
        if let Some(sysroot) = &sysroot {
            for sub in ["lib", "lib64", "usr/lib", "usr/lib64"] {
                lib_dirs.push(sysroot.join(sub));
            }
        }
        lib_dirs.push(root.join("lib"));
        lib_dirs.push(root.join(target.to_string()).join("lib"));
        let dynamic_linker = find_dynamic_linker(&target, &lib_dirs);

        let descriptor = ToolchainDescriptor {
            cc,
            cxx,
            fortran,
            ld,
            strip,
            dynamic_linker,
            root,
            sysroot,
            internal_dirs,
            resource_dir,
            flavor,
            host,
            target,
        };
        info!(
            cc = %descriptor.cc.display(),
            flavor = %descriptor.flavor,
            host = %descriptor.host,
            target = %descriptor.target,
            "introspected toolchain"
        );
        Ok(descriptor)
    }

    /// The triple the environment's compiler emits code for.
    pub fn get_target_triple(&self, env: &ResolvedEnv, host: Option<&Triple>) -> Result<Triple> {
        let search = env.search_path("PATH");
        let (cc, _, flavor) = self.find_compiler(&search, "", host, env)?;
        self.probe_target(&cc, flavor, env)
    }

    fn find_compiler(
        &self,
        search: &[PathBuf],
        prefix: &str,
        host: Option<&Triple>,
        env: &ResolvedEnv,
    ) -> Result<(PathBuf, PathBuf, Flavor)> {
        let order: [&Candidate; 3] = if host.is_some_and(Triple::is_darwin) {
            [&CLANG, &GCC, &GENERIC]
        } else {
            [&GCC, &CLANG, &GENERIC]
        };

        for candidate in order {
            let Some(cc) = which(search, &format!("{prefix}{}", candidate.cc)) else {
                continue;
            };
            let cxx_name = format!("{prefix}{}", candidate.cxx);
            let Some(cxx) = which(search, &cxx_name) else {
                return Err(ToolchainError::IncompleteToolchain { cc, cxx: cxx_name });
            };
            let flavor = match candidate.flavor {
                Some(flavor) => flavor,
                None => self.detect_flavor(&cc, env),
            };
            debug!(cc = %cc.display(), cxx = %cxx.display(), %flavor, "found compiler");
            return Ok((cc, cxx, flavor));
        }

        Err(ToolchainError::NoToolchain {
            searched: std::env::join_paths(search)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        })
    }

    fn detect_flavor(&self, cc: &Path, env: &ResolvedEnv) -> Flavor {
        match self.run(cc, &["--version"], env) {
            Ok(Some(text)) => Flavor::from_version_output(&text),
            _ => Flavor::Gcc,
        }
    }

    fn probe_target(&self, cc: &Path, flavor: Flavor, env: &ResolvedEnv) -> Result<Triple> {
        let flag = flavor.target_triple_flag();
        match self.run(cc, &[flag], env) {
            Ok(Some(text)) => {
                let triple = Triple::parse(text.trim())?;
                debug!(cc = %cc.display(), %triple, "compiler reports target");
                Ok(triple)
            }
            Ok(None) => Err(ToolchainError::Probe {
                tool: cc.to_path_buf(),
                flag: flag.to_string(),
                message: "compiler exited unsuccessfully".to_string(),
            }),
            Err(ExecError::Cancelled) => Err(ExecError::Cancelled.into()),
            Err(err) => {
                debug!(cc = %cc.display(), error = %err, "cannot run compiler, reading its header");
                self.platform_of(cc)
            }
        }
    }

    /// The platform a binary runs on, from its executable header.
    fn platform_of(&self, path: &Path) -> Result<Triple> {
        let real = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let info = binary::inspect(&real)?;
        info.platform().ok_or_else(|| ToolchainError::BinaryFormat {
            path: real,
            message: "unrecognized architecture".to_string(),
        })
    }

    fn find_ld(
        &self,
        search: &[PathBuf],
        prefix: &str,
        cc: &Path,
        flavor: Flavor,
        env: &ResolvedEnv,
        root: &Path,
    ) -> Result<PathBuf> {
        if flavor == Flavor::Gcc {
            if let Some(ld) = self.probe_path(cc, "-print-prog-name=ld", env) {
                if ld.is_absolute() && ld.is_file() {
                    return Ok(ld);
                }
            }
        }
        let mut names = vec![format!("{prefix}ld")];
        if flavor == Flavor::Llvm {
            names.push("ld.lld".to_string());
        }
        names
            .iter()
            .find_map(|name| which(search, name))
            .ok_or_else(|| ToolchainError::MissingTool {
                root: root.to_path_buf(),
                tool: format!("{prefix}ld"),
            })
    }

    /// Library directories the compiler searches, from `-print-search-dirs`.
    fn library_dirs(&self, cc: &Path, env: &ResolvedEnv) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Ok(Some(text)) = self.run(cc, &["-print-search-dirs"], env) {
            for line in text.lines() {
                if let Some(list) = line.strip_prefix("libraries: ") {
                    let list = list.trim_start_matches('=');
                    dirs.extend(std::env::split_paths(list).filter(|p| !p.as_os_str().is_empty()));
                }
            }
        }
        dirs.extend(env.search_path("LIBRARY_PATH"));
        dirs
    }

    /// Probe a flag that prints a path; `None` when it fails or prints a
    /// bare name.
    fn probe_path(&self, cc: &Path, flag: &str, env: &ResolvedEnv) -> Option<PathBuf> {
        let text = self.run(cc, &[flag], env).ok().flatten()?;
        let text = text.trim();
        (!text.is_empty() && Path::new(text).is_absolute()).then(|| PathBuf::from(text))
    }

    /// Run `cc args`; `Ok(None)` on a non-zero exit.
    fn run(&self, cc: &Path, args: &[&str], env: &ResolvedEnv) -> std::result::Result<Option<String>, ExecError> {
        let request = ExecRequest::new(cc).args(args.iter().copied()).env(env.clone());
        let output = self.executor.run(&request, &self.cancel)?;
        Ok(output.success().then(|| output.stdout_text()))
    }
}

/// The installation prefix of a compiler: the parent of its `bin` directory.
pub fn toolchain_root(cc: &Path) -> PathBuf {
    let real = cc.canonicalize().unwrap_or_else(|_| cc.to_path_buf());
    real.parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or(real)
}

/// Locate the target's dynamic loader by name in `dirs`.
pub fn find_dynamic_linker(target: &Triple, dirs: &[PathBuf]) -> Option<PathBuf> {
    let name = target.dynamic_linker_name().ok()?;
    let found = dirs.iter().map(|d| d.join(&name)).find(|p| p.exists());
    if found.is_none() {
        debug!(%target, name, "dynamic linker not found in library directories");
    }
    found
}

/// Find an executable by name in `search`.
pub fn which(search: &[PathBuf], name: &str) -> Option<PathBuf> {
    search
        .iter()
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_graph::ExecOutput;
    use std::collections::HashMap;
    use std::fs;

    /// Answers probes from a table keyed by `"<file name> <flag>"`.
    #[derive(Default)]
    struct FakeCompilers {
        answers: HashMap<String, String>,
        spawn_fails: bool,
    }

    impl FakeCompilers {
        fn answer(mut self, key: &str, text: &str) -> Self {
            self.answers.insert(key.to_string(), text.to_string());
            self
        }
    }

    impl Executor for FakeCompilers {
        fn run(&self, req: &ExecRequest, _: &CancelToken) -> std::result::Result<ExecOutput, ExecError> {
            if self.spawn_fails {
                return Err(ExecError::Spawn {
                    program: req.program.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "exec format error"),
                });
            }
            let name = req.program.file_name().unwrap().to_string_lossy();
            let key = format!("{} {}", name, req.args.join(" "));
            Ok(match self.answers.get(&key) {
                Some(text) => ExecOutput {
                    exit_code: Some(0),
                    stdout: text.clone().into_bytes(),
                    stderr: Vec::new(),
                },
                None => ExecOutput {
                    exit_code: Some(1),
                    ..Default::default()
                },
            })
        }
    }

    fn tool(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    fn env_with_path(dir: &Path) -> ResolvedEnv {
        let mut env = ResolvedEnv::new();
        env.insert("PATH", dir.to_string_lossy());
        env
    }

    #[test]
    fn native_gcc_toolchain() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("bin");
        let lib = root.path().join("lib");
        fs::create_dir_all(&bin).unwrap();
        fs::create_dir_all(&lib).unwrap();
        tool(&bin, "gcc");
        tool(&bin, "g++");
        tool(&bin, "ld");
        tool(&bin, "strip");
        fs::write(lib.join("ld-linux-x86-64.so.2"), "").unwrap();

        let exec = FakeCompilers::default()
            .answer("gcc -dumpmachine", "x86_64-pc-linux-gnu\n")
            .answer("gcc -print-prog-name=ld", "ld\n")
            .answer("gcc -print-search-dirs", &format!("install: /x\nlibraries: ={}\n", lib.display()));
        let desc = Introspector::new(&exec)
            .toolchain_components(&env_with_path(&bin), None, None)
            .unwrap();

        assert_eq!(desc.flavor, Flavor::Gcc);
        assert_eq!(desc.host.to_string(), "x86_64-pc-linux-gnu");
        assert_eq!(desc.host, desc.target);
        assert!(desc.ld.ends_with("bin/ld"));
        assert!(desc.strip.is_some());
        assert_eq!(desc.dynamic_linker, Some(lib.join("ld-linux-x86-64.so.2")));
        assert_eq!(desc.root, root.path().canonicalize().unwrap());
    }

    #[test]
    fn missing_cxx_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        tool(dir.path(), "gcc");
        let exec = FakeCompilers::default();
        let err = Introspector::new(&exec)
            .toolchain_components(&env_with_path(dir.path()), None, None)
            .unwrap_err();
        assert!(matches!(err, ToolchainError::IncompleteToolchain { ref cxx, .. } if cxx == "g++"));
    }

    #[test]
    fn empty_path_is_no_toolchain() {
        let dir = tempfile::tempdir().unwrap();
        let exec = FakeCompilers::default();
        let err = Introspector::new(&exec)
            .get_target_triple(&env_with_path(dir.path()), None)
            .unwrap_err();
        assert!(matches!(err, ToolchainError::NoToolchain { .. }));
    }

    #[test]
    fn darwin_prefers_clang() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["gcc", "g++", "clang", "clang++"] {
            tool(dir.path(), name);
        }
        let exec = FakeCompilers::default()
            .answer("clang -print-target-triple", "arm64-apple-darwin23.4.0\n")
            .answer("gcc -dumpmachine", "x86_64-pc-linux-gnu\n");
        let host = Triple::parse("aarch64-apple-darwin").unwrap();
        let triple = Introspector::new(&exec)
            .get_target_triple(&env_with_path(dir.path()), Some(&host))
            .unwrap();
        assert!(triple.is_darwin());

        let linux = Triple::parse("x86_64-unknown-linux-gnu").unwrap();
        let triple = Introspector::new(&exec)
            .get_target_triple(&env_with_path(dir.path()), Some(&linux))
            .unwrap();
        assert!(triple.is_linux());
    }

    #[test]
    fn cross_prefix_selects_target_tools() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["gcc", "g++", "aarch64-unknown-linux-musl-gcc", "aarch64-unknown-linux-musl-g++", "aarch64-unknown-linux-musl-ld"] {
            tool(dir.path(), name);
        }
        let exec = FakeCompilers::default()
            .answer("aarch64-unknown-linux-musl-gcc -dumpmachine", "aarch64-unknown-linux-musl\n");
        let host = Triple::parse("x86_64-unknown-linux-gnu").unwrap();
        let target = Triple::parse("aarch64-unknown-linux-musl").unwrap();
        let desc = Introspector::new(&exec)
            .toolchain_components(&env_with_path(dir.path()), Some(&host), Some(&target))
            .unwrap();
        assert!(desc.cc.ends_with("aarch64-unknown-linux-musl-gcc"));
        assert!(desc.ld.ends_with("aarch64-unknown-linux-musl-ld"));
        assert!(desc.is_cross());
        assert_eq!(desc.host, host);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unrunnable_compiler_falls_back_to_header() {
        let dir = tempfile::tempdir().unwrap();
        // Any ELF binary for this machine stands in for the compiler.
        let me = std::env::current_exe().unwrap();
        fs::copy(&me, dir.path().join("gcc")).unwrap();
        tool(dir.path(), "g++");
        let exec = FakeCompilers {
            spawn_fails: true,
            ..Default::default()
        };
        let triple = Introspector::new(&exec)
            .get_target_triple(&env_with_path(dir.path()), None)
            .unwrap();
        assert_eq!(triple.architecture.as_str(), std::env::consts::ARCH);
    }
}
