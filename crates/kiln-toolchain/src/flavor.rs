//! GCC- and LLVM-flavored argument strategies.
//!
//! Both flavors share one proxy; each supplies the extra arguments its
//! driver needs so that compiles and links see the toolchain's sysroot and
//! route linking through the proxied `ld`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Which compiler driver family a toolchain uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Flavor {
    Gcc,
    Llvm,
}

impl Flavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flavor::Gcc => "gcc",
            Flavor::Llvm => "llvm",
        }
    }

    /// The argument strategy for this flavor.
    pub fn strategy(&self) -> &'static dyn ArgStrategy {
        match self {
            Flavor::Gcc => &GccArgs,
            Flavor::Llvm => &LlvmArgs,
        }
    }

    /// Flag that prints the compiler's target triple.
    pub fn target_triple_flag(&self) -> &'static str {
        match self {
            Flavor::Gcc => "-dumpmachine",
            Flavor::Llvm => "-print-target-triple",
        }
    }

    /// Guess the flavor from `--version` output.
    pub fn from_version_output(text: &str) -> Self {
        if text.contains("clang") || text.contains("LLVM") {
            Flavor::Llvm
        } else {
            Flavor::Gcc
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Absolute locations the strategies draw on.
#[derive(Debug, Clone, Default)]
pub struct ArgContext {
    pub sysroot: Option<PathBuf>,
    /// Directory holding the proxied `ld`.
    pub libexec: PathBuf,
    /// Compiler-internal library directories (`crtbegin.o`, `libgcc.a`).
    pub internal_dirs: Vec<PathBuf>,
    /// Clang resource directory.
    pub resource_dir: Option<PathBuf>,
    /// Target triple string, passed to clang when cross compiling.
    pub cross_target: Option<String>,
}

/// Per-flavor argument construction.
pub trait ArgStrategy: Send + Sync {
    /// Arguments prepended to every `cc` invocation.
    fn cc_args(&self, ctx: &ArgContext) -> Vec<String>;

    /// Arguments prepended to every `c++` invocation.
    fn cxx_args(&self, ctx: &ArgContext) -> Vec<String> {
        self.cc_args(ctx)
    }

    /// Arguments the `ld` proxy adds to the real linker.
    fn ld_args(&self, ctx: &ArgContext) -> Vec<String> {
        sysroot_arg(ctx).into_iter().collect()
    }
}

fn sysroot_arg(ctx: &ArgContext) -> Option<String> {
    ctx.sysroot
        .as_deref()
        .map(|s| format!("--sysroot={}", s.display()))
}

fn b_dir(dir: &Path) -> String {
    format!("-B{}/", dir.display())
}

#[derive(Debug)]
pub struct GccArgs;

impl ArgStrategy for GccArgs {
    fn cc_args(&self, ctx: &ArgContext) -> Vec<String> {
        let mut args: Vec<String> = sysroot_arg(ctx).into_iter().collect();
        // libexec first so `collect2` finds the proxied ld before the real one.
        args.push(b_dir(&ctx.libexec));
        args.extend(ctx.internal_dirs.iter().map(|d| b_dir(d)));
        args
    }
}

#[derive(Debug)]
pub struct LlvmArgs;

impl ArgStrategy for LlvmArgs {
    fn cc_args(&self, ctx: &ArgContext) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        if let Some(target) = &ctx.cross_target {
            args.push(format!("--target={target}"));
        }
        args.extend(sysroot_arg(ctx));
        args.push(format!("--ld-path={}", ctx.libexec.join("ld").display()));
        if let Some(dir) = &ctx.resource_dir {
            args.push(format!("-resource-dir={}", dir.display()));
        }
        args.extend(ctx.internal_dirs.iter().map(|d| b_dir(d)));
        args.push("-Wno-unused-command-line-argument".to_string());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ArgContext {
        ArgContext {
            sysroot: Some("/tc/sysroot".into()),
            libexec: "/tc/kiln/libexec".into(),
            internal_dirs: vec!["/tc/lib/gcc/x86_64-unknown-linux-gnu/14.2.0".into()],
            resource_dir: Some("/tc/lib/clang/18".into()),
            cross_target: None,
        }
    }

    #[test]
    fn gcc_routes_through_libexec() {
        let args = Flavor::Gcc.strategy().cc_args(&ctx());
        assert_eq!(args[0], "--sysroot=/tc/sysroot");
        assert_eq!(args[1], "-B/tc/kiln/libexec/");
        assert!(args[2].starts_with("-B/tc/lib/gcc/"));
        assert_eq!(Flavor::Gcc.strategy().ld_args(&ctx()), ["--sysroot=/tc/sysroot"]);
    }

    #[test]
    fn llvm_uses_ld_path_and_resource_dir() {
        let mut c = ctx();
        c.cross_target = Some("aarch64-unknown-linux-musl".into());
        let args = Flavor::Llvm.strategy().cxx_args(&c);
        assert_eq!(args[0], "--target=aarch64-unknown-linux-musl");
        assert!(args.contains(&"--ld-path=/tc/kiln/libexec/ld".to_string()));
        assert!(args.contains(&"-resource-dir=/tc/lib/clang/18".to_string()));
        assert!(!args.iter().any(|a| a == "-B/tc/kiln/libexec/"));
    }

    #[test]
    fn flavor_detection() {
        assert_eq!(
            Flavor::from_version_output("Apple clang version 15.0.0 (clang-1500.3.9.4)"),
            Flavor::Llvm
        );
        assert_eq!(
            Flavor::from_version_output("gcc (GCC) 14.2.0\nCopyright (C) 2024"),
            Flavor::Gcc
        );
        assert_eq!(serde_json::to_string(&Flavor::Llvm).unwrap(), "\"llvm\"");
    }
}
