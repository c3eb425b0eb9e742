//! The `ld` proxy.
//!
//! Runs the real linker with the toolchain's sysroot, then turns a
//! dynamically linked executable into a wrapped executable that carries its
//! interpreter and every shared library the link resolved.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use kiln_pack::{PackWrapper, WrapOptions, WrappingService, RESOURCE_DIR_VAR};
use kiln_toolchain::{inspect, resolve_needed, LinkInvocation, ProxyConfig};
use tracing::{debug, info};

use super::run_status;

pub fn run(config: &ProxyConfig, args: &[String]) -> Result<i32> {
    let invocation = LinkInvocation::parse(args);
    let full = linker_args(config, &invocation, args);
    debug!(ld = %config.ld.display(), args = ?full, "link");
    let code = run_status(Command::new(&config.ld).args(&full))?;
    if code != 0 || invocation.not_executable {
        return Ok(code);
    }

    let Some(launcher) = &config.launcher else {
        debug!("no launcher for this target; leaving the output unwrapped");
        return Ok(0);
    };
    let cwd = std::env::current_dir().context("reading the working directory")?;
    let output = cwd.join(invocation.output_path());
    let mut wrapper = PackWrapper::new(launcher);
    if let Some(dir) = std::env::var_os(RESOURCE_DIR_VAR).filter(|d| !d.is_empty()) {
        wrapper = wrapper.with_resource_dir(PathBuf::from(dir));
    }
    wrap_output(config, &wrapper, &invocation, &cwd, &output)?;
    Ok(0)
}

/// `args` preceded by the flavor's linker arguments unless the caller
/// already chose a sysroot.
fn linker_args(config: &ProxyConfig, invocation: &LinkInvocation, args: &[String]) -> Vec<String> {
    let mut full = Vec::with_capacity(args.len() + 1);
    if !invocation.has_sysroot {
        full.extend(config.flavor.strategy().ld_args(&config.arg_context()));
    }
    full.extend(args.iter().cloned());
    full
}

fn wrap_output(
    config: &ProxyConfig,
    wrapper: &dyn WrappingService,
    invocation: &LinkInvocation,
    cwd: &Path,
    output: &Path,
) -> Result<()> {
    let info = inspect(output)?;
    if info.interpreter.is_none() || info.is_shared_object {
        debug!(output = %output.display(), "statically linked; not wrapping");
        return Ok(());
    }

    let resolution = resolve_needed(output, &invocation.search_dirs(cwd), &config.sysroot_lib_dirs())?;
    let name = output.file_name().context("link output has no file name")?;
    let scratch = tempfile::tempdir().context("creating scratch directory")?;
    let program = scratch.path().join(name);
    fs::copy(output, &program).with_context(|| format!("copying {}", output.display()))?;

    let options = WrapOptions {
        interpreter: resolution.interpreter,
        libraries: resolution.libraries,
        ..WrapOptions::default()
    };
    let manifest = wrapper.wrap(&program, &options, output)?;
    info!(
        output = %output.display(),
        libraries = manifest.library_paths.len(),
        unresolved = resolution.unresolved.len(),
        "wrapped link output"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_toolchain::Flavor;
    use kiln_triple::Triple;

    fn config(sysroot: Option<&str>) -> ProxyConfig {
        ProxyConfig {
            flavor: Flavor::Gcc,
            target: Triple::parse("aarch64-unknown-linux-gnu").unwrap(),
            cross: true,
            cc: PathBuf::from("/tc/bin/aarch64-unknown-linux-gnu-gcc"),
            cxx: PathBuf::from("/tc/bin/aarch64-unknown-linux-gnu-g++"),
            ld: PathBuf::from("/tc/bin/aarch64-unknown-linux-gnu-ld"),
            strip: None,
            sysroot: sysroot.map(PathBuf::from),
            libexec: PathBuf::from("/tc/kiln/libexec"),
            internal_dirs: Vec::new(),
            resource_dir: None,
            dynamic_linker: None,
            launcher: None,
            cc_cache: None,
        }
    }

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn sysroot_is_added_once() {
        let config = config(Some("/tc/aarch64-unknown-linux-gnu/sysroot"));
        let args = strings(&["-o", "hello", "hello.o"]);
        let full = linker_args(&config, &LinkInvocation::parse(&args), &args);
        assert_eq!(full[0], "--sysroot=/tc/aarch64-unknown-linux-gnu/sysroot");
        assert_eq!(&full[1..], &args[..]);

        let args = strings(&["--sysroot=/other", "-o", "hello", "hello.o"]);
        let full = linker_args(&config, &LinkInvocation::parse(&args), &args);
        assert_eq!(full, args);
    }

    #[test]
    fn no_sysroot_means_no_extra_arguments() {
        let config = config(None);
        let args = strings(&["-shared", "-o", "libx.so", "x.o"]);
        let full = linker_args(&config, &LinkInvocation::parse(&args), &args);
        assert_eq!(full, args);
    }
}
