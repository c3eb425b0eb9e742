//! `kiln-proxy inspect`, `unwrap` and `introspect`.

use std::path::Path;

use anyhow::{Context, Result};
use kiln_env::ResolvedEnv;
use kiln_graph::LocalExecutor;
use kiln_pack::{read_manifest, PackWrapper, WrappingService};
use kiln_toolchain::Introspector;
use kiln_triple::Triple;

/// Print the manifest of `path` as JSON.
pub fn run(path: &Path) -> Result<()> {
    let manifest = read_manifest(path)?
        .with_context(|| format!("{} is not a wrapped executable", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}

/// Copy the program `path` wraps to `output`.
pub fn unwrap(path: &Path, output: &Path) -> Result<()> {
    let exe = std::env::current_exe().context("locating the running executable")?;
    let manifest = PackWrapper::new(exe).unwrap(path, output)?;
    println!("{} -> {}", manifest.program, output.display());
    Ok(())
}

/// Describe the compilers on `PATH`.
pub fn introspect(host: Option<&str>, target: Option<&str>) -> Result<()> {
    let host = host.map(Triple::parse).transpose()?;
    let target = target.map(Triple::parse).transpose()?;
    let executor = LocalExecutor::new();
    let descriptor = Introspector::new(&executor).toolchain_components(
        &ResolvedEnv::from_process(),
        host.as_ref(),
        target.as_ref(),
    )?;
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}
