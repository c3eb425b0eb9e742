//! Entry points for package recipes.
//!
//! Each function plans into a [`Planner`] and realizes the result with a
//! [`Runner`]. Planning is pure; realization is where steps run.

use std::path::{Path, PathBuf};

use kiln_env::{EnvLayer, ResolvedEnv};
use kiln_graph::{Executor, Runner};
use kiln_toolchain::{Introspector, ToolchainDescriptor};
use kiln_triple::Triple;
use tracing::info;

use crate::error::Result;
use crate::planner::Planner;
use crate::tools::ToolchainRef;

/// Placeholder the toolchain layer is bound under before realization.
const TOOLCHAIN_KEY: &str = "toolchain";

/// A realized, proxied toolchain.
#[derive(Debug, Clone)]
pub struct BuiltToolchain {
    /// Artifact directory of the toolchain.
    pub root: PathBuf,
    /// The descriptor the proxy transform recorded.
    pub descriptor: ToolchainDescriptor,
    /// `PATH` and tool variables pointing into `root`.
    pub env: EnvLayer,
}

/// Build the sysroot for `triple` and return its directory.
pub fn build_sysroot(planner: &mut Planner, runner: &Runner<'_>, triple: &Triple) -> Result<PathBuf> {
    let stage = planner.bootstrap_sysroot(triple)?;
    let path = runner.realize(planner.graph(), &stage.sysroot.node)?;
    info!(target = %stage.sysroot.target, path = %path.display(), "sysroot ready");
    Ok(path)
}

/// Build a toolchain running on `host` for `target` (default `host`).
pub fn build_toolchain(
    planner: &mut Planner,
    runner: &Runner<'_>,
    host: &Triple,
    target: Option<&Triple>,
) -> Result<BuiltToolchain> {
    let toolchain = planner.toolchain(host, target)?;
    let node = toolchain.node.ok_or_else(|| crate::error::BootstrapError::Config {
        detail: "the planned toolchain has no artifact".into(),
    })?;
    let root = runner.realize(planner.graph(), &node)?;
    let descriptor = ToolchainDescriptor::load(&root)?;
    let env = bind_layer(&toolchain, &root);
    info!(
        host = %descriptor.host,
        target = %descriptor.target,
        root = %root.display(),
        "toolchain ready"
    );
    Ok(BuiltToolchain { root, descriptor, env })
}

/// Describe the toolchain `env` provides.
pub fn introspect(
    executor: &dyn Executor,
    env: &ResolvedEnv,
    host: Option<&Triple>,
    target: Option<&Triple>,
) -> Result<ToolchainDescriptor> {
    Ok(Introspector::new(executor).toolchain_components(env, host, target)?)
}

/// The environment layer of `toolchain` with its artifact at `root`.
fn bind_layer(toolchain: &ToolchainRef, root: &Path) -> EnvLayer {
    let placeholder = format!("%{{{TOOLCHAIN_KEY}}}");
    let root = root.display().to_string();
    toolchain
        .env_layer(TOOLCHAIN_KEY)
        .map_values(|value| value.replace(&placeholder, &root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_env::compose_over;
    use kiln_graph::ContentHash;

    #[test]
    fn bound_layer_points_into_the_artifact() {
        let host = Triple::parse("x86_64-unknown-linux-gnu").unwrap();
        let target = Triple::parse("aarch64-unknown-linux-gnu").unwrap();
        let mut tc = ToolchainRef::artifact(ContentHash::of_bytes(b"tc"), host, target);
        tc.proxied = true;

        let layer = bind_layer(&tc, Path::new("/store/abc"));
        let mut ambient = ResolvedEnv::new();
        ambient.insert("PATH", "/usr/bin");
        let env = compose_over(&ambient, &[layer]);
        assert_eq!(env.get("PATH"), Some("/store/abc/kiln/bin:/store/abc/bin:/usr/bin"));
        assert_eq!(env.get("CC"), Some("aarch64-unknown-linux-gnu-cc"));
        assert_eq!(env.get("STRIP"), Some("aarch64-unknown-linux-gnu-strip"));
    }
}
