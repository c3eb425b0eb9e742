//! Graph construction shared by the sysroot, binutils and GCC builders.

use std::collections::BTreeMap;
use std::path::PathBuf;

use indoc::indoc;
use kiln_env::{compose_over, EnvLayer, ResolvedEnv};
use kiln_graph::{BuildGraph, Node, NodeId, ProcessSpec};
use kiln_toolchain::{ProxyParams, PROXY_TRANSFORM};
use kiln_triple::Triple;
use tracing::debug;

use crate::config::{KilnConfig, Source};
use crate::error::{BootstrapError, Result};
use crate::tools::{ToolchainRef, Toolset};

/// Shell prologue of every build script.
const PRELUDE: &str = indoc! {r#"
    umask 022
    unpack() {
      mkdir -p "$2"
      tar -xf "$1"/* -C "$2" --strip-components=1
    }
"#};

/// Binaries installed into proxied toolchains.
#[derive(Debug, Clone, Default)]
pub struct ProxyBinaries {
    /// The `kiln-proxy` executable for the build machine.
    pub proxy: PathBuf,
    /// Launchers prepended to wrapped outputs of cross toolchains, by target.
    pub launchers: BTreeMap<Triple, PathBuf>,
}

impl ProxyBinaries {
    pub fn new(proxy: impl Into<PathBuf>) -> Self {
        Self {
            proxy: proxy.into(),
            launchers: BTreeMap::new(),
        }
    }

    pub fn with_launcher(mut self, target: Triple, launcher: impl Into<PathBuf>) -> Self {
        self.launchers.insert(target, launcher.into());
        self
    }
}

/// Accumulates the build graph of one or more toolchains.
///
/// Steps are composed from the base environment, their toolchains' layers,
/// their own layer and finally the caller's override layer.
#[derive(Debug, Clone)]
pub struct Planner {
    pub(crate) graph: BuildGraph,
    pub(crate) config: KilnConfig,
    pub(crate) build: Triple,
    base: ResolvedEnv,
    overrides: EnvLayer,
    pub(crate) bootstrap: ToolchainRef,
    proxy: Option<ProxyBinaries>,
}

impl Planner {
    /// Plan builds on the `build` machine, whose ambient `PATH` in `base`
    /// provides the bootstrap compiler and the usual build utilities.
    pub fn new(config: KilnConfig, build: Triple, base: ResolvedEnv) -> Self {
        let build = build.canonicalize();
        Self {
            graph: BuildGraph::new(),
            config,
            bootstrap: ToolchainRef::ambient(build.clone()),
            build,
            base,
            overrides: EnvLayer::new(),
            proxy: None,
        }
    }

    /// Highest-precedence environment layer applied to every step.
    pub fn with_overrides(mut self, overrides: EnvLayer) -> Self {
        self.overrides = overrides;
        self
    }

    /// Use a toolchain artifact instead of the ambient compiler to bootstrap.
    pub fn with_bootstrap(mut self, bootstrap: ToolchainRef) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyBinaries) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn graph(&self) -> &BuildGraph {
        &self.graph
    }

    pub fn into_graph(self) -> BuildGraph {
        self.graph
    }

    pub fn config(&self) -> &KilnConfig {
        &self.config
    }

    pub fn build_triple(&self) -> &Triple {
        &self.build
    }

    pub fn bootstrap(&self) -> &ToolchainRef {
        &self.bootstrap
    }

    /// Fetch node of a source archive.
    pub(crate) fn fetch(&mut self, source: &Source) -> NodeId {
        self.graph.add(Node::Fetch {
            url: source.url.clone(),
            sha256: source.sha256.clone(),
        })
    }

    /// Add a script step run with `tools`.
    pub(crate) fn process(
        &mut self,
        name: String,
        script: &str,
        tools: &Toolset,
        inputs: &[(&str, NodeId)],
        step: EnvLayer,
    ) -> NodeId {
        let jobs = EnvLayer::new().set("MAKEFLAGS", format!("-j{}", self.config.build.jobs));
        let env = compose_over(&self.base, &[jobs, tools.layer(), step, self.overrides.clone()]);

        let mut spec = ProcessSpec::new(name, format!("{PRELUDE}{script}")).env(env);
        for (key, node) in tools.inputs() {
            spec = spec.input(key, node);
        }
        for (key, node) in inputs {
            spec = spec.input(*key, *node);
        }
        debug!(step = %spec.name, inputs = spec.inputs.len(), "planned step");
        self.graph.add(Node::Process(spec))
    }

    pub(crate) fn transform(&mut self, name: &str, input: NodeId, params: serde_json::Value) -> NodeId {
        self.graph.add(Node::Transform {
            name: name.to_string(),
            input,
            params,
        })
    }

    /// Install proxies into a toolchain artifact.
    pub fn proxy(&mut self, toolchain: &ToolchainRef) -> Result<ToolchainRef> {
        let Some(node) = toolchain.node else {
            return Err(BootstrapError::Config {
                detail: "the ambient toolchain cannot be proxied".into(),
            });
        };
        let binaries = self.proxy.as_ref().ok_or_else(|| BootstrapError::MissingProxy {
            target: toolchain.target.clone(),
        })?;
        let launcher = binaries.launchers.get(&toolchain.target);
        let params = ProxyParams::new(
            toolchain.host.clone(),
            toolchain.target.clone(),
            &binaries.proxy,
            launcher.map(PathBuf::as_path),
        )?;
        let params = serde_json::to_value(params).map_err(|e| BootstrapError::Config {
            detail: format!("encoding proxy parameters: {e}"),
        })?;
        let proxied = self.transform(PROXY_TRANSFORM, node, params);
        Ok(ToolchainRef {
            node: Some(proxied),
            proxied: true,
            ..toolchain.clone()
        })
    }

    /// Process steps of the graph whose name starts with `prefix`.
    pub fn steps<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a ProcessSpec> + 'a {
        self.graph.iter().filter_map(move |(_, node)| match node {
            Node::Process(spec) if spec.name.starts_with(prefix) => Some(spec),
            _ => None,
        })
    }
}
