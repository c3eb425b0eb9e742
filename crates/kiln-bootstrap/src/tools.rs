//! Toolchains as inputs of build steps.
//!
//! A [`ToolchainRef`] names a toolchain artifact (or the ambient bootstrap
//! compiler) and knows the environment it contributes. A [`Toolset`]
//! assigns toolchains to the three roles of an autoconf build: the machine
//! the build runs on, the machine the result runs on, and the machine a
//! compiler being built will emit code for.

use kiln_env::EnvLayer;
use kiln_graph::NodeId;
use kiln_pack::{EXTRA_DIRS_VAR, RESOURCE_DIR_NAME, RESOURCE_DIR_VAR};
use kiln_triple::Triple;
use serde::{Deserialize, Serialize};

/// A compiler toolchain usable by build steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainRef {
    /// Artifact holding the toolchain; `None` for the toolchain the ambient
    /// environment already provides on `PATH`.
    pub node: Option<NodeId>,
    /// Platform the tools run on.
    pub host: Triple,
    /// Platform the tools emit code for.
    pub target: Triple,
    /// Whether kiln proxies were installed under `kiln/bin`.
    pub proxied: bool,
}

/// Installed name of a tool running on `host` for `target`.
pub fn tool_name(host: &Triple, target: &Triple, name: &str) -> String {
    if host == target {
        name.to_string()
    } else {
        format!("{}{name}", target.tool_prefix())
    }
}

/// Variables naming the individual tools.
const TOOL_VARS: [(&str, &str); 7] = [
    ("CC", "cc"),
    ("CXX", "c++"),
    ("AR", "ar"),
    ("LD", "ld"),
    ("NM", "nm"),
    ("RANLIB", "ranlib"),
    ("STRIP", "strip"),
];

impl ToolchainRef {
    /// The bootstrap compiler found on the ambient `PATH`.
    pub fn ambient(build: Triple) -> Self {
        Self {
            node: None,
            host: build.clone(),
            target: build,
            proxied: false,
        }
    }

    /// A toolchain built into an artifact.
    pub fn artifact(node: NodeId, host: Triple, target: Triple) -> Self {
        Self {
            node: Some(node),
            host,
            target,
            proxied: false,
        }
    }

    /// Prefix of the tool names: `<target>-` for cross tools, empty otherwise.
    pub fn prefix(&self) -> String {
        tool_name(&self.host, &self.target, "")
    }

    /// Name of one tool, e.g. `aarch64-unknown-linux-gnu-gcc`.
    pub fn tool(&self, name: &str) -> String {
        tool_name(&self.host, &self.target, name)
    }

    /// `PATH` entries for a toolchain whose artifact is bound to `%{key}`.
    pub fn path_layer(&self, key: &str) -> EnvLayer {
        let mut layer = EnvLayer::new();
        if self.node.is_none() {
            return layer;
        }
        layer = layer.prepend_path("PATH", format!("%{{{key}}}/bin"));
        if self.proxied {
            layer = layer.prepend_path("PATH", format!("%{{{key}}}/kiln/bin"));
        }
        layer
    }

    /// `PATH` plus `CC`, `CXX`, `AR`, `LD`, `NM`, `RANLIB` and `STRIP`.
    pub fn env_layer(&self, key: &str) -> EnvLayer {
        let mut layer = self.path_layer(key);
        for (var, tool) in TOOL_VARS {
            layer = layer.set(var, self.tool(tool));
        }
        layer
    }
}

/// Toolchains assigned to the roles of one build step.
#[derive(Debug, Clone)]
pub struct Toolset {
    /// Runs on and targets the build machine.
    pub build: ToolchainRef,
    /// Produces code for the step's `--host`; the build toolchain when absent.
    pub host: Option<ToolchainRef>,
    /// Produces code for the step's `--target` (runtime libraries of a
    /// compiler built for another host).
    pub target: Option<ToolchainRef>,
}

impl Toolset {
    /// Everything built with one toolchain.
    pub fn native(build: ToolchainRef) -> Self {
        Self {
            build,
            host: None,
            target: None,
        }
    }

    pub fn with_host(mut self, host: ToolchainRef) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_target(mut self, target: ToolchainRef) -> Self {
        self.target = Some(target);
        self
    }

    /// The toolchain compiling for the step's host.
    pub fn host_tools(&self) -> &ToolchainRef {
        self.host.as_ref().unwrap_or(&self.build)
    }

    /// Artifact inputs of the step, keyed by role.
    pub fn inputs(&self) -> Vec<(String, NodeId)> {
        self.roles()
            .filter_map(|(key, tc)| tc.node.map(|node| (key.to_string(), node)))
            .collect()
    }

    fn roles(&self) -> impl Iterator<Item = (&'static str, &ToolchainRef)> {
        [
            ("build_tc", Some(&self.build)),
            ("host_tc", self.host.as_ref()),
            ("target_tc", self.target.as_ref()),
        ]
        .into_iter()
        .filter_map(|(key, tc)| tc.map(|tc| (key, tc)))
    }

    /// The environment layer of the step's tools.
    ///
    /// `PATH` lists the target, host and build toolchains in that order.
    /// `CC` and friends name the host compiler; `*_FOR_BUILD` every build
    /// tool; `*_FOR_TARGET` the target compiler when one is assigned.
    /// With any proxied toolchain, `KILN_RESOURCE_DIR` points into the
    /// step's output.
    pub fn layer(&self) -> EnvLayer {
        let mut layer = EnvLayer::new();
        for (key, tc) in self.roles() {
            layer.extend(&tc.path_layer(key));
        }

        let host = self.host_tools();
        for (var, tool) in TOOL_VARS {
            layer = layer.set(var, host.tool(tool));
        }
        for (var, tool) in TOOL_VARS {
            layer = layer.set(format!("{var}_FOR_BUILD"), self.build.tool(tool));
        }
        layer = layer.set("AS_FOR_BUILD", self.build.tool("as"));

        if self.roles().any(|(_, tc)| tc.proxied) {
            // Outputs linked by a proxy keep their resources inside the
            // step's artifact, where installed wrappers find them.
            let resources = format!("%{{output}}/{RESOURCE_DIR_NAME}");
            layer = layer
                .set(RESOURCE_DIR_VAR, resources.clone())
                .prefix(EXTRA_DIRS_VAR, resources, ":");
        }

        if let Some(target) = &self.target {
            layer = layer
                .set("GCC_FOR_TARGET", target.tool("gcc"))
                .set("AS_FOR_TARGET", target.tool("as"));
            for (var, tool) in TOOL_VARS {
                layer = layer.set(format!("{var}_FOR_TARGET"), target.tool(tool));
            }
        }
        layer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_env::{compose_over, ResolvedEnv};
    use kiln_graph::ContentHash;

    fn triple(s: &str) -> Triple {
        Triple::parse(s).unwrap()
    }

    #[test]
    fn cross_tools_are_prefixed() {
        let node = ContentHash::of_bytes(b"gcc");
        let cross = ToolchainRef::artifact(node, triple("x86_64-unknown-linux-gnu"), triple("aarch64-unknown-linux-musl"));
        assert_eq!(cross.tool("cc"), "aarch64-unknown-linux-musl-cc");
        let native = ToolchainRef::ambient(triple("x86_64-unknown-linux-gnu"));
        assert_eq!(native.tool("cc"), "cc");
    }

    #[test]
    fn proxied_bin_comes_first_on_path() {
        let node = ContentHash::of_bytes(b"gcc");
        let mut tc = ToolchainRef::artifact(node, triple("x86_64-unknown-linux-gnu"), triple("x86_64-unknown-linux-gnu"));
        tc.proxied = true;
        let mut ambient = ResolvedEnv::new();
        ambient.insert("PATH", "/usr/bin");
        let env = compose_over(&ambient, &[tc.env_layer("tc")]);
        assert_eq!(env.get("PATH"), Some("%{tc}/kiln/bin:%{tc}/bin:/usr/bin"));
        assert_eq!(env.get("CXX"), Some("c++"));
        assert_eq!(env.get("KILN_RESOURCE_DIR"), None);

        let env = compose_over(&ambient, &[Toolset::native(tc).layer()]);
        assert_eq!(env.get("KILN_RESOURCE_DIR"), Some("%{output}/kiln-resources.d"));
        assert_eq!(env.get("KILN_RESOURCE_DIRS"), Some("%{output}/kiln-resources.d"));
    }

    #[test]
    fn canadian_roles() {
        let build = ToolchainRef::ambient(triple("x86_64-unknown-linux-gnu"));
        let cross = ToolchainRef::artifact(
            ContentHash::of_bytes(b"stage1"),
            triple("x86_64-unknown-linux-gnu"),
            triple("x86_64-kiln-linux-musl"),
        );
        let tools = Toolset::native(build).with_host(cross.clone()).with_target(cross);
        let env = compose_over(&ResolvedEnv::new(), &[tools.layer()]);
        assert_eq!(env.get("CC"), Some("x86_64-kiln-linux-musl-cc"));
        assert_eq!(env.get("CC_FOR_BUILD"), Some("cc"));
        assert_eq!(env.get("AS_FOR_BUILD"), Some("as"));
        assert_eq!(env.get("RANLIB_FOR_BUILD"), Some("ranlib"));
        assert_eq!(env.get("GCC_FOR_TARGET"), Some("x86_64-kiln-linux-musl-gcc"));
        assert_eq!(env.get("RANLIB_FOR_TARGET"), Some("x86_64-kiln-linux-musl-ranlib"));
        assert_eq!(env.get("PATH"), Some("%{target_tc}/bin:%{host_tc}/bin"));
        assert_eq!(tools.inputs().len(), 2);
    }
}
