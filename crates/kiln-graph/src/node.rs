//! Build-step nodes.

use std::collections::BTreeMap;

use kiln_env::ResolvedEnv;
use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// Identity of a node: the hash of its serialized form.
pub type NodeId = ContentHash;

/// A command run by the sandboxed executor.
///
/// The script runs under `bash -eu -o pipefail` in an empty working
/// directory. Each input artifact is exported under its key, the output
/// directory as `$output`. Environment values may reference the same paths
/// with `%{key}` and `%{output}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Step name, e.g. `gcc-stage1_limited-aarch64-unknown-linux-gnu`.
    pub name: String,
    /// Shell script body.
    pub script: String,
    /// Fully composed environment.
    pub env: ResolvedEnv,
    /// Input artifacts by variable name.
    pub inputs: BTreeMap<String, NodeId>,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            env: ResolvedEnv::new(),
            inputs: BTreeMap::new(),
        }
    }

    /// Attach an input artifact under a variable name.
    pub fn input(mut self, key: impl Into<String>, node: NodeId) -> Self {
        self.inputs.insert(key.into(), node);
        self
    }

    pub fn env(mut self, env: ResolvedEnv) -> Self {
        self.env = env;
        self
    }
}

/// One vertex of the build graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Node {
    /// A checksum-verified download.
    Fetch { url: String, sha256: String },
    /// A script run by the executor.
    Process(ProcessSpec),
    /// Directory union of the inputs, later inputs winning on conflicts.
    Merge { inputs: Vec<NodeId> },
    /// A sub-path of an artifact.
    Get { input: NodeId, path: String },
    /// A named in-process transform applied to a copy of `input`.
    Transform {
        name: String,
        input: NodeId,
        params: serde_json::Value,
    },
}

impl Node {
    pub fn id(&self) -> NodeId {
        ContentHash::of_value(self)
    }

    /// Direct dependencies in declaration order.
    pub fn inputs(&self) -> Vec<NodeId> {
        match self {
            Node::Fetch { .. } => Vec::new(),
            Node::Process(spec) => spec.inputs.values().copied().collect(),
            Node::Merge { inputs } => inputs.clone(),
            Node::Get { input, .. } | Node::Transform { input, .. } => vec![*input],
        }
    }

    /// Short human-readable label for logs and errors.
    pub fn label(&self) -> String {
        match self {
            Node::Fetch { url, .. } => format!("fetch {}", url.rsplit('/').next().unwrap_or(url)),
            Node::Process(spec) => spec.name.clone(),
            Node::Merge { inputs } => format!("merge of {} artifacts", inputs.len()),
            Node::Get { path, .. } => format!("get {path}"),
            Node::Transform { name, .. } => format!("transform {name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_covers_inputs() {
        let a = Node::Fetch {
            url: "file:///src/a.tar.xz".into(),
            sha256: "00".repeat(32),
        };
        let b = Node::Fetch {
            url: "file:///src/b.tar.xz".into(),
            sha256: "00".repeat(32),
        };
        let pa = Node::Process(ProcessSpec::new("build", "make").input("src", a.id()));
        let pb = Node::Process(ProcessSpec::new("build", "make").input("src", b.id()));
        assert_ne!(pa.id(), pb.id());
        assert_eq!(pa.id(), pa.clone().id());
    }

    #[test]
    fn labels() {
        let fetch = Node::Fetch {
            url: "https://ftp.gnu.org/gnu/gcc/gcc-14.2.0.tar.xz".into(),
            sha256: String::new(),
        };
        assert_eq!(fetch.label(), "fetch gcc-14.2.0.tar.xz");
        let merge = Node::Merge {
            inputs: vec![fetch.id(), fetch.id()],
        };
        assert_eq!(merge.label(), "merge of 2 artifacts");
        assert_eq!(merge.inputs().len(), 2);
    }
}
