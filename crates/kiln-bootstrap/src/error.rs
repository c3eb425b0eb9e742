//! Error types for toolchain bootstrapping.

use std::path::PathBuf;

use kiln_graph::GraphError;
use kiln_toolchain::ToolchainError;
use kiln_triple::{Triple, TripleError};

use crate::gcc::Variant;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// A GCC stage was requested with a variant and triples that do not fit.
    #[error("stage contract violated for gcc {variant} (build {build}, host {host}, target {target}): {reason}")]
    StageContractViolation {
        variant: Variant,
        build: Triple,
        host: Triple,
        target: Triple,
        reason: String,
    },

    #[error("TOML parse error in {}: {source}", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration: {detail}")]
    Config { detail: String },

    /// A cross toolchain was requested but no proxy binary was configured.
    #[error("building a toolchain for {target} requires the kiln-proxy binary")]
    MissingProxy { target: Triple },

    #[error(transparent)]
    Triple(#[from] TripleError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl BootstrapError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> BootstrapError {
        let context = context.into();
        move |source| BootstrapError::Io { context, source }
    }
}

/// Result type for bootstrap operations.
pub type Result<T> = std::result::Result<T, BootstrapError>;
