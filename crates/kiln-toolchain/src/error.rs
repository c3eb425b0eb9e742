//! Error types for toolchain introspection and proxying.

use std::path::PathBuf;

use kiln_graph::ExecError;
use kiln_triple::TripleError;

#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    /// A C compiler was found without its C++ counterpart.
    #[error("incomplete toolchain: found {} but no matching {cxx}", .cc.display())]
    IncompleteToolchain { cc: PathBuf, cxx: String },

    /// No recognizable compiler on the search path.
    #[error("no C compiler found (searched: {searched})")]
    NoToolchain { searched: String },

    /// A required companion tool (linker, strip) is missing.
    #[error("toolchain at {} has no {tool}", .root.display())]
    MissingTool { root: PathBuf, tool: String },

    /// A compiler probe ran but produced unusable output.
    #[error("probing {} with {flag} failed: {message}", .tool.display())]
    Probe {
        tool: PathBuf,
        flag: String,
        message: String,
    },

    #[error(transparent)]
    Triple(#[from] TripleError),

    #[error("executor error: {0}")]
    Exec(#[from] ExecError),

    /// A file could not be parsed as an executable.
    #[error("cannot read {} as an executable: {message}", .path.display())]
    BinaryFormat { path: PathBuf, message: String },

    #[error("invalid proxy configuration {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolchainError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> ToolchainError {
        let context = context.into();
        move |source| ToolchainError::Io { context, source }
    }
}

/// Result type for toolchain operations.
pub type Result<T> = std::result::Result<T, ToolchainError>;
