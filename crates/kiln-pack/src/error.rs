//! Error types for wrapping and launching.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PackError {
    /// The file carries no pack trailer.
    #[error("{} is not a wrapped executable", .path.display())]
    NotWrapped { path: PathBuf },

    /// The trailer is present but its manifest is unreadable.
    #[error("corrupt manifest in {}: {reason}", .path.display())]
    CorruptManifest { path: PathBuf, reason: String },

    /// No `kiln-resources.d` directory encloses the executable.
    #[error("no resource directory found above {}", .path.display())]
    NoResourceDir { path: PathBuf },

    /// A manifest entry names a resource that does not exist.
    #[error("resource '{entry}' is missing from {}", .root.display())]
    MissingResource { root: PathBuf, entry: String },

    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl PackError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> PackError {
        let context = context.into();
        move |source| PackError::Io { context, source }
    }
}

/// Result type for pack operations.
pub type Result<T> = std::result::Result<T, PackError>;
