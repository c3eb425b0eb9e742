//! Error types for graph construction and realization.

use std::path::PathBuf;

use crate::hash::ContentHash;

/// Number of trailing stderr lines kept in a failure's display form.
const STDERR_TAIL_LINES: usize = 40;

/// A build step that ran and did not succeed.
///
/// `step` is the process name, which embeds the stage, variant and triple
/// the step was built for, so the failure can be reproduced standalone.
#[derive(Debug, Clone, thiserror::Error)]
#[error("build step '{step}' failed ({}):\n{}", exit_display(.exit_code), tail(.stderr))]
pub struct BuildStepFailure {
    /// Name of the failing step.
    pub step: String,
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Captured standard error.
    pub stderr: String,
    /// Captured standard output.
    pub stdout: String,
}

fn exit_display(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Errors raised while fetching a source.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The downloaded bytes did not hash to the expected digest.
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    /// No mirror holds the requested file.
    #[error("no mirror provides {url}")]
    NotFound { url: String },

    #[error("I/O error fetching {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by an executor before or while running a command.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running {}: {source}", .program.display())]
    Wait {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("execution cancelled")]
    Cancelled,
}

/// Errors raised while planning or realizing a build graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("node {0} is referenced but not part of the graph")]
    UnknownNode(ContentHash),

    #[error("dependency cycle through node {0}")]
    Cycle(ContentHash),

    #[error(transparent)]
    StepFailed(#[from] BuildStepFailure),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("executor error in '{step}': {source}")]
    Exec {
        step: String,
        #[source]
        source: ExecError,
    },

    #[error("no transform registered under the name '{0}'")]
    UnknownTransform(String),

    #[error("transform '{name}' failed: {message}")]
    Transform { name: String, message: String },

    #[error("path '{path}' does not exist in artifact {node}")]
    MissingPath { node: ContentHash, path: String },

    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("realization cancelled")]
    Cancelled,
}

impl GraphError {
    /// Wrap an I/O error with a short description of what was being done.
    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> GraphError {
        let context = context.into();
        move |source| GraphError::Io { context, source }
    }
}

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display_keeps_stderr_tail() {
        let stderr: String = (0..100).map(|i| format!("line {i}\n")).collect();
        let failure = BuildStepFailure {
            step: "gcc-stage2_full-x86_64-unknown-linux-gnu".into(),
            exit_code: Some(2),
            stderr,
            stdout: String::new(),
        };
        let text = failure.to_string();
        assert!(text.contains("gcc-stage2_full-x86_64-unknown-linux-gnu"));
        assert!(text.contains("exit code 2"));
        assert!(text.contains("line 99"));
        assert!(!text.contains("line 10\n"));
    }
}
