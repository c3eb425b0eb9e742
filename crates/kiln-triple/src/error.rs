//! Error types for triple operations.

/// Errors that can occur while parsing or interpreting a target triple.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TripleError {
    /// The triple string could not be parsed.
    #[error("malformed triple '{input}': {reason} (offending token '{token}')")]
    Malformed {
        /// The full input string.
        input: String,
        /// The token that failed to parse.
        token: String,
        /// Why the token was rejected.
        reason: &'static str,
    },

    /// The triple's environment does not name a supported C library family.
    #[error("unsupported environment for '{triple}': expected a glibc or musl environment")]
    UnsupportedEnvironment {
        /// The offending triple, rendered.
        triple: String,
    },
}

/// Result type for triple operations.
pub type Result<T> = std::result::Result<T, TripleError>;
