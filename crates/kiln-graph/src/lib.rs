//! Content-addressed build-step graphs.
//!
//! Toolchain stages are expressed as a [`BuildGraph`] of immutable nodes whose
//! ids hash their own definition and their inputs' ids. A [`Runner`] realizes
//! a node by walking its dependency levels against three collaborators: an
//! [`ArtifactStore`], an [`Executor`] and a [`Fetcher`]. Local implementations
//! of all three are provided.

pub mod error;
pub mod exec;
pub mod fetch;
pub mod fsutil;
pub mod graph;
pub mod hash;
pub mod node;
pub mod runner;
pub mod store;
pub mod transform;

pub use error::{BuildStepFailure, ExecError, FetchError, GraphError, Result};
pub use exec::{CancelToken, ExecOutput, ExecRequest, Executor, LocalExecutor};
pub use fetch::{Fetcher, LocalFetcher};
pub use graph::{BuildGraph, Schedule};
pub use hash::ContentHash;
pub use node::{Node, NodeId, ProcessSpec};
pub use runner::Runner;
pub use store::{ArtifactStore, LocalStore, Staging};
pub use transform::{ArtifactTransform, TransformContext, TransformRegistry};
