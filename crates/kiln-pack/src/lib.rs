//! Relocatable wrapped executables.
//!
//! A wrapped executable is a small launcher with a [`Manifest`] appended to
//! it. The manifest names the real program, its dynamic loader, library
//! directories, extra arguments and environment mutations, all relative to
//! the nearest enclosing `kiln-resources.d` directory, so the wrapper keeps
//! working after the whole tree is moved.

pub mod error;
pub mod launch;
pub mod manifest;
pub mod resources;
pub mod wrap;

pub use error::{PackError, Result};
pub use launch::Launch;
pub use manifest::{is_wrapped, read_manifest, Manifest};
pub use resources::{ResourceDir, ResourceKind, EXTRA_DIRS_VAR, RESOURCE_DIR_NAME, RESOURCE_DIR_VAR};
pub use wrap::{rewrap, rewrap_to, PackWrapper, WrapOptions, WrappingService};
