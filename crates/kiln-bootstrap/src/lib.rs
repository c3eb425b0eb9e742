//! Staged toolchain bootstrapping.
//!
//! A [`Planner`] turns a bootstrap compiler on the build machine into build
//! graphs: kernel headers and a C library (the sysroot), binutils, and GCC
//! in three variants. The Canadian-cross orchestrator chains them into a
//! native toolchain for any supported host, then optionally a cross
//! toolchain for a further target. [`build_sysroot`], [`build_toolchain`]
//! and [`introspect`] are the entry points for package recipes.

pub mod api;
pub mod binutils;
pub mod canadian;
pub mod config;
pub mod error;
pub mod gcc;
pub mod planner;
pub mod sysroot;
pub mod tools;
pub mod transforms;

pub use api::{build_sysroot, build_toolchain, introspect, BuiltToolchain};
pub use canadian::{BootstrapStage, CanadianState};
pub use config::{BuildSettings, KilnConfig, MathLibs, Source, Sources};
pub use error::{BootstrapError, Result};
pub use gcc::{GccRequest, Variant};
pub use planner::{Planner, ProxyBinaries};
pub use sysroot::Sysroot;
pub use tools::{tool_name, ToolchainRef, Toolset};
pub use transforms::default_registry;
