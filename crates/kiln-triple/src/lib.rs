//! Target triple model for the kiln toolchain bootstrapper.
//!
//! Parses, renders and canonicalizes `architecture-vendor-os-environment`
//! tuples and answers the questions the rest of the bootstrapper asks of a
//! triple: which C library it uses, what its dynamic linker is called, and
//! which kernel architecture its headers come from.

pub mod error;
pub mod libc;
pub mod triple;

pub use error::{Result, TripleError};
pub use libc::{LibcFamily, DEFAULT_GLIBC_VERSION};
pub use triple::{Arch, Environment, Os, Triple, TripleOverride};

/// The triple of the machine this process runs on, derived once from the
/// compile-time target. Callers thread the result through explicitly.
pub fn current() -> Result<Triple> {
    let arch = std::env::consts::ARCH;
    let triple = match std::env::consts::OS {
        "macos" => format!("{arch}-apple-darwin"),
        "linux" if cfg!(target_env = "musl") => format!("{arch}-unknown-linux-musl"),
        "linux" => format!("{arch}-unknown-linux-gnu"),
        other => format!("{arch}-unknown-{other}"),
    };
    Triple::parse(&triple)
}
