//! Toolchain introspection and proxying.
//!
//! [`Introspector`] finds the compilers an environment provides and
//! describes them as a [`ToolchainDescriptor`]. [`install_proxies`] (or the
//! `proxy-toolchain` graph transform) installs the multi-call proxy in front
//! of them; the proxy reads its [`ProxyConfig`] and uses the flavor's
//! [`ArgStrategy`] to rewrite every compiler and linker invocation.

pub mod binary;
pub mod cache;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod flavor;
pub mod install;
pub mod introspect;
pub mod link;

pub use binary::{inspect, BinaryFormat, BinaryInfo};
pub use cache::{CacheableCompile, CompileCache};
pub use config::ProxyConfig;
pub use descriptor::ToolchainDescriptor;
pub use error::{Result, ToolchainError};
pub use flavor::{ArgContext, ArgStrategy, Flavor};
pub use install::{install_proxies, proxy_names, ProxyParams, ProxyToolchain, PROXY_TRANSFORM};
pub use introspect::Introspector;
pub use link::{resolve_needed, LinkInvocation, Resolution};
