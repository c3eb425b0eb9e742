//! Canadian-cross orchestration.
//!
//! From the bootstrap compiler on the build machine `B` to a native
//! toolchain for the host `H`:
//!
//! ```text
//! BootstrapAvailable
//!   binutils(B, B, H'), stage1_bootstrap(B, B, H'), sysroot(H), stage1_limited(B, B, H')
//! BuildToHostCrossBuilt
//!   binutils(B, H, H)
//! NativeBinutilsBuilt
//!   stage2_full(B, H, H)
//! NativeToolchainBuilt
//! ```
//!
//! `H'` is `H` retagged with the configured vendor when `B` and `H` are the
//! same platform, so that the first compiler is a genuine cross compiler.
//! A further cross target `T` is then built with the proxied native
//! toolchain: binutils(H, H, T), stage1_bootstrap, sysroot(T) and
//! stage2_full(H, H, T).

use kiln_triple::{Triple, TripleOverride};
use tracing::info;

use crate::error::Result;
use crate::gcc::{GccRequest, Variant};
use crate::planner::Planner;
use crate::sysroot::Sysroot;
use crate::tools::{ToolchainRef, Toolset};

/// Progress of the native half of the orchestration.
#[derive(Debug, Clone)]
pub enum CanadianState {
    BootstrapAvailable,
    BuildToHostCrossBuilt {
        cross: ToolchainRef,
        sysroot: Sysroot,
    },
    NativeBinutilsBuilt {
        cross: ToolchainRef,
        sysroot: Sysroot,
        binutils: kiln_graph::NodeId,
    },
    NativeToolchainBuilt {
        native: ToolchainRef,
    },
}

impl CanadianState {
    pub fn name(&self) -> &'static str {
        match self {
            CanadianState::BootstrapAvailable => "bootstrap-available",
            CanadianState::BuildToHostCrossBuilt { .. } => "build-to-host-cross-built",
            CanadianState::NativeBinutilsBuilt { .. } => "native-binutils-built",
            CanadianState::NativeToolchainBuilt { .. } => "native-toolchain-built",
        }
    }
}

/// Outputs of the libc-less first stage.
#[derive(Debug, Clone)]
pub struct BootstrapStage {
    /// Target of the bootstrap binutils and compiler.
    pub intermediate: Triple,
    pub binutils: kiln_graph::NodeId,
    pub compiler: ToolchainRef,
    pub sysroot: Sysroot,
}

impl Planner {
    /// The host triple of the intermediate cross compiler.
    pub fn intermediate_host(&self, host: &Triple) -> Triple {
        if self.build.same_platform(host) {
            host.with_override(TripleOverride {
                vendor: Some(Some(self.config.build.vendor_tag.clone())),
                ..TripleOverride::default()
            })
        } else {
            host.clone()
        }
    }

    /// Plan a toolchain running on `host` for `target` (default `host`).
    ///
    /// Returns the proxied toolchain. The graph holds every stage; equal
    /// stages of different requests are shared.
    pub fn toolchain(&mut self, host: &Triple, target: Option<&Triple>) -> Result<ToolchainRef> {
        let host = host.canonicalize();
        host.libc()?;
        let native = self.native_toolchain(&host)?;
        let proxied = self.proxy(&native)?;

        let target = match target.map(Triple::canonicalize) {
            Some(target) if target != host => target,
            _ => {
                info!(%host, "native toolchain requested; no cross stage");
                return Ok(proxied);
            }
        };
        target.libc()?;
        let cross = self.cross_toolchain(&proxied, &target)?;
        self.proxy(&cross)
    }

    /// Plan a sysroot for `target` from the bootstrap compiler alone:
    /// binutils and a `stage1_bootstrap` compiler for the intermediate
    /// triple, then the C library built with that compiler.
    pub fn bootstrap_sysroot(&mut self, target: &Triple) -> Result<BootstrapStage> {
        let target = target.canonicalize();
        let build = self.build.clone();
        let intermediate = self.intermediate_host(&target);
        let tools = Toolset::native(self.bootstrap.clone());
        let binutils = self.binutils(&build, &build, &intermediate, false, &tools);
        let compiler = self.gcc(&GccRequest {
            variant: Variant::Stage1Bootstrap,
            build: build.clone(),
            host: build,
            target: intermediate.clone(),
            sysroot: None,
            binutils,
            tools: tools.clone(),
        })?;
        let sysroot = self.sysroot(&target, &tools.with_host(compiler.clone()), None)?;
        Ok(BootstrapStage {
            intermediate,
            binutils,
            compiler,
            sysroot,
        })
    }

    /// Run the state machine up to `NativeToolchainBuilt`.
    pub fn native_toolchain(&mut self, host: &Triple) -> Result<ToolchainRef> {
        let build = self.build.clone();
        let bootstrap = self.bootstrap.clone();
        let static_binutils = self.config.build.static_binutils;
        let mut state = CanadianState::BootstrapAvailable;
        loop {
            info!(%host, state = state.name(), "canadian cross");
            state = match state {
                CanadianState::BootstrapAvailable => {
                    let stage = self.bootstrap_sysroot(host)?;
                    let cross = self.gcc(&GccRequest {
                        variant: Variant::Stage1Limited,
                        build: build.clone(),
                        host: build.clone(),
                        target: stage.intermediate,
                        sysroot: Some(stage.sysroot.clone()),
                        binutils: stage.binutils,
                        tools: Toolset::native(bootstrap.clone()),
                    })?;
                    CanadianState::BuildToHostCrossBuilt {
                        cross,
                        sysroot: stage.sysroot,
                    }
                }
                CanadianState::BuildToHostCrossBuilt { cross, sysroot } => {
                    let tools = Toolset::native(bootstrap.clone()).with_host(cross.clone());
                    let binutils = self.binutils(&build, host, host, static_binutils, &tools);
                    CanadianState::NativeBinutilsBuilt { cross, sysroot, binutils }
                }
                CanadianState::NativeBinutilsBuilt { cross, sysroot, binutils } => {
                    let native = self.gcc(&GccRequest {
                        variant: Variant::Stage2Full,
                        build: build.clone(),
                        host: host.clone(),
                        target: host.clone(),
                        sysroot: Some(sysroot),
                        binutils,
                        tools: Toolset::native(bootstrap.clone())
                            .with_host(cross.clone())
                            .with_target(cross),
                    })?;
                    CanadianState::NativeToolchainBuilt { native }
                }
                CanadianState::NativeToolchainBuilt { native } => return Ok(native),
            };
        }
    }

    /// Build a `stage2_full` cross compiler for `target` with a proxied
    /// native toolchain.
    pub fn cross_toolchain(&mut self, native: &ToolchainRef, target: &Triple) -> Result<ToolchainRef> {
        let host = native.host.clone();
        let tools = Toolset::native(native.clone());
        let binutils = self.binutils(&host, &host, target, false, &tools);
        let stage1 = self.gcc(&GccRequest {
            variant: Variant::Stage1Bootstrap,
            build: host.clone(),
            host: host.clone(),
            target: target.clone(),
            sysroot: None,
            binutils,
            tools: tools.clone(),
        })?;
        let sysroot = self.sysroot(target, &tools.clone().with_host(stage1), None)?;
        self.gcc(&GccRequest {
            variant: Variant::Stage2Full,
            build: host.clone(),
            host,
            target: target.clone(),
            sysroot: Some(sysroot),
            binutils,
            tools,
        })
    }
}
