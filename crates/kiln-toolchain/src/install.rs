//! Installing proxy executables into a toolchain.
//!
//! Layout written under the toolchain root:
//!
//! ```text
//! kiln/libexec/kiln-proxy     the multi-call proxy binary
//! kiln/libexec/ld             -> kiln-proxy (found by the driver via -B)
//! kiln/bin/{cc,c++,ld,strip}  -> ../libexec/kiln-proxy
//! kiln/kiln-proxy.json        proxy configuration
//! kiln/toolchain.json         the toolchain descriptor
//! ```
//!
//! Cross toolchains get `<target>-cc` and friends instead of bare names.

use std::fs;
use std::path::{Path, PathBuf};

use kiln_env::ResolvedEnv;
use kiln_graph::fetch::sha256_hex;
use kiln_graph::fsutil;
use kiln_graph::{ArtifactTransform, GraphError, TransformContext};
use kiln_triple::Triple;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ProxyConfig;
use crate::descriptor::ToolchainDescriptor;
use crate::error::{Result, ToolchainError};
use crate::introspect::Introspector;

pub const PROXY_BINARY: &str = "kiln-proxy";

/// Roles of the multi-call proxy, in installation order.
pub const PROXY_ROLES: [&str; 4] = ["cc", "c++", "ld", "strip"];

/// Names the proxies are installed under for a toolchain.
pub fn proxy_names(desc: &ToolchainDescriptor) -> Vec<String> {
    let prefix = if desc.is_cross() {
        desc.target.tool_prefix()
    } else {
        String::new()
    };
    PROXY_ROLES.iter().map(|role| format!("{prefix}{role}")).collect()
}

/// Install proxies for `desc` under `<desc.root>/kiln`.
///
/// `launcher` is the binary prepended to wrapped link outputs; when it is
/// `None` the proxy binary itself is used for native toolchains and wrapping
/// is disabled for cross toolchains.
pub fn install_proxies(desc: &ToolchainDescriptor, proxy: &Path, launcher: Option<&Path>) -> Result<ProxyConfig> {
    let kiln = desc.root.join("kiln");
    let libexec = kiln.join("libexec");
    let bin = kiln.join("bin");
    for dir in [&libexec, &bin] {
        fs::create_dir_all(dir).map_err(ToolchainError::io(format!("creating {}", dir.display())))?;
    }

    let installed = libexec.join(PROXY_BINARY);
    fs::copy(proxy, &installed)
        .and_then(|_| fsutil::make_executable(&installed))
        .map_err(ToolchainError::io(format!("installing {}", proxy.display())))?;
    replace_symlink(Path::new(PROXY_BINARY), &libexec.join("ld"))?;

    for name in proxy_names(desc) {
        let target = Path::new("..").join("libexec").join(PROXY_BINARY);
        replace_symlink(&target, &bin.join(name))?;
    }

    let launcher = match launcher {
        Some(path) => {
            let dest = libexec.join("kiln-launcher");
            fs::copy(path, &dest)
                .and_then(|_| fsutil::make_executable(&dest))
                .map_err(ToolchainError::io(format!("installing launcher {}", path.display())))?;
            Some(dest)
        }
        None if !desc.is_cross() => Some(installed.clone()),
        None => None,
    };

    let config = ProxyConfig::from_descriptor(desc, &libexec, launcher);
    config.save(&kiln)?;
    desc.save()?;
    info!(
        root = %desc.root.display(),
        target = %desc.target,
        cross = desc.is_cross(),
        "installed toolchain proxies"
    );
    Ok(config)
}

fn replace_symlink(target: &Path, link: &Path) -> Result<()> {
    if link.symlink_metadata().is_ok() {
        fs::remove_file(link).map_err(ToolchainError::io(format!("removing {}", link.display())))?;
    }
    fsutil::symlink(target, link).map_err(ToolchainError::io(format!("linking {}", link.display())))
}

/// Parameters of the `proxy-toolchain` transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProxyParams {
    pub host: Triple,
    pub target: Triple,
    /// Proxy binary on the build machine, pinned by its digest.
    pub proxy: PathBuf,
    pub proxy_sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launcher: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launcher_sha256: Option<String>,
}

impl ProxyParams {
    /// Pin `proxy` (and `launcher`) by hashing the files now.
    pub fn new(host: Triple, target: Triple, proxy: &Path, launcher: Option<&Path>) -> Result<Self> {
        let digest = |p: &Path| {
            fs::read(p)
                .map(|b| sha256_hex(&b))
                .map_err(ToolchainError::io(format!("hashing {}", p.display())))
        };
        Ok(Self {
            host,
            target,
            proxy: proxy.to_path_buf(),
            proxy_sha256: digest(proxy)?,
            launcher_sha256: launcher.map(digest).transpose()?,
            launcher: launcher.map(Path::to_path_buf),
        })
    }
}

/// Transform that introspects a built toolchain and installs proxies into it.
#[derive(Debug, Default)]
pub struct ProxyToolchain;

pub const PROXY_TRANSFORM: &str = "proxy-toolchain";

impl ProxyToolchain {
    fn verify(path: &Path, expected: &str) -> std::result::Result<(), GraphError> {
        let bytes = fs::read(path).map_err(GraphError::io(format!("reading {}", path.display())))?;
        let actual = sha256_hex(&bytes);
        if actual != expected {
            return Err(GraphError::transform(
                PROXY_TRANSFORM,
                format!("{} changed: expected sha256 {expected}, found {actual}", path.display()),
            ));
        }
        Ok(())
    }
}

impl ArtifactTransform for ProxyToolchain {
    fn name(&self) -> &str {
        PROXY_TRANSFORM
    }

    fn apply(
        &self,
        root: &Path,
        params: &serde_json::Value,
        ctx: &TransformContext<'_>,
    ) -> std::result::Result<(), GraphError> {
        let fail = |e: ToolchainError| GraphError::transform(PROXY_TRANSFORM, e);
        let params: ProxyParams = serde_json::from_value(params.clone())
            .map_err(|e| GraphError::transform(PROXY_TRANSFORM, e))?;
        Self::verify(&params.proxy, &params.proxy_sha256)?;
        if let (Some(launcher), Some(sum)) = (&params.launcher, &params.launcher_sha256) {
            Self::verify(launcher, sum)?;
        }

        let mut env = ResolvedEnv::new();
        let path: Vec<PathBuf> = vec![root.join("bin"), root.join(params.target.to_string()).join("bin")];
        let joined = std::env::join_paths(&path).map_err(|e| GraphError::transform(PROXY_TRANSFORM, e))?;
        env.insert("PATH", joined.to_string_lossy());

        let desc = Introspector::new(ctx.executor)
            .with_cancel(ctx.cancel.clone())
            .toolchain_components(&env, Some(&params.host), Some(&params.target))
            .map_err(fail)?;
        // Introspection reports canonical paths; keep them under `root`.
        let canonical = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let desc = desc.rebase(&canonical, root);

        install_proxies(&desc, &params.proxy, params.launcher.as_deref()).map_err(fail)?;
        Ok(())
    }
}
