//! The introspected description of a toolchain.

use std::fs;
use std::path::{Path, PathBuf};

use kiln_triple::Triple;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolchainError};
use crate::flavor::Flavor;

/// Where a descriptor is persisted inside a proxied toolchain.
pub const DESCRIPTOR_PATH: &str = "kiln/toolchain.json";

/// Everything the proxy needs to know about a toolchain.
///
/// `host` is the platform the compiler runs on, `target` the platform it
/// emits code for; they differ only for cross compilers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ToolchainDescriptor {
    pub cc: PathBuf,
    pub cxx: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fortran: Option<PathBuf>,
    pub ld: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_linker: Option<PathBuf>,
    pub root: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sysroot: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub internal_dirs: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_dir: Option<PathBuf>,
    pub flavor: Flavor,
    pub host: Triple,
    pub target: Triple,
}

impl ToolchainDescriptor {
    pub fn is_cross(&self) -> bool {
        !self.host.same_platform(&self.target)
    }

    /// Rewrite every path under `from` to live under `to`.
    pub fn rebase(&self, from: &Path, to: &Path) -> Self {
        let map = |p: &Path| match p.strip_prefix(from) {
            Ok(rel) => to.join(rel),
            Err(_) => p.to_path_buf(),
        };
        let opt = |p: &Option<PathBuf>| p.as_deref().map(map);
        Self {
            cc: map(&self.cc),
            cxx: map(&self.cxx),
            fortran: opt(&self.fortran),
            ld: map(&self.ld),
            strip: opt(&self.strip),
            dynamic_linker: opt(&self.dynamic_linker),
            root: map(&self.root),
            sysroot: opt(&self.sysroot),
            internal_dirs: self.internal_dirs.iter().map(|p| map(p)).collect(),
            resource_dir: opt(&self.resource_dir),
            flavor: self.flavor,
            host: self.host.clone(),
            target: self.target.clone(),
        }
    }

    /// Persist under `<root>/kiln/toolchain.json` with root-relative paths.
    pub fn save(&self) -> Result<PathBuf> {
        let relative = self.rebase(&self.root, Path::new(""));
        let path = self.root.join(DESCRIPTOR_PATH);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ToolchainError::io(format!("creating {}", parent.display())))?;
        }
        let json = serde_json::to_string_pretty(&relative).map_err(|e| ToolchainError::Config {
            path: path.clone(),
            message: e.to_string(),
        })?;
        fs::write(&path, json).map_err(ToolchainError::io(format!("writing {}", path.display())))?;
        Ok(path)
    }

    /// Load the descriptor of the toolchain rooted at `root`.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(DESCRIPTOR_PATH);
        let text = fs::read_to_string(&path).map_err(ToolchainError::io(format!("reading {}", path.display())))?;
        let relative: Self = serde_json::from_str(&text).map_err(|e| ToolchainError::Config {
            path: path.clone(),
            message: e.to_string(),
        })?;
        Ok(relative.rebase(Path::new(""), root))
    }
}
