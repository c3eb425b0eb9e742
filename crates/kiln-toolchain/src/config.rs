//! Runtime configuration of the proxy executables (`kiln-proxy.json`).
//!
//! Paths are stored relative to the directory holding the file so that a
//! proxied toolchain can be moved as a whole.

use std::fs;
use std::path::{Component, Path, PathBuf};

use kiln_triple::Triple;
use serde::{Deserialize, Serialize};

use crate::descriptor::ToolchainDescriptor;
use crate::error::{Result, ToolchainError};
use crate::flavor::{ArgContext, Flavor};

pub const CONFIG_FILE: &str = "kiln-proxy.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProxyConfig {
    pub flavor: Flavor,
    pub target: Triple,
    /// Whether the proxied toolchain is a cross compiler.
    pub cross: bool,
    pub cc: PathBuf,
    pub cxx: PathBuf,
    pub ld: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sysroot: Option<PathBuf>,
    /// Directory holding the proxied `ld`, searched by the compiler driver.
    pub libexec: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub internal_dirs: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_linker: Option<PathBuf>,
    /// Launcher prepended to wrapped outputs; must run on the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launcher: Option<PathBuf>,
    /// Compiler cache directory; the cache is off when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc_cache: Option<PathBuf>,
}

impl ProxyConfig {
    /// Configuration for proxies installed under `<root>/kiln`.
    pub fn from_descriptor(desc: &ToolchainDescriptor, libexec: &Path, launcher: Option<PathBuf>) -> Self {
        Self {
            flavor: desc.flavor,
            target: desc.target.clone(),
            cross: desc.is_cross(),
            cc: desc.cc.clone(),
            cxx: desc.cxx.clone(),
            ld: desc.ld.clone(),
            strip: desc.strip.clone(),
            sysroot: desc.sysroot.clone(),
            libexec: libexec.to_path_buf(),
            internal_dirs: desc.internal_dirs.clone(),
            resource_dir: desc.resource_dir.clone(),
            dynamic_linker: desc.dynamic_linker.clone(),
            launcher,
            cc_cache: None,
        }
    }

    pub fn arg_context(&self) -> ArgContext {
        ArgContext {
            sysroot: self.sysroot.clone(),
            libexec: self.libexec.clone(),
            internal_dirs: self.internal_dirs.clone(),
            resource_dir: self.resource_dir.clone(),
            cross_target: self.cross.then(|| self.target.to_string()),
        }
    }

    /// Sysroot library directories, searched last for needed libraries.
    pub fn sysroot_lib_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(sysroot) = &self.sysroot {
            for sub in ["lib", "lib64", "usr/lib", "usr/lib64"] {
                dirs.push(sysroot.join(sub));
            }
        }
        if let Some(loader) = self.dynamic_linker.as_deref().and_then(Path::parent) {
            dirs.push(loader.to_path_buf());
        }
        dirs
    }

    fn map_paths(&self, f: impl Fn(&Path) -> PathBuf) -> Self {
        let opt = |p: &Option<PathBuf>| p.as_deref().map(&f);
        Self {
            flavor: self.flavor,
            target: self.target.clone(),
            cross: self.cross,
            cc: f(&self.cc),
            cxx: f(&self.cxx),
            ld: f(&self.ld),
            strip: opt(&self.strip),
            sysroot: opt(&self.sysroot),
            libexec: f(&self.libexec),
            internal_dirs: self.internal_dirs.iter().map(|p| f(p)).collect(),
            resource_dir: opt(&self.resource_dir),
            dynamic_linker: opt(&self.dynamic_linker),
            launcher: opt(&self.launcher),
            cc_cache: opt(&self.cc_cache),
        }
    }

    /// Write `<dir>/kiln-proxy.json` with paths relative to `dir`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(CONFIG_FILE);
        let relative = self.map_paths(|p| relative_to(p, dir));
        let json = serde_json::to_string_pretty(&relative).map_err(|e| ToolchainError::Config {
            path: path.clone(),
            message: e.to_string(),
        })?;
        fs::write(&path, json).map_err(ToolchainError::io(format!("writing {}", path.display())))?;
        Ok(path)
    }

    /// Read a config file, making its paths absolute.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(ToolchainError::io(format!("reading {}", path.display())))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| ToolchainError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let dir = path.parent().unwrap_or(Path::new("."));
        Ok(config.map_paths(|p| dir.join(p)))
    }

    /// Find the config governing the proxy executable at `exe`, searching
    /// its directory and up to two levels above.
    pub fn locate(exe: &Path) -> Result<PathBuf> {
        let mut dir = exe.parent();
        for _ in 0..3 {
            let Some(current) = dir else { break };
            let candidate = current.join(CONFIG_FILE);
            if candidate.is_file() {
                return Ok(candidate);
            }
            dir = current.parent();
        }
        Err(ToolchainError::Config {
            path: exe.to_path_buf(),
            message: format!("no {CONFIG_FILE} next to the proxy"),
        })
    }
}

/// Express `path` relative to `base` when both are absolute; other paths
/// are returned unchanged.
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    if !path.is_absolute() || !base.is_absolute() {
        return path.to_path_buf();
    }
    let path_parts: Vec<Component<'_>> = path.components().collect();
    let base_parts: Vec<Component<'_>> = base.components().collect();
    let common = path_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();
    // Only the root in common: keep the absolute path.
    if common <= 1 {
        return path.to_path_buf();
    }
    let mut out = PathBuf::new();
    for _ in common..base_parts.len() {
        out.push("..");
    }
    for part in &path_parts[common..] {
        out.push(part);
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths() {
        assert_eq!(
            relative_to(Path::new("/tc/bin/gcc"), Path::new("/tc/kiln")),
            PathBuf::from("../bin/gcc")
        );
        assert_eq!(
            relative_to(Path::new("/tc/kiln/libexec"), Path::new("/tc/kiln")),
            PathBuf::from("libexec")
        );
        assert_eq!(
            relative_to(Path::new("/lib64/ld-linux-x86-64.so.2"), Path::new("/tc/kiln")),
            PathBuf::from("/lib64/ld-linux-x86-64.so.2")
        );
    }

    #[test]
    fn save_and_load_relocates() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let kiln = root.join("kiln");
        fs::create_dir_all(&kiln).unwrap();
        let config = ProxyConfig {
            flavor: Flavor::Gcc,
            target: Triple::parse("x86_64-unknown-linux-musl").unwrap(),
            cross: false,
            cc: root.join("bin/gcc"),
            cxx: root.join("bin/g++"),
            ld: root.join("bin/ld"),
            strip: None,
            sysroot: Some(root.join("sysroot")),
            libexec: kiln.join("libexec"),
            internal_dirs: vec![],
            resource_dir: None,
            dynamic_linker: None,
            launcher: Some(kiln.join("libexec/kiln-proxy")),
            cc_cache: None,
        };
        let path = config.save(&kiln).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"../bin/gcc\""));

        let loaded = ProxyConfig::load(&path).unwrap();
        assert_eq!(loaded.cc, kiln.join("../bin/gcc"));
        assert_eq!(loaded.arg_context().libexec, kiln.join("libexec"));
        assert_eq!(ProxyConfig::locate(&kiln.join("libexec/kiln-proxy")).unwrap(), path);
    }
}
