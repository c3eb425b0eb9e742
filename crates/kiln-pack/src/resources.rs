//! Content-addressed resource directories.
//!
//! Programs, loaders and shared libraries referenced by wrapped executables
//! live in a `kiln-resources.d` directory next to (or above) the wrappers.
//! Entries are stored as `<kind>/<sha256 prefix>/<name>`, so identical files
//! are kept once and differing files with the same name never collide.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{PackError, Result};

pub const RESOURCE_DIR_NAME: &str = "kiln-resources.d";

/// Environment variable naming the resource directory the linker proxy
/// writes to, instead of one next to each output.
pub const RESOURCE_DIR_VAR: &str = "KILN_RESOURCE_DIR";

/// Environment variable naming extra resource roots, colon separated.
pub const EXTRA_DIRS_VAR: &str = "KILN_RESOURCE_DIRS";

/// Length of the hash component in entry paths.
const HASH_DIR_LEN: usize = 16;

/// What kind of file a resource is; selects its top-level directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Bin,
    Lib,
}

impl ResourceKind {
    fn dir(self) -> &'static str {
        match self {
            ResourceKind::Bin => "bin",
            ResourceKind::Lib => "lib",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceDir {
    root: PathBuf,
}

impl ResourceDir {
    /// Use (and create if needed) `root` as a resource directory.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(PackError::io(format!("creating {}", root.display())))?;
        Ok(Self { root })
    }

    /// The resource directory for an executable written at `exe`.
    pub fn beside(exe: &Path) -> Result<Self> {
        let parent = exe.parent().unwrap_or(Path::new("."));
        Self::create(parent.join(RESOURCE_DIR_NAME))
    }

    /// Find the nearest resource directory enclosing `exe`: either an
    /// ancestor named `kiln-resources.d` or a `kiln-resources.d` child of an
    /// ancestor.
    pub fn enclosing(exe: &Path) -> Result<Self> {
        let mut dir = exe.parent();
        while let Some(current) = dir {
            if current.file_name().is_some_and(|n| n == RESOURCE_DIR_NAME) {
                return Ok(Self {
                    root: current.to_path_buf(),
                });
            }
            let child = current.join(RESOURCE_DIR_NAME);
            if child.is_dir() {
                return Ok(Self { root: child });
            }
            dir = current.parent();
        }
        Err(PackError::NoResourceDir {
            path: exe.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy `src` into the directory under `name`, returning its entry path.
    pub fn add(&self, kind: ResourceKind, src: &Path, name: &str) -> Result<String> {
        let ctx = || format!("adding {} to {}", src.display(), self.root.display());
        let bytes = fs::read(src).map_err(PackError::io(ctx()))?;
        let digest: String = Sha256::digest(&bytes)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        let entry = format!("{}/{}/{}", kind.dir(), &digest[..HASH_DIR_LEN], name);
        let dest = self.root.join(&entry);
        if dest.is_file() {
            debug!(entry, "resource already present");
            return Ok(entry);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(PackError::io(ctx()))?;
        }
        // Write to a temporary name first so a concurrent reader never sees a
        // truncated file.
        let tmp = dest.with_extension("kiln-tmp");
        fs::write(&tmp, &bytes)
            .and_then(|()| copy_mode(src, &tmp))
            .and_then(|()| fs::rename(&tmp, &dest))
            .map_err(PackError::io(ctx()))?;
        debug!(entry, "added resource");
        Ok(entry)
    }

    /// Copy the file or flat directory `entry` of `other` into this
    /// directory under the same name.
    pub fn import(&self, other: &ResourceDir, entry: &str) -> Result<()> {
        let src = other.resolve(entry)?;
        let dest = self.root.join(entry);
        let ctx = || format!("importing {entry} into {}", self.root.display());
        if src.is_dir() {
            fs::create_dir_all(&dest).map_err(PackError::io(ctx()))?;
            for file in fs::read_dir(&src).map_err(PackError::io(ctx()))? {
                let file = file.map_err(PackError::io(ctx()))?;
                let target = dest.join(file.file_name());
                if !target.exists() {
                    fs::copy(file.path(), &target).map_err(PackError::io(ctx()))?;
                }
            }
        } else if !dest.exists() {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(PackError::io(ctx()))?;
            }
            fs::copy(&src, &dest).map_err(PackError::io(ctx()))?;
        }
        Ok(())
    }

    /// Absolute path of an entry, failing if it does not exist.
    pub fn resolve(&self, entry: &str) -> Result<PathBuf> {
        let path = self.root.join(entry);
        if path.symlink_metadata().is_err() {
            return Err(PackError::MissingResource {
                root: self.root.clone(),
                entry: entry.to_string(),
            });
        }
        Ok(path)
    }

    /// The directory part of an entry, for library search paths.
    pub fn entry_dir(entry: &str) -> String {
        match entry.rsplit_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => String::new(),
        }
    }
}

/// Resolve `entry` in the resource directory enclosing `exe`, falling back to
/// the roots listed in `KILN_RESOURCE_DIRS`.
pub fn locate(exe: &Path, entry: &str) -> Result<PathBuf> {
    let primary = ResourceDir::enclosing(exe);
    if let Ok(dir) = &primary {
        if let Ok(path) = dir.resolve(entry) {
            return Ok(path);
        }
    }
    if let Some(extra) = std::env::var_os(EXTRA_DIRS_VAR) {
        for root in std::env::split_paths(&extra) {
            let path = root.join(entry);
            if path.symlink_metadata().is_ok() {
                return Ok(path);
            }
        }
    }
    match primary {
        Ok(dir) => dir.resolve(entry),
        Err(err) => Err(err),
    }
}

#[cfg(unix)]
fn copy_mode(src: &Path, dst: &Path) -> io::Result<()> {
    let perms = fs::metadata(src)?.permissions();
    fs::set_permissions(dst, perms)
}

#[cfg(not(unix))]
fn copy_mode(_src: &Path, _dst: &Path) -> io::Result<()> {
    Ok(())
}
