//! The manifest attached to a wrapped executable, and its on-disk trailer.
//!
//! Layout of a wrapped executable:
//!
//! ```text
//! [launcher bytes][manifest JSON][manifest length: u64 LE][b"KILNPACK"]
//! ```
//!
//! The launcher is an ordinary executable; loaders ignore the trailing bytes.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use kiln_env::EnvLayer;
use serde::{Deserialize, Serialize};

use crate::error::{PackError, Result};

pub const TRAILER_MAGIC: &[u8; 8] = b"KILNPACK";
const TRAILER_LEN: u64 = 16;
/// Manifests are small; anything larger is treated as corruption.
const MAX_MANIFEST_LEN: u64 = 16 * 1024 * 1024;

/// What the launcher applies before running the real program.
///
/// Paths are relative to the resource directory enclosing the wrapper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    /// The wrapped program.
    pub program: String,
    /// Dynamic loader to run the program through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    /// Directories handed to the loader as its library path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub library_paths: Vec<String>,
    /// Arguments inserted before the caller's arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment mutations composed over the caller's environment.
    #[serde(default, skip_serializing_if = "EnvLayer::is_empty")]
    pub env: EnvLayer,
}

impl Manifest {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Encode this manifest as a trailer to append after launcher bytes.
    pub fn to_trailer(&self) -> Vec<u8> {
        // Plain strings and maps; serialization cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        let mut out = Vec::with_capacity(json.len() + TRAILER_LEN as usize);
        out.extend_from_slice(&json);
        out.extend_from_slice(&(json.len() as u64).to_le_bytes());
        out.extend_from_slice(TRAILER_MAGIC);
        out
    }
}

/// Locate the trailer of `bytes`, returning the launcher prefix and manifest.
pub fn split(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let len = bytes.len() as u64;
    if len < TRAILER_LEN || &bytes[bytes.len() - 8..] != TRAILER_MAGIC {
        return None;
    }
    let size_at = bytes.len() - TRAILER_LEN as usize;
    let size = u64::from_le_bytes(bytes[size_at..size_at + 8].try_into().ok()?);
    if size > len - TRAILER_LEN {
        return None;
    }
    let json_at = size_at - size as usize;
    Some((&bytes[..json_at], &bytes[json_at..size_at]))
}

/// Read the manifest of a wrapped executable without loading the launcher.
///
/// Returns `Ok(None)` for files without a trailer.
pub fn read_manifest(path: &Path) -> Result<Option<Manifest>> {
    let ctx = || format!("reading {}", path.display());
    let mut file = File::open(path).map_err(PackError::io(ctx()))?;
    let len = file.metadata().map_err(PackError::io(ctx()))?.len();
    if len < TRAILER_LEN {
        return Ok(None);
    }

    let mut tail = [0u8; TRAILER_LEN as usize];
    file.seek(SeekFrom::End(-(TRAILER_LEN as i64)))
        .and_then(|_| file.read_exact(&mut tail))
        .map_err(PackError::io(ctx()))?;
    if &tail[8..] != TRAILER_MAGIC {
        return Ok(None);
    }

    let mut size_bytes = [0u8; 8];
    size_bytes.copy_from_slice(&tail[..8]);
    let size = u64::from_le_bytes(size_bytes);
    if size > len - TRAILER_LEN || size > MAX_MANIFEST_LEN {
        return Err(PackError::CorruptManifest {
            path: path.to_path_buf(),
            reason: format!("manifest length {size} exceeds file size"),
        });
    }

    let mut json = vec![0u8; size as usize];
    file.seek(SeekFrom::Start(len - TRAILER_LEN - size))
        .and_then(|_| file.read_exact(&mut json))
        .map_err(PackError::io(ctx()))?;
    serde_json::from_slice(&json)
        .map(Some)
        .map_err(|err| PackError::CorruptManifest {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
}

/// Whether `path` is a wrapped executable.
pub fn is_wrapped(path: &Path) -> bool {
    matches!(read_manifest(path), Ok(Some(_)))
}
