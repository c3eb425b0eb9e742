//! Checksum-verified source retrieval.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::FetchError;

/// Obtains source archives.
pub trait Fetcher: Send + Sync {
    /// Place the file named by `url` into `dest`, verifying its SHA-256.
    /// Returns the path of the written file.
    fn fetch(&self, url: &str, sha256: &str, dest: &Path) -> Result<PathBuf, FetchError>;
}

/// Serves `file://` URLs and files found by name in mirror directories.
#[derive(Debug, Clone, Default)]
pub struct LocalFetcher {
    mirrors: Vec<PathBuf>,
}

impl LocalFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mirror(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mirrors.push(dir.into());
        self
    }

    fn locate(&self, url: &str) -> Option<PathBuf> {
        if let Some(path) = url.strip_prefix("file://") {
            let path = PathBuf::from(path);
            return path.is_file().then_some(path);
        }
        let name = file_name(url);
        self.mirrors
            .iter()
            .map(|m| m.join(name))
            .find(|candidate| candidate.is_file())
    }
}

/// Last path component of a URL.
pub fn file_name(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').next().unwrap_or(url)
}

/// Lowercase hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl Fetcher for LocalFetcher {
    fn fetch(&self, url: &str, sha256: &str, dest: &Path) -> Result<PathBuf, FetchError> {
        let source = self.locate(url).ok_or_else(|| FetchError::NotFound {
            url: url.to_string(),
        })?;
        debug!(url, source = %source.display(), "fetching from mirror");

        let io_err = |source| FetchError::Io {
            url: url.to_string(),
            source,
        };
        let bytes = fs::read(&source).map_err(io_err)?;
        let actual = sha256_hex(&bytes);
        if !actual.eq_ignore_ascii_case(sha256) {
            return Err(FetchError::ChecksumMismatch {
                url: url.to_string(),
                expected: sha256.to_ascii_lowercase(),
                actual,
            });
        }

        fs::create_dir_all(dest).map_err(io_err)?;
        let out = dest.join(file_name(url));
        fs::write(&out, &bytes).map_err(io_err)?;
        info!(url, bytes = bytes.len(), "fetched");
        Ok(out)
    }
}
