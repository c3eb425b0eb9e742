//! Content-addressed artifact storage.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::node::NodeId;

/// An output directory under construction.
///
/// Dropping a staging area without committing it discards everything that
/// was written, so interrupted steps never become visible.
#[derive(Debug)]
pub struct Staging {
    id: NodeId,
    dir: TempDir,
    out: PathBuf,
}

impl Staging {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Directory the step writes its output into.
    pub fn out(&self) -> &Path {
        &self.out
    }

    /// Scratch directory next to the output, removed with the staging area.
    pub fn scratch(&self) -> PathBuf {
        self.dir.path().join("work")
    }
}

/// Immutable content-addressed artifacts.
pub trait ArtifactStore: Send + Sync {
    /// Path of a committed artifact.
    fn lookup(&self, id: &NodeId) -> Option<PathBuf>;

    /// Open a fresh staging area for `id`.
    fn stage(&self, id: &NodeId) -> Result<Staging>;

    /// Publish a staging area. If another writer committed the same id first,
    /// its artifact is kept and the staged copy is discarded.
    fn commit(&self, staging: Staging) -> Result<PathBuf>;

    /// Path of a committed artifact, failing when it is absent.
    fn require(&self, id: &NodeId) -> Result<PathBuf> {
        self.lookup(id).ok_or(GraphError::UnknownNode(*id))
    }

    /// An entry inside a committed artifact.
    fn get(&self, id: &NodeId, path: &str) -> Result<PathBuf> {
        let root = self.require(id)?;
        let entry = root.join(path.trim_start_matches('/'));
        if entry.symlink_metadata().is_err() {
            return Err(GraphError::MissingPath {
                node: *id,
                path: path.to_string(),
            });
        }
        Ok(entry)
    }

    fn bytes(&self, id: &NodeId, path: &str) -> Result<Vec<u8>> {
        let entry = self.get(id, path)?;
        fs::read(&entry).map_err(GraphError::io(format!("reading {}", entry.display())))
    }

    fn text(&self, id: &NodeId, path: &str) -> Result<String> {
        let entry = self.get(id, path)?;
        fs::read_to_string(&entry).map_err(GraphError::io(format!("reading {}", entry.display())))
    }
}

/// Store rooted in a local directory: `<root>/artifacts/<sha256>`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for sub in ["artifacts", "staging"] {
            let dir = root.join(sub);
            fs::create_dir_all(&dir).map_err(GraphError::io(format!("creating {}", dir.display())))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_path(&self, id: &NodeId) -> PathBuf {
        self.root.join("artifacts").join(id.to_hex())
    }
}

impl ArtifactStore for LocalStore {
    fn lookup(&self, id: &NodeId) -> Option<PathBuf> {
        let path = self.artifact_path(id);
        path.symlink_metadata().is_ok().then_some(path)
    }

    fn stage(&self, id: &NodeId) -> Result<Staging> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", id.short()))
            .tempdir_in(self.root.join("staging"))
            .map_err(GraphError::io("creating staging directory"))?;
        let out = dir.path().join("out");
        fs::create_dir_all(&out).map_err(GraphError::io("creating staging output"))?;
        fs::create_dir_all(dir.path().join("work"))
            .map_err(GraphError::io("creating staging scratch"))?;
        Ok(Staging { id: *id, dir, out })
    }

    fn commit(&self, staging: Staging) -> Result<PathBuf> {
        let dest = self.artifact_path(&staging.id);
        if dest.symlink_metadata().is_ok() {
            debug!(node = %staging.id.short(), "artifact already committed, discarding staged copy");
            return Ok(dest);
        }
        match fs::rename(&staging.out, &dest) {
            Ok(()) => Ok(dest),
            Err(_) if dest.symlink_metadata().is_ok() => Ok(dest),
            Err(err) => Err(GraphError::Io {
                context: format!("committing artifact {}", staging.id),
                source: err,
            }),
        }
    }
}
