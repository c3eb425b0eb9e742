//! Wrapping, unwrapping and re-wrapping executables.

use std::fs;
use std::path::{Path, PathBuf};

use kiln_env::EnvLayer;
use tracing::{debug, info};

use crate::error::{PackError, Result};
use crate::manifest::{self, Manifest};
use crate::resources::{ResourceDir, ResourceKind};

/// Runtime requirements recorded for a wrapped program.
#[derive(Debug, Clone, Default)]
pub struct WrapOptions {
    /// Dynamic loader to bundle and run the program through.
    pub interpreter: Option<PathBuf>,
    /// Shared objects to bundle; their directories form the library path.
    pub libraries: Vec<PathBuf>,
    pub args: Vec<String>,
    pub env: EnvLayer,
}

/// Attaches and removes manifests.
pub trait WrappingService {
    /// Wrap `program` into a relocatable executable at `out`.
    fn wrap(&self, program: &Path, options: &WrapOptions, out: &Path) -> Result<Manifest>;

    /// Write the program wrapped by `wrapped` to `out`.
    fn unwrap(&self, wrapped: &Path, out: &Path) -> Result<Manifest>;
}

/// Wrapping service that prepends a launcher executable and stores programs
/// and libraries in a resource directory.
#[derive(Debug, Clone)]
pub struct PackWrapper {
    launcher: PathBuf,
    resource_dir: Option<PathBuf>,
}

impl PackWrapper {
    /// `launcher` is the executable copied in front of every manifest.
    pub fn new(launcher: impl Into<PathBuf>) -> Self {
        Self {
            launcher: launcher.into(),
            resource_dir: None,
        }
    }

    /// Store resources in `dir` instead of next to each output.
    pub fn with_resource_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resource_dir = Some(dir.into());
        self
    }

    fn resources_for(&self, out: &Path) -> Result<ResourceDir> {
        match &self.resource_dir {
            Some(dir) => ResourceDir::create(dir),
            None => ResourceDir::beside(out),
        }
    }

    fn launcher_bytes(&self) -> Result<Vec<u8>> {
        let bytes = fs::read(&self.launcher)
            .map_err(PackError::io(format!("reading launcher {}", self.launcher.display())))?;
        // A launcher that is itself wrapped contributes only its own code.
        Ok(match manifest::split(&bytes) {
            Some((launcher, _)) => launcher.to_vec(),
            None => bytes,
        })
    }
}

impl WrappingService for PackWrapper {
    fn wrap(&self, program: &Path, options: &WrapOptions, out: &Path) -> Result<Manifest> {
        let resources = self.resources_for(out)?;
        let name = file_name(program);

        let mut manifest = Manifest::new(resources.add(ResourceKind::Bin, program, &name)?);
        if let Some(interp) = &options.interpreter {
            manifest.interpreter = Some(resources.add(ResourceKind::Lib, interp, &file_name(interp))?);
        }
        for lib in &options.libraries {
            let entry = resources.add(ResourceKind::Lib, lib, &file_name(lib))?;
            let dir = ResourceDir::entry_dir(&entry);
            if !manifest.library_paths.contains(&dir) {
                manifest.library_paths.push(dir);
            }
        }
        manifest.args = options.args.clone();
        manifest.env = options.env.clone();

        write_pack(&self.launcher_bytes()?, &manifest, out)?;
        info!(
            program = %program.display(),
            out = %out.display(),
            libraries = manifest.library_paths.len(),
            "wrapped executable"
        );
        Ok(manifest)
    }

    fn unwrap(&self, wrapped: &Path, out: &Path) -> Result<Manifest> {
        let manifest = manifest::read_manifest(wrapped)?.ok_or_else(|| PackError::NotWrapped {
            path: wrapped.to_path_buf(),
        })?;
        let program = crate::resources::locate(wrapped, &manifest.program)?;
        fs::copy(&program, out)
            .map_err(PackError::io(format!("copying {} to {}", program.display(), out.display())))?;
        Ok(manifest)
    }
}

/// Apply `edit` to the innermost program of `wrapped` and reattach every
/// manifest around it. Used by the strip proxy so stripping never loses the
/// manifest. Returns the outermost manifest.
pub fn rewrap(wrapped: &Path, edit: &mut dyn FnMut(&Path) -> Result<()>) -> Result<Manifest> {
    let resources = ResourceDir::enclosing(wrapped)?;
    rewrap_in(wrapped, wrapped, &resources, &resources, edit)
}

/// [`rewrap`] that leaves `wrapped` alone and writes the result to `out`.
///
/// Resources are read from the directory enclosing `wrapped` and every
/// entry the result needs is stored in the one enclosing `out` (created
/// next to `out` when there is none).
pub fn rewrap_to(wrapped: &Path, out: &Path, edit: &mut dyn FnMut(&Path) -> Result<()>) -> Result<Manifest> {
    let from = ResourceDir::enclosing(wrapped)?;
    let to = match ResourceDir::enclosing(out) {
        Ok(dir) => dir,
        Err(PackError::NoResourceDir { .. }) => ResourceDir::beside(out)?,
        Err(err) => return Err(err),
    };
    rewrap_in(wrapped, out, &from, &to, edit)
}

fn rewrap_in(
    wrapped: &Path,
    out: &Path,
    from: &ResourceDir,
    to: &ResourceDir,
    edit: &mut dyn FnMut(&Path) -> Result<()>,
) -> Result<Manifest> {
    let bytes = fs::read(wrapped).map_err(PackError::io(format!("reading {}", wrapped.display())))?;
    let (launcher, json) = manifest::split(&bytes).ok_or_else(|| PackError::NotWrapped {
        path: wrapped.to_path_buf(),
    })?;
    let mut manifest: Manifest =
        serde_json::from_slice(json).map_err(|err| PackError::CorruptManifest {
            path: wrapped.to_path_buf(),
            reason: err.to_string(),
        })?;

    let program = from.resolve(&manifest.program)?;
    let name = file_name(&program);
    let scratch = tempfile::tempdir().map_err(PackError::io("creating scratch directory"))?;
    let inner = scratch.path().join(&name);
    fs::copy(&program, &inner)
        .and_then(|_| make_writable(&inner))
        .map_err(PackError::io(format!("copying {}", program.display())))?;

    if manifest::is_wrapped(&inner) {
        debug!(program = %manifest.program, "descending into nested wrapper");
        rewrap_in(&inner, &inner, from, to, edit)?;
    } else {
        edit(&inner)?;
    }

    if from.root() != to.root() {
        for entry in manifest.interpreter.iter().chain(&manifest.library_paths) {
            to.import(from, entry)?;
        }
    }
    manifest.program = to.add(ResourceKind::Bin, &inner, &name)?;
    write_pack(launcher, &manifest, out)?;
    Ok(manifest)
}

/// Write `launcher` plus the manifest trailer to `out` atomically.
fn write_pack(launcher: &[u8], manifest: &Manifest, out: &Path) -> Result<()> {
    let mut bytes = Vec::with_capacity(launcher.len() + 512);
    bytes.extend_from_slice(launcher);
    bytes.extend(manifest.to_trailer());

    let tmp = tmp_sibling(out);
    let ctx = || format!("writing {}", out.display());
    fs::write(&tmp, &bytes).map_err(PackError::io(ctx()))?;
    set_executable(&tmp).map_err(PackError::io(ctx()))?;
    fs::rename(&tmp, out).map_err(PackError::io(ctx()))?;
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".kiln-pack-tmp");
    path.with_file_name(name)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "program".to_string())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn make_writable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o200);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_writable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
