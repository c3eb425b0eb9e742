//! Linker command lines and the shared libraries a link output needs.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::binary::{self, BinaryInfo};
use crate::error::Result;

/// Options whose value is the next argument and never an input file.
const TAKES_VALUE: &[&str] = &[
    "-m",
    "-dynamic-linker",
    "--dynamic-linker",
    "-z",
    "-soname",
    "-h",
    "-e",
    "--entry",
    "-T",
    "--script",
    "--version-script",
    "-Map",
    "-plugin",
    "-plugin-opt",
    "-u",
    "-y",
    "-l",
];

/// The parts of an `ld` command line that matter for relocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkInvocation {
    pub output: Option<PathBuf>,
    /// `-rpath` / `-R` directories, in order.
    pub rpaths: Vec<PathBuf>,
    /// `-L` directories, in order.
    pub lib_dirs: Vec<PathBuf>,
    /// Shared objects named directly as inputs.
    pub shared_inputs: Vec<PathBuf>,
    pub has_sysroot: bool,
    /// `-shared`, `-r` or `-static`: outputs that are not wrapped.
    pub not_executable: bool,
}

impl LinkInvocation {
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Self {
        let mut inv = LinkInvocation::default();
        let mut iter = args.iter().map(AsRef::as_ref);
        while let Some(arg) = iter.next() {
            match arg {
                "-o" => inv.output = iter.next().map(PathBuf::from),
                "-rpath" | "-R" | "--rpath" => {
                    if let Some(dir) = iter.next() {
                        inv.push_rpath(dir);
                    }
                }
                "-L" => {
                    if let Some(dir) = iter.next() {
                        inv.lib_dirs.push(PathBuf::from(dir));
                    }
                }
                "--sysroot" => {
                    inv.has_sysroot = true;
                    iter.next();
                }
                opt if TAKES_VALUE.contains(&opt) => {
                    iter.next();
                }
                "-shared" | "--shared" | "-Bshareable" | "-r" | "--relocatable" | "-static"
                | "-Bstatic" | "--static" | "-i" => {
                    // `-Bstatic` only switches library lookup mode mid-line; a
                    // fully static link is also marked by `-static`.
                    if arg != "-Bstatic" {
                        inv.not_executable = true;
                    }
                }
                _ => {
                    if let Some(out) = arg.strip_prefix("-o").filter(|s| !s.is_empty()) {
                        inv.output = Some(PathBuf::from(out));
                    } else if let Some(dir) = arg
                        .strip_prefix("-rpath=")
                        .or_else(|| arg.strip_prefix("--rpath="))
                    {
                        inv.push_rpath(dir);
                    } else if let Some(dir) = arg.strip_prefix("-L") {
                        inv.lib_dirs.push(PathBuf::from(dir));
                    } else if arg.starts_with("--sysroot=") {
                        inv.has_sysroot = true;
                    } else if !arg.starts_with('-') && is_shared_object_name(arg) {
                        inv.shared_inputs.push(PathBuf::from(arg));
                    }
                }
            }
        }
        inv
    }

    fn push_rpath(&mut self, value: &str) {
        self.rpaths
            .extend(value.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
    }

    /// Output path, defaulting to `a.out` like `ld` does.
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| PathBuf::from("a.out"))
    }

    /// Directories searched for `DT_NEEDED` entries before any library's own
    /// run paths: rpaths, `-L` directories, then directories of shared
    /// objects named on the command line.
    pub fn search_dirs(&self, cwd: &Path) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        let abs = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { cwd.join(p) };
        for dir in self.rpaths.iter().chain(&self.lib_dirs) {
            push_unique(&mut dirs, abs(dir));
        }
        for input in &self.shared_inputs {
            if let Some(parent) = abs(input).parent() {
                push_unique(&mut dirs, parent.to_path_buf());
            }
        }
        dirs
    }
}

fn is_shared_object_name(arg: &str) -> bool {
    let name = arg.rsplit('/').next().unwrap_or(arg);
    name.ends_with(".so") || name.contains(".so.")
}

fn push_unique(dirs: &mut Vec<PathBuf>, dir: PathBuf) {
    if !dirs.contains(&dir) {
        dirs.push(dir);
    }
}

/// Libraries a dynamically linked output needs at run time.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Found libraries, with symlinks resolved, in discovery order.
    pub libraries: Vec<PathBuf>,
    pub interpreter: Option<PathBuf>,
    /// `DT_NEEDED` names no directory provided.
    pub unresolved: Vec<String>,
}

/// Walk `DT_NEEDED` entries of `output` transitively.
///
/// Each library is searched in `dirs` and then in the run paths of the
/// object that needs it (`$ORIGIN` expanded); `fallback_dirs` (sysroot
/// library directories) are searched last. The interpreter is looked up by
/// file name in the same directories.
pub fn resolve_needed(output: &Path, dirs: &[PathBuf], fallback_dirs: &[PathBuf]) -> Result<Resolution> {
    let info = binary::inspect(output)?;
    let mut resolution = Resolution::default();

    if let Some(interp) = &info.interpreter {
        let name = Path::new(interp).file_name().map(|n| n.to_owned());
        resolution.interpreter = name
            .and_then(|n| {
                dirs.iter()
                    .chain(fallback_dirs)
                    .map(|d| d.join(&n))
                    .find(|p| p.exists())
            })
            .or_else(|| Some(PathBuf::from(interp)).filter(|p| p.exists()))
            .map(|p| p.canonicalize().unwrap_or(p));
    }

    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<(String, Vec<PathBuf>)> = VecDeque::new();
    let origin_paths = expand_origin(&info, output);
    for name in &info.needed {
        queue.push_back((name.clone(), origin_paths.clone()));
    }

    while let Some((name, own_paths)) = queue.pop_front() {
        if !seen.insert(name.clone()) {
            continue;
        }
        let found = dirs
            .iter()
            .chain(&own_paths)
            .chain(fallback_dirs)
            .map(|d| d.join(&name))
            .find(|p| p.is_file());
        let Some(path) = found else {
            warn!(library = %name, "needed library not found; leaving it to the system loader");
            resolution.unresolved.push(name);
            continue;
        };
        let real = path.canonicalize().unwrap_or(path);
        debug!(library = %name, path = %real.display(), "resolved");

        match binary::inspect(&real) {
            Ok(lib_info) => {
                let lib_paths = expand_origin(&lib_info, &real);
                for dep in &lib_info.needed {
                    queue.push_back((dep.clone(), lib_paths.clone()));
                }
            }
            Err(err) => debug!(library = %name, error = %err, "cannot inspect library"),
        }
        resolution.libraries.push(real);
    }
    Ok(resolution)
}

fn expand_origin(info: &BinaryInfo, object: &Path) -> Vec<PathBuf> {
    let origin = object.parent().unwrap_or(Path::new("/"));
    info.search_paths
        .iter()
        .map(|p| {
            let expanded = p
                .replace("${ORIGIN}", &origin.to_string_lossy())
                .replace("$ORIGIN", &origin.to_string_lossy());
            PathBuf::from(expanded)
        })
        .collect()
}
