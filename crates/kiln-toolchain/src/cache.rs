//! Optional object cache for the compiler proxy.
//!
//! Only single-source `-c` compiles are cached. The key covers the compiler's
//! identity, the full argument list and the preprocessed source, so any
//! change to headers or macros produces a different key.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Result, ToolchainError};

/// Environment variable that enables the cache when the config does not.
pub const CACHE_ENV: &str = "KILN_CC_CACHE";

const SOURCE_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx", "c++", "C", "m", "mm"];

/// A compile the cache can handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheableCompile {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Arguments for a preprocess-only run writing to stdout.
    pub preprocess_args: Vec<String>,
}

impl CacheableCompile {
    /// Recognize a single-source compile to an object file.
    pub fn detect(args: &[String]) -> Option<Self> {
        if !args.iter().any(|a| a == "-c") {
            return None;
        }
        let mut sources = Vec::new();
        let mut output = None;
        let mut preprocess_args = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-c" => preprocess_args.push("-E".to_string()),
                "-o" => output = Some(PathBuf::from(iter.next()?)),
                // Dependency files and stdin input are side channels the
                // cache does not reproduce.
                "-" | "-MD" | "-MMD" | "-MF" | "-MT" | "-MQ" | "-save-temps" => return None,
                "-x" | "-I" | "-D" | "-U" | "-include" | "-isystem" | "-iquote" | "-idirafter" => {
                    preprocess_args.push(arg.clone());
                    preprocess_args.push(iter.next()?.clone());
                }
                a if a.starts_with("-o") => output = Some(PathBuf::from(&a[2..])),
                a if !a.starts_with('-') && is_source(a) => {
                    sources.push(PathBuf::from(a));
                    preprocess_args.push(arg.clone());
                }
                _ => preprocess_args.push(arg.clone()),
            }
        }
        if sources.len() != 1 {
            return None;
        }
        let source = sources.remove(0);
        let output = output.unwrap_or_else(|| {
            let stem = source.file_stem().unwrap_or_default();
            PathBuf::from(stem).with_extension("o")
        });
        Some(Self {
            source,
            output,
            preprocess_args,
        })
    }
}

fn is_source(arg: &str) -> bool {
    Path::new(arg)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e))
}

/// Objects stored by key under a directory.
#[derive(Debug, Clone)]
pub struct CompileCache {
    dir: PathBuf,
}

impl CompileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache key for a compile.
    pub fn key(compiler: &Path, args: &[String], preprocessed: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(compiler_identity(compiler).as_bytes());
        for arg in args {
            hasher.update((arg.len() as u64).to_le_bytes());
            hasher.update(arg.as_bytes());
        }
        hasher.update(preprocessed);
        hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
    }

    fn entry(&self, key: &str) -> PathBuf {
        self.dir.join(&key[..2]).join(format!("{key}.o"))
    }

    /// Copy a cached object to `output`; `false` on a miss.
    pub fn restore(&self, key: &str, output: &Path) -> Result<bool> {
        let entry = self.entry(key);
        if !entry.is_file() {
            return Ok(false);
        }
        fs::copy(&entry, output).map_err(ToolchainError::io(format!("restoring {}", output.display())))?;
        debug!(key, output = %output.display(), "compile cache hit");
        Ok(true)
    }

    /// Store a freshly compiled object.
    pub fn store(&self, key: &str, object: &Path) -> Result<()> {
        let entry = self.entry(key);
        let ctx = || format!("caching {}", object.display());
        if let Some(parent) = entry.parent() {
            fs::create_dir_all(parent).map_err(ToolchainError::io(ctx()))?;
        }
        let tmp = entry.with_extension(format!("tmp{}", std::process::id()));
        fs::copy(object, &tmp)
            .and_then(|_| fs::rename(&tmp, &entry))
            .map_err(ToolchainError::io(ctx()))?;
        Ok(())
    }
}

/// Path, size and modification time of the compiler binary.
fn compiler_identity(compiler: &Path) -> String {
    let real = compiler.canonicalize().unwrap_or_else(|_| compiler.to_path_buf());
    let meta = fs::metadata(&real).ok();
    let len = meta.as_ref().map_or(0, |m| m.len());
    let mtime = meta
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs());
    format!("{}:{len}:{mtime}", real.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn detects_single_source_compile() {
        let c = CacheableCompile::detect(&args(&["-O2", "-Iinclude", "-c", "src/zlib.c", "-o", "zlib.o"])).unwrap();
        assert_eq!(c.source, PathBuf::from("src/zlib.c"));
        assert_eq!(c.output, PathBuf::from("zlib.o"));
        assert_eq!(c.preprocess_args, args(&["-O2", "-Iinclude", "-E", "src/zlib.c"]));

        let c = CacheableCompile::detect(&args(&["-c", "main.cpp"])).unwrap();
        assert_eq!(c.output, PathBuf::from("main.o"));
    }

    #[test]
    fn rejects_links_and_dependency_output() {
        assert!(CacheableCompile::detect(&args(&["main.c", "-o", "main"])).is_none());
        assert!(CacheableCompile::detect(&args(&["-c", "a.c", "b.c"])).is_none());
        assert!(CacheableCompile::detect(&args(&["-MMD", "-c", "a.c"])).is_none());
    }

    #[test]
    fn store_then_restore() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path().join("cache"));
        let obj = dir.path().join("a.o");
        fs::write(&obj, b"object").unwrap();
        let key = CompileCache::key(&obj, &args(&["-c", "a.c"]), b"int x;");
        assert_ne!(key, CompileCache::key(&obj, &args(&["-c", "a.c"]), b"int y;"));

        let out = dir.path().join("restored.o");
        assert!(!cache.restore(&key, &out).unwrap());
        cache.store(&key, &obj).unwrap();
        assert!(cache.restore(&key, &out).unwrap());
        assert_eq!(fs::read(out).unwrap(), b"object");
    }
}
