//! Post-build fixes applied as graph transforms.
//!
//! Each transform works on a private copy of its input artifact, so a fix
//! always yields a new artifact layered on the unmodified original.

use std::fs;
use std::path::{Path, PathBuf};

use kiln_graph::{fsutil, ArtifactTransform, GraphError, TransformContext, TransformRegistry};
use kiln_toolchain::binary::is_elf;
use kiln_toolchain::ProxyToolchain;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

pub const FIX_LINKER_SCRIPTS: &str = "fix-linker-scripts";
pub const MERGE_LIB64: &str = "merge-lib64";
pub const SYMLINK: &str = "symlink";

/// Library names that glibc installs as linker scripts.
const SCRIPT_LIBRARIES: [&str; 2] = ["libc.so", "libm.so"];

/// Registry holding every transform the bootstrap graphs use.
pub fn default_registry() -> TransformRegistry {
    let mut registry = TransformRegistry::new();
    registry.register(Box::new(FixLinkerScripts));
    registry.register(Box::new(MergeLib64));
    registry.register(Box::new(Symlink));
    registry.register(Box::new(ProxyToolchain));
    registry
}

/// Prefix absolute paths inside `GROUP ( ... )` with `=` so that
/// `ld --sysroot` resolves them inside the sysroot.
#[derive(Debug, Default)]
pub struct FixLinkerScripts;

impl ArtifactTransform for FixLinkerScripts {
    fn name(&self) -> &str {
        FIX_LINKER_SCRIPTS
    }

    fn apply(&self, root: &Path, _: &serde_json::Value, _: &TransformContext<'_>) -> Result<(), GraphError> {
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| GraphError::transform(FIX_LINKER_SCRIPTS, e))?;
            let is_candidate = entry.file_type().is_file()
                && SCRIPT_LIBRARIES.iter().any(|name| entry.file_name() == *name);
            if !is_candidate {
                continue;
            }
            let path = entry.path();
            let bytes = fs::read(path).map_err(GraphError::io(format!("reading {}", path.display())))?;
            if is_elf(&bytes) {
                continue;
            }
            let Ok(text) = String::from_utf8(bytes) else {
                continue;
            };
            if let Some(fixed) = fix_group(&text) {
                debug!(script = %path.display(), "prefixing GROUP paths with '='");
                fs::write(path, fixed).map_err(GraphError::io(format!("writing {}", path.display())))?;
            }
        }
        Ok(())
    }
}

/// Rewrite the `GROUP` directive of a linker script, or `None` when the
/// script has no `GROUP` or nothing to change.
pub fn fix_group(script: &str) -> Option<String> {
    let start = script.find("GROUP")?;
    let open = start + script[start..].find('(')?;
    let mut depth = 0usize;
    let mut close = None;
    for (i, c) in script[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(open + i);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close?;

    let mut out = String::with_capacity(script.len() + 8);
    out.push_str(&script[..open]);
    let mut previous = ' ';
    let mut changed = false;
    for c in script[open..close].chars() {
        if c == '/' && (previous.is_whitespace() || previous == '(') {
            out.push('=');
            changed = true;
        }
        out.push(c);
        previous = c;
    }
    out.push_str(&script[close..]);
    changed.then_some(out)
}

/// Fold every real `lib64` directory into its sibling `lib` and leave a
/// `lib64 -> lib` symlink behind.
#[derive(Debug, Default)]
pub struct MergeLib64;

impl ArtifactTransform for MergeLib64 {
    fn name(&self) -> &str {
        MERGE_LIB64
    }

    fn apply(&self, root: &Path, _: &serde_json::Value, _: &TransformContext<'_>) -> Result<(), GraphError> {
        let dirs: Vec<PathBuf> = WalkDir::new(root)
            .max_depth(4)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir() && e.file_name() == "lib64")
            .map(|e| e.into_path())
            .collect();

        for lib64 in dirs {
            let lib = lib64.with_file_name("lib");
            let ctx = || format!("merging {}", lib64.display());
            if lib.symlink_metadata().is_err() {
                fs::rename(&lib64, &lib).map_err(GraphError::io(ctx()))?;
            } else {
                fsutil::copy_tree(&lib64, &lib)
                    .and_then(|()| fs::remove_dir_all(&lib64))
                    .map_err(GraphError::io(ctx()))?;
            }
            fsutil::symlink(Path::new("lib"), &lib64).map_err(GraphError::io(ctx()))?;
            debug!(dir = %lib64.display(), "merged lib64 into lib");
        }
        Ok(())
    }
}

/// A symlink to create, relative to the artifact root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    /// Where the link is created.
    pub path: String,
    /// Link contents, resolved relative to the link's directory.
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkParams {
    pub links: Vec<LinkSpec>,
}

/// Create symlinks whose targets must already exist.
#[derive(Debug, Default)]
pub struct Symlink;

impl ArtifactTransform for Symlink {
    fn name(&self) -> &str {
        SYMLINK
    }

    fn apply(&self, root: &Path, params: &serde_json::Value, _: &TransformContext<'_>) -> Result<(), GraphError> {
        let params: SymlinkParams =
            serde_json::from_value(params.clone()).map_err(|e| GraphError::transform(SYMLINK, e))?;
        for spec in &params.links {
            let link = root.join(&spec.path);
            let dir = link.parent().unwrap_or(root);
            if !dir.join(&spec.target).exists() {
                return Err(GraphError::transform(
                    SYMLINK,
                    format!("{} would point to missing {}", spec.path, spec.target),
                ));
            }
            if link.symlink_metadata().is_ok() {
                fs::remove_file(&link).map_err(GraphError::io(format!("replacing {}", spec.path)))?;
            }
            fsutil::symlink(Path::new(&spec.target), &link)
                .map_err(GraphError::io(format!("linking {}", spec.path)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_graph::{CancelToken, LocalExecutor};

    fn apply(transform: &dyn ArtifactTransform, root: &Path, params: serde_json::Value) -> Result<(), GraphError> {
        let exec = LocalExecutor;
        let cancel = CancelToken::new();
        let scratch = root.join(".scratch");
        let ctx = TransformContext {
            executor: &exec,
            cancel: &cancel,
            scratch: &scratch,
        };
        transform.apply(root, &params, &ctx)
    }

    const GLIBC_LIBC_SO: &str = "/* GNU ld script */\nOUTPUT_FORMAT(elf64-x86-64)\nGROUP ( /lib/libc.so.6 /lib/libc_nonshared.a  AS_NEEDED ( /lib/ld-linux-x86-64.so.2 ) )\n";

    #[test]
    fn group_paths_get_sysroot_prefix() {
        let fixed = fix_group(GLIBC_LIBC_SO).unwrap();
        assert!(fixed.contains(
            "GROUP ( =/lib/libc.so.6 =/lib/libc_nonshared.a  AS_NEEDED ( =/lib/ld-linux-x86-64.so.2 ) )"
        ));
        assert!(fixed.starts_with("/* GNU ld script */"));
        // Already fixed scripts are left alone.
        assert_eq!(fix_group(&fixed), None);
        assert_eq!(fix_group("INPUT ( /lib/libfoo.so )"), None);
    }

    #[test]
    fn rewrites_scripts_but_not_elf_objects() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib");
        fs::create_dir_all(&lib).unwrap();
        fs::write(lib.join("libc.so"), GLIBC_LIBC_SO).unwrap();
        let elf = b"\x7fELF\x02\x01\x01\0GROUP ( /lib/x )".to_vec();
        fs::write(lib.join("libm.so"), &elf).unwrap();
        fs::write(lib.join("libz.so"), "GROUP ( /lib/libz.so.1 )").unwrap();

        apply(&FixLinkerScripts, dir.path(), serde_json::Value::Null).unwrap();
        assert!(fs::read_to_string(lib.join("libc.so")).unwrap().contains("=/lib/libc.so.6"));
        assert_eq!(fs::read(lib.join("libm.so")).unwrap(), elf);
        assert_eq!(fs::read_to_string(lib.join("libz.so")).unwrap(), "GROUP ( /lib/libz.so.1 )");
    }

    #[test]
    fn script_without_group_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("libc.so"), "INPUT(-lc_real)\n").unwrap();
        apply(&FixLinkerScripts, dir.path(), serde_json::Value::Null).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("libc.so")).unwrap(), "INPUT(-lc_real)\n");
    }

    #[cfg(unix)]
    #[test]
    fn lib64_is_folded_into_lib() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("lib/gcc")).unwrap();
        fs::create_dir_all(root.join("lib64")).unwrap();
        fs::write(root.join("lib64/libstdc++.so.6"), "so").unwrap();
        fs::create_dir_all(root.join("x86_64-unknown-linux-gnu/lib64")).unwrap();
        fs::write(root.join("x86_64-unknown-linux-gnu/lib64/libgcc_s.so.1"), "so").unwrap();

        apply(&MergeLib64, root, serde_json::Value::Null).unwrap();
        assert!(root.join("lib/libstdc++.so.6").is_file());
        assert!(root.join("lib/gcc").is_dir());
        assert_eq!(fs::read_link(root.join("lib64")).unwrap(), Path::new("lib"));
        assert!(root.join("x86_64-unknown-linux-gnu/lib/libgcc_s.so.1").is_file());
        assert!(root.join("x86_64-unknown-linux-gnu/lib64/libgcc_s.so.1").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_require_existing_targets() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin/gcc"), "").unwrap();
        let params = serde_json::json!({ "links": [{ "path": "bin/cc", "target": "gcc" }] });
        apply(&Symlink, dir.path(), params).unwrap();
        assert_eq!(fs::read_link(dir.path().join("bin/cc")).unwrap(), Path::new("gcc"));

        let missing = serde_json::json!({ "links": [{ "path": "bin/c++", "target": "g++" }] });
        assert!(matches!(
            apply(&Symlink, dir.path(), missing),
            Err(GraphError::Transform { .. })
        ));
    }

    #[test]
    fn registry_knows_every_transform() {
        let registry = default_registry();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, ["fix-linker-scripts", "merge-lib64", "proxy-toolchain", "symlink"]);
    }
}
