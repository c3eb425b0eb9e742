//! The `cc` and `c++` proxies.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use kiln_toolchain::cache::CACHE_ENV;
use kiln_toolchain::{CacheableCompile, CompileCache, ProxyConfig};
use tracing::{debug, warn};

use super::{exit_code, run_status};

/// Run the real compiler with the flavor's arguments in front of `args`.
pub fn run(config: &ProxyConfig, cxx: bool, args: &[String]) -> Result<i32> {
    let strategy = config.flavor.strategy();
    let ctx = config.arg_context();
    let (compiler, mut full) = if cxx {
        (&config.cxx, strategy.cxx_args(&ctx))
    } else {
        (&config.cc, strategy.cc_args(&ctx))
    };
    full.extend(args.iter().cloned());
    debug!(compiler = %compiler.display(), args = ?full, "compile");

    if let Some(dir) = cache_dir(config, std::env::var_os(CACHE_ENV).map(PathBuf::from)) {
        if let Some(compile) = CacheableCompile::detect(&full) {
            return cached(&CompileCache::new(dir), compiler, &full, &compile);
        }
    }
    run_status(Command::new(compiler).args(&full))
}

/// The configured cache directory, or the one named by the environment.
fn cache_dir(config: &ProxyConfig, from_env: Option<PathBuf>) -> Option<PathBuf> {
    config
        .cc_cache
        .clone()
        .or_else(|| from_env.filter(|p| !p.as_os_str().is_empty()))
}

fn cached(cache: &CompileCache, compiler: &Path, args: &[String], compile: &CacheableCompile) -> Result<i32> {
    let pre = Command::new(compiler)
        .args(&compile.preprocess_args)
        .stderr(Stdio::null())
        .output()
        .with_context(|| format!("preprocessing {}", compile.source.display()))?;
    if !pre.status.success() {
        // Let the real compile report the error.
        return run_status(Command::new(compiler).args(args));
    }

    let key = CompileCache::key(compiler, args, &pre.stdout);
    if cache.restore(&key, &compile.output)? {
        return Ok(0);
    }
    let status = Command::new(compiler)
        .args(args)
        .status()
        .with_context(|| format!("running {}", compiler.display()))?;
    if status.success() {
        if let Err(err) = cache.store(&key, &compile.output) {
            warn!(error = %err, "not caching object");
        }
    }
    Ok(exit_code(status))
}
