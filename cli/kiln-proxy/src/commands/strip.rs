//! The `strip` proxy.
//!
//! Plain files are handed to the real `strip`. Wrapped executables are
//! stripped through [`kiln_pack::rewrap`], which strips the inner program
//! and reattaches the manifest.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use kiln_pack::{is_wrapped, rewrap, rewrap_to, PackError};
use kiln_toolchain::ProxyConfig;
use tracing::debug;

use super::{exit_code, run_status};

/// Options whose value is the following argument.
const TAKES_VALUE: &[&str] = &["-o", "-R", "-K", "-N", "-F", "-I", "-O", "--target", "--input-target", "--output-target"];

/// A `strip` command line split into options and files.
#[derive(Debug, Default, PartialEq, Eq)]
struct StripArgs {
    options: Vec<String>,
    output: Option<PathBuf>,
    files: Vec<PathBuf>,
}

impl StripArgs {
    fn parse(args: &[String]) -> Self {
        let mut parsed = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "-o" {
                parsed.output = iter.next().map(PathBuf::from);
            } else if TAKES_VALUE.contains(&arg.as_str()) {
                parsed.options.push(arg.clone());
                if let Some(value) = iter.next() {
                    parsed.options.push(value.clone());
                }
            } else if arg.starts_with('-') {
                parsed.options.push(arg.clone());
            } else {
                parsed.files.push(PathBuf::from(arg));
            }
        }
        parsed
    }
}

pub fn run(config: &ProxyConfig, args: &[String]) -> Result<i32> {
    let strip = config
        .strip
        .as_deref()
        .context("this toolchain has no strip")?;
    let parsed = StripArgs::parse(args);
    if parsed.output.is_some() && parsed.files.len() != 1 {
        bail!("strip -o takes exactly one input file");
    }

    let (wrapped, plain): (Vec<&PathBuf>, Vec<&PathBuf>) = parsed.files.iter().partition(|f| is_wrapped(f));
    if wrapped.is_empty() {
        return run_status(Command::new(strip).args(args));
    }

    if !plain.is_empty() {
        let code = run_status(Command::new(strip).args(&parsed.options).args(&plain))?;
        if code != 0 {
            return Ok(code);
        }
    }
    for file in wrapped {
        let mut edit = |inner: &Path| strip_inner(strip, &parsed.options, inner);
        let stripped = match &parsed.output {
            Some(out) => {
                debug!(file = %file.display(), out = %out.display(), "stripping wrapped executable");
                rewrap_to(file, out, &mut edit)
            }
            None => {
                debug!(file = %file.display(), "stripping wrapped executable");
                rewrap(file, &mut edit)
            }
        };
        stripped.with_context(|| format!("stripping {}", file.display()))?;
    }
    Ok(0)
}

fn strip_inner(strip: &Path, options: &[String], inner: &Path) -> kiln_pack::Result<()> {
    let status = Command::new(strip)
        .args(options)
        .arg(inner)
        .status()
        .map_err(|source| PackError::Io {
            context: format!("running {}", strip.display()),
            source,
        })?;
    if status.success() {
        return Ok(());
    }
    Err(PackError::Io {
        context: format!("stripping {}", inner.display()),
        source: io::Error::other(format!("{} exited with {}", strip.display(), exit_code(status))),
    })
}
