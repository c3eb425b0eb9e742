//! kiln-proxy: the multi-call binary installed into proxied toolchains.
//!
//! The role is chosen by how the binary is reached:
//! - an executable with a pack trailer is a wrapped program and is launched;
//! - invoked as `cc`, `c++`, `ld` or `strip` (optionally `<target>-`
//!   prefixed) it proxies that tool;
//! - otherwise it is a small CLI for inspecting wrapped executables.

mod commands;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kiln_toolchain::ProxyConfig;
use tracing_subscriber::EnvFilter;

/// Variable holding the log filter; proxied tools stay quiet by default.
const LOG_ENV: &str = "KILN_LOG";

#[derive(Parser)]
#[command(name = "kiln-proxy", version, about = "Toolchain proxy and wrapped-executable launcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the manifest of a wrapped executable
    Inspect {
        /// Wrapped executable
        path: PathBuf,
    },
    /// Extract the program a wrapped executable runs
    Unwrap {
        /// Wrapped executable
        path: PathBuf,
        /// Where to write the program
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Describe the toolchain found on PATH
    Introspect {
        /// Triple the toolchain runs on
        #[arg(long)]
        host: Option<String>,
        /// Triple the toolchain emits code for
        #[arg(long)]
        target: Option<String>,
    },
}

/// The tool a proxy invocation stands in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Cc,
    Cxx,
    Ld,
    Strip,
}

impl Role {
    /// Role from an invocation name such as `aarch64-unknown-linux-gnu-cc`.
    fn from_name(name: &str) -> Option<Self> {
        [("c++", Role::Cxx), ("cc", Role::Cc), ("ld", Role::Ld), ("strip", Role::Strip)]
            .into_iter()
            .find(|(suffix, _)| name == *suffix || name.ends_with(&format!("-{suffix}")))
            .map(|(_, role)| role)
    }
}

fn main() {
    init_logging();
    let code = match run(std::env::args_os().collect()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("kiln-proxy: {e:#}");
            1
        }
    };
    process::exit(code);
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(argv: Vec<OsString>) -> Result<i32> {
    let exe = std::env::current_exe().context("locating the running executable")?;
    if let Some(manifest) = kiln_pack::read_manifest(&exe)? {
        return commands::launch::run(&exe, &manifest, argv.get(1..).unwrap_or_default());
    }

    let name = argv
        .first()
        .and_then(|arg0| Path::new(arg0).file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let Some(role) = Role::from_name(&name) else {
        return run_cli(Cli::parse_from(argv));
    };

    let config_path = ProxyConfig::locate(&exe)?;
    let config = ProxyConfig::load(&config_path)?;
    let args = utf8_args(argv.get(1..).unwrap_or_default())?;
    tracing::debug!(role = ?role, config = %config_path.display(), "proxy invocation");
    match role {
        Role::Cc => commands::compile::run(&config, false, &args),
        Role::Cxx => commands::compile::run(&config, true, &args),
        Role::Ld => commands::link::run(&config, &args),
        Role::Strip => commands::strip::run(&config, &args),
    }
}

fn run_cli(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Inspect { path } => commands::inspect::run(&path),
        Commands::Unwrap { path, output } => commands::inspect::unwrap(&path, &output),
        Commands::Introspect { host, target } => commands::inspect::introspect(host.as_deref(), target.as_deref()),
    }?;
    Ok(0)
}

fn utf8_args(args: &[OsString]) -> Result<Vec<String>> {
    args.iter()
        .map(|a| {
            a.to_str()
                .map(str::to_string)
                .with_context(|| format!("argument {a:?} is not valid UTF-8"))
        })
        .collect()
}
