//! Turning a manifest into the command the launcher executes.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use kiln_env::{compose_over, EnvLayer, ResolvedEnv};

use crate::error::Result;
use crate::manifest::Manifest;
use crate::resources::locate;

/// A fully resolved invocation.
#[derive(Debug, Clone)]
pub struct Launch {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: ResolvedEnv,
}

impl Launch {
    /// Resolve `manifest` for the wrapper at `exe`, called with `argv`
    /// (without argv[0]) under the `ambient` environment.
    pub fn plan(exe: &Path, manifest: &Manifest, argv: &[OsString], ambient: &ResolvedEnv) -> Result<Self> {
        let program = locate(exe, &manifest.program)?;
        let mut library_dirs = Vec::with_capacity(manifest.library_paths.len());
        for entry in &manifest.library_paths {
            library_dirs.push(locate(exe, entry)?);
        }
        let joined = std::env::join_paths(&library_dirs)
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();

        let mut layers = vec![manifest.env.clone()];
        let mut args: Vec<OsString> = Vec::new();
        let target = match &manifest.interpreter {
            Some(interp) => {
                let loader = locate(exe, interp)?;
                if !joined.is_empty() {
                    args.push("--library-path".into());
                    args.push(joined.into());
                }
                args.push(program.into_os_string());
                loader
            }
            None => {
                if !joined.is_empty() {
                    layers.push(EnvLayer::new().prefix("LD_LIBRARY_PATH", joined, ":"));
                }
                program
            }
        };
        args.extend(manifest.args.iter().map(OsString::from));
        args.extend(argv.iter().cloned());

        Ok(Self {
            program: target,
            args,
            env: compose_over(ambient, &layers),
        })
    }

    /// The command to spawn or exec. The environment is replaced entirely.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).env_clear().envs(self.env.iter());
        cmd
    }
}
