//! Launcher mode: the running binary is a wrapped executable.

use std::ffi::OsString;
use std::path::Path;

use anyhow::{Context, Result};
use kiln_env::ResolvedEnv;
use kiln_pack::{Launch, Manifest};
use tracing::debug;

/// Apply `manifest` and replace this process with the wrapped program.
pub fn run(exe: &Path, manifest: &Manifest, args: &[OsString]) -> Result<i32> {
    let launch = Launch::plan(exe, manifest, args, &ResolvedEnv::from_process())
        .with_context(|| format!("resolving wrapped program of {}", exe.display()))?;
    debug!(program = %launch.program.display(), "launching");
    let mut cmd = launch.command();

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let err = cmd.exec();
        Err(err).with_context(|| format!("executing {}", launch.program.display()))
    }
    #[cfg(not(unix))]
    {
        super::run_status(&mut cmd)
    }
}
