//! Proxy roles and CLI command implementations.

pub mod compile;
pub mod inspect;
pub mod launch;
pub mod link;
pub mod strip;

use std::process::{Command, ExitStatus};

use anyhow::{Context, Result};

/// Run `cmd` to completion and return its exit code.
pub fn run_status(cmd: &mut Command) -> Result<i32> {
    let status = cmd
        .status()
        .with_context(|| format!("running {:?}", cmd.get_program()))?;
    Ok(exit_code(status))
}

/// Exit code of a finished child, `128 + signal` when it was killed.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
