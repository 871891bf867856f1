//! Direct binding: the process gets the orchestrator's own stdio.

use super::{alloc_error, Owner};
use crate::runtime::{Process, ProcessStdio};
use boxrun_shared::errors::BoxrunResult;
use std::os::fd::AsFd;

/// Host stdin/stdout/stderr handed straight to a detached process.
///
/// Nothing is retained on the launcher side; the process outlives the
/// orchestrator and keeps the streams.
#[derive(Debug)]
pub struct DirectBinding {
    owner: Owner,
}

impl DirectBinding {
    /// Re-own host stdio to the sandbox root and attach duplicates of it.
    pub fn attach(process: &mut Process, owner: Owner) -> BoxrunResult<Self> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();

        owner.chown(stdin.as_fd())?;
        owner.chown(stdout.as_fd())?;
        owner.chown(stderr.as_fd())?;

        let stdio = ProcessStdio {
            stdin: stdin
                .as_fd()
                .try_clone_to_owned()
                .map_err(|e| alloc_error("stdin dup", e))?,
            stdout: stdout
                .as_fd()
                .try_clone_to_owned()
                .map_err(|e| alloc_error("stdout dup", e))?,
            stderr: stderr
                .as_fd()
                .try_clone_to_owned()
                .map_err(|e| alloc_error("stderr dup", e))?,
        };
        process.set_stdio(stdio);

        Ok(Self { owner })
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }
}
