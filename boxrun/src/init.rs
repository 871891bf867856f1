//! In-sandbox init mode.
//!
//! The binary re-executed as the sandbox's first process runs the real
//! workload as a child, relays signals to it and exits with its status.
//! Like any init it also reaps orphans re-parented to it.

use crate::signals::SignalForwarder;
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use std::process::{Command, Stdio};

/// Run `args` as a child with inherited stdio and forward signals to it.
///
/// Returns the child's exit code (128 + N for death by signal N). Every
/// other child, including orphaned grandchildren, is reaped meanwhile.
pub async fn run(args: &[String]) -> BoxrunResult<i32> {
    supervise(args, true).await
}

#[allow(clippy::zombie_processes)] // reaped by the forwarder
async fn supervise(args: &[String], reap_orphans: bool) -> BoxrunResult<i32> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| BoxrunError::Config("init requires a command to run".into()))?;

    if reap_orphans && std::process::id() != 1 {
        // Outside a pid namespace orphans go to the nearest subreaper.
        if let Err(e) = nix::sys::prctl::set_child_subreaper(true) {
            tracing::warn!("Failed to become child subreaper: {}", e);
        }
    }

    let child = Command::new(program)
        .args(rest)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| BoxrunError::Start(format!("Failed to spawn {}: {}", program, e)))?;

    let pid = child.id() as i32;
    tracing::debug!(pid, program = %program, "Init started child");

    let mut forwarder = SignalForwarder::new();
    if reap_orphans {
        forwarder = forwarder.reaping_orphans();
    }
    forwarder.forward(pid).await
}
