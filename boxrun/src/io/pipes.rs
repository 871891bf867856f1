//! Pipe strategy: one pipe per standard stream, proxied while the process runs.

use super::proxy::{async_file, relay, HostStdio, ProxyTasks};
use super::{alloc_error, Owner};
use crate::runtime::{Process, ProcessStdio};
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::os::fd::{AsFd, OwnedFd};

/// Launcher-side ends of the three stdio pipes.
///
/// Process-side ends (stdin read, stdout/stderr write) live in the
/// [`Process`] and are re-owned to the sandbox root. All ends are
/// close-on-exec; the sandbox dups the process side onto 0, 1 and 2.
#[derive(Debug)]
pub struct PipeChannel {
    stdin: Option<OwnedFd>,
    stdout: Option<OwnedFd>,
    stderr: Option<OwnedFd>,
}

impl PipeChannel {
    pub fn attach(process: &mut Process, owner: Owner) -> BoxrunResult<Self> {
        let (stdin_read, stdin_write) =
            pipe2(OFlag::O_CLOEXEC).map_err(|e| alloc_error("stdin pipe", e))?;
        let (stdout_read, stdout_write) =
            pipe2(OFlag::O_CLOEXEC).map_err(|e| alloc_error("stdout pipe", e))?;
        let (stderr_read, stderr_write) =
            pipe2(OFlag::O_CLOEXEC).map_err(|e| alloc_error("stderr pipe", e))?;

        owner.chown(stdin_read.as_fd())?;
        owner.chown(stdout_write.as_fd())?;
        owner.chown(stderr_write.as_fd())?;

        process.set_stdio(ProcessStdio {
            stdin: stdin_read,
            stdout: stdout_write,
            stderr: stderr_write,
        });

        Ok(Self {
            stdin: Some(stdin_write),
            stdout: Some(stdout_read),
            stderr: Some(stderr_read),
        })
    }

    /// Start the three copy tasks.
    ///
    /// Must run after the process has started, so the process-side write
    /// ends are already gone from this side and output reaches EOF when
    /// the process exits.
    pub fn proxy(mut self, host: HostStdio) -> BoxrunResult<ProxyTasks> {
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (self.stdin.take(), self.stdout.take(), self.stderr.take())
        else {
            return Err(BoxrunError::Internal("pipe channel already proxied".into()));
        };

        let HostStdio {
            stdin: host_stdin,
            stdout: host_stdout,
            stderr: host_stderr,
            ..
        } = host;

        let input = tokio::spawn(relay(host_stdin, async_file(stdin), "stdin"));
        let outputs = vec![
            tokio::spawn(relay(async_file(stdout), host_stdout, "stdout")),
            tokio::spawn(relay(async_file(stderr), host_stderr, "stderr")),
        ];
        Ok(ProxyTasks::new(input, outputs))
    }
}
