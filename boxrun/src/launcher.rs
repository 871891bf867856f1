//! One process launch inside an existing sandbox, from start to exit status.

use crate::io::{HostStdio, IoChannel, IoStrategy, Owner, SharedStdin};
use crate::runtime::{Container, Process, ProcessSpec};
use crate::signals::SignalForwarder;
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where a proxied process's stdin comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdinMode {
    /// Host stdin
    #[default]
    Inherit,
    /// Empty; used when host stdin is already being consumed (batch from `-`)
    Null,
}

/// Per-launch options.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Write the started pid here, as decimal text
    pub pid_file: Option<PathBuf>,

    /// Return as soon as the process has started
    pub detach: bool,

    pub stdin: StdinMode,

    /// Existing pty slave to use as a terminal process's stdio. Whoever
    /// holds its master does the relaying.
    pub console: Option<PathBuf>,
}

type HostStdioSource = Arc<dyn Fn() -> HostStdio + Send + Sync>;

/// Starts processes in a container and waits for them.
#[derive(Clone)]
pub struct ProcessLauncher {
    host_stdio: HostStdioSource,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessLauncher").finish_non_exhaustive()
    }
}

impl ProcessLauncher {
    /// Launcher that proxies to the orchestrator's own stdio.
    ///
    /// All launches share one reader of host stdin.
    pub fn new() -> Self {
        let stdin = SharedStdin::host();
        Self::with_host_stdio(move || HostStdio::inherit(&stdin))
    }

    /// Launcher whose proxied launches use host stdio built by `source`.
    pub fn with_host_stdio<F>(source: F) -> Self
    where
        F: Fn() -> HostStdio + Send + Sync + 'static,
    {
        Self {
            host_stdio: Arc::new(source),
        }
    }

    /// Start `spec` in `container` and, unless detached, wait for it.
    ///
    /// `extra_fds` are inherited after stdin/stdout/stderr, in order.
    /// Returns the exit code (128 + N for death by signal N), or 0 for a
    /// detached launch.
    pub async fn run(
        &self,
        container: &mut dyn Container,
        spec: &ProcessSpec,
        extra_fds: &[RawFd],
        options: &LaunchOptions,
    ) -> BoxrunResult<i32> {
        let mut spec = spec.clone();
        spec.extra_fds.extend_from_slice(extra_fds);

        let owner = Owner::for_config(container.config())?;
        let strategy = IoStrategy::select(spec.terminal, options.detach);
        let mut process = Process::new(spec, options.detach);
        let channel = IoChannel::attach(strategy, &mut process, owner, options.console.as_deref())?;

        if let Err(e) = container.start(&mut process) {
            drop(channel);
            drop(process);
            tracing::debug!(container_id = %container.id(), "Released stdio after failed start");
            return Err(match e {
                BoxrunError::Start(_) => e,
                other => BoxrunError::Start(other.to_string()),
            });
        }
        // Whatever the container did not consume must not stay open here, or
        // proxied output never reaches EOF.
        drop(process.take_stdio());

        let pid = process.pid().ok_or_else(|| {
            BoxrunError::Internal(format!("container {} started without a pid", container.id()))
        })?;
        tracing::info!(
            container_id = %container.id(),
            pid,
            program = process.spec().program(),
            strategy = %strategy,
            "Started process"
        );

        if let Some(path) = options.pid_file.as_deref() {
            if let Err(e) = write_pid_file(path, pid) {
                tracing::warn!(path = %path.display(), "Failed to write pid file: {}", e);
            }
        }

        if options.detach {
            return Ok(0);
        }

        let host = self.host_stdio(options.stdin);
        let mut forwarder = match channel {
            IoChannel::Pty(pty) => SignalForwarder::with_pty(pty, host),
            IoChannel::Pipes(pipes) => SignalForwarder::with_pipes(pipes, host),
            IoChannel::Direct(_) => SignalForwarder::new(),
        };
        forwarder.forward(pid).await
    }

    fn host_stdio(&self, mode: StdinMode) -> HostStdio {
        let host = (self.host_stdio)();
        match mode {
            StdinMode::Inherit => host,
            StdinMode::Null => host.without_stdin(),
        }
    }
}

/// Write `pid` as decimal text, replacing the file atomically.
pub fn write_pid_file(path: &Path, pid: i32) -> std::io::Result<()> {
    let name = path
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid file has no name"))?;
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(name);
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, pid.to_string())?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_pid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.pid");
        write_pid_file(&path, 4242).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "4242");
        assert!(!dir.path().join(".app.pid").exists());

        write_pid_file(&path, 7).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "7");
    }

    #[test]
    fn test_write_pid_file_missing_dir_fails() {
        let dir = TempDir::new().unwrap();
        assert!(write_pid_file(&dir.path().join("no/such/app.pid"), 1).is_err());
    }

    #[test]
    fn test_default_options() {
        let options = LaunchOptions::default();
        assert!(!options.detach);
        assert!(options.pid_file.is_none());
        assert!(options.console.is_none());
        assert_eq!(options.stdin, StdinMode::Inherit);
    }
}
