//! Relaying host signals to a sandboxed process until it exits.

use crate::io::{HostStdio, PipeChannel, PtyChannel};
use boxrun_shared::constants::exit::SIGNAL_OFFSET;
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Signals the forwarder intercepts while a process runs.
///
/// SIGKILL and SIGSTOP cannot be caught; SIGCHLD is observed through
/// `waitpid` instead.
pub const FORWARDED_SIGNALS: &[Signal] = &[
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
    Signal::SIGPIPE,
    Signal::SIGALRM,
    Signal::SIGCONT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
    Signal::SIGWINCH,
];

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Process exited normally with exit code
    Code(i32),

    /// Process was terminated by signal
    Signal(Signal),
}

impl ExitStatus {
    /// Exit code in shell convention: signal N reports 128 + N.
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Code(c) => *c,
            ExitStatus::Signal(sig) => SIGNAL_OFFSET + *sig as i32,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }

    /// Terminal statuses only; stop/continue notifications return `None`.
    pub fn from_wait(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(ExitStatus::Code(code)),
            WaitStatus::Signaled(_, sig, _) => Some(ExitStatus::Signal(sig)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderState {
    Idle,
    Forwarding,
    /// The process has exited and relaying is done.
    Exited,
    Closed,
}

/// Forwards host signals to one process and reports its exit code.
///
/// With a pty attached the forwarder also owns the master: SIGWINCH becomes
/// a window-size update instead of being delivered, and host stdio is
/// relayed through the master for the lifetime of the process. Pipes are
/// relayed the same way. Relaying starts only once signal handlers are in
/// place.
#[derive(Debug)]
pub struct SignalForwarder {
    pty: Option<PtyChannel>,
    pipes: Option<PipeChannel>,
    host: Option<HostStdio>,
    state: ForwarderState,
    reap_orphans: bool,
}

impl Default for SignalForwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalForwarder {
    pub fn new() -> Self {
        Self {
            pty: None,
            pipes: None,
            host: None,
            state: ForwarderState::Idle,
            reap_orphans: false,
        }
    }

    pub fn with_pty(pty: PtyChannel, host: HostStdio) -> Self {
        Self {
            pty: Some(pty),
            pipes: None,
            host: Some(host),
            state: ForwarderState::Idle,
            reap_orphans: false,
        }
    }

    pub fn with_pipes(pipes: PipeChannel, host: HostStdio) -> Self {
        Self {
            pty: None,
            pipes: Some(pipes),
            host: Some(host),
            state: ForwarderState::Idle,
            reap_orphans: false,
        }
    }

    /// Also reap every other child while waiting, as a sandbox init has to:
    /// orphans re-parented to this process are collected and discarded.
    pub fn reaping_orphans(mut self) -> Self {
        self.reap_orphans = true;
        self
    }

    pub fn state(&self) -> ForwarderState {
        self.state
    }

    /// Forward signals to `pid` until it exits; returns its exit code.
    ///
    /// A forwarder is single use.
    pub async fn forward(&mut self, pid: i32) -> BoxrunResult<i32> {
        if self.state != ForwarderState::Idle {
            return Err(BoxrunError::Internal(format!(
                "signal forwarder is {:?}, expected Idle",
                self.state
            )));
        }
        self.state = ForwarderState::Forwarding;

        let child = Pid::from_raw(pid);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listeners = Listeners::register(tx)?;

        let proxy = match (self.host.take(), self.pty.as_mut(), self.pipes.take()) {
            (Some(host), Some(pty), _) => Some(pty.proxy(host)?),
            (Some(host), None, Some(pipes)) => Some(pipes.proxy(host)?),
            _ => None,
        };

        tracing::debug!(pid, "Forwarding signals");
        let reap_orphans = self.reap_orphans;
        let mut waiter = tokio::task::spawn_blocking(move || wait_for_exit(child, reap_orphans));
        let status = loop {
            tokio::select! {
                joined = &mut waiter => {
                    break joined.unwrap_or_else(|e| {
                        Err(BoxrunError::Forwarding(format!(
                            "wait task for {} failed: {}",
                            child, e
                        )))
                    });
                }
                Some(sig) = rx.recv() => self.deliver(child, sig),
            }
        };
        drop(listeners);

        // Without an exit status the output ends may never see EOF.
        match proxy {
            Some(proxy) if status.is_ok() => proxy.finish().await,
            other => drop(other),
        }
        self.state = ForwarderState::Exited;

        let status = status?;
        tracing::debug!(pid, code = status.code(), "Process exited");
        Ok(status.code())
    }

    fn deliver(&self, child: Pid, sig: Signal) {
        if sig == Signal::SIGWINCH {
            if let Some(pty) = self.pty.as_ref() {
                if let Err(e) = pty.resize_from_host() {
                    tracing::warn!("Failed to propagate window size: {}", e);
                }
                return;
            }
        }

        match kill(child, sig) {
            Ok(()) => tracing::debug!(pid = %child, signal = %sig, "Forwarded signal"),
            Err(Errno::ESRCH) => {
                tracing::debug!(pid = %child, signal = %sig, "Process already exited")
            }
            Err(e) => tracing::warn!(pid = %child, signal = %sig, "Failed to forward signal: {}", e),
        }
    }

    /// Release the pty master, pipes and host stdio. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut pty) = self.pty.take() {
            pty.close();
        }
        self.pipes = None;
        self.host = None;
        self.state = ForwarderState::Closed;
    }
}

impl Drop for SignalForwarder {
    fn drop(&mut self) {
        self.close();
    }
}

/// Block until `pid` terminates. With `reap_orphans` any child is waited
/// for, and only `pid`'s status is kept.
fn wait_for_exit(pid: Pid, reap_orphans: bool) -> BoxrunResult<ExitStatus> {
    let target = if reap_orphans { Pid::from_raw(-1) } else { pid };
    loop {
        match waitpid(target, None) {
            Ok(status) => {
                let Some(exit) = ExitStatus::from_wait(status) else {
                    continue;
                };
                if status.pid() == Some(pid) {
                    return Ok(exit);
                }
                tracing::debug!(pid = ?status.pid(), code = exit.code(), "Reaped orphan");
            }
            Err(Errno::EINTR) => continue,
            Err(e) => {
                return Err(BoxrunError::Forwarding(format!(
                    "Failed to wait for process {}: {}",
                    pid, e
                )));
            }
        }
    }
}

/// One listener task per forwarded signal, all feeding one channel.
struct Listeners {
    tasks: Vec<JoinHandle<()>>,
}

impl Listeners {
    fn register(tx: mpsc::UnboundedSender<Signal>) -> BoxrunResult<Self> {
        let mut listeners = Self { tasks: Vec::new() };
        for &sig in FORWARDED_SIGNALS {
            let mut stream = signal(SignalKind::from_raw(sig as i32)).map_err(|e| {
                BoxrunError::Forwarding(format!("Failed to register {} handler: {}", sig, e))
            })?;
            let tx = tx.clone();
            listeners.tasks.push(tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    if tx.send(sig).is_err() {
                        break;
                    }
                }
            }));
        }
        Ok(listeners)
    }
}

impl Drop for Listeners {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
