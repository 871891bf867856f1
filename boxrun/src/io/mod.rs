//! Standard stream attachment.
//!
//! Exactly one strategy is live per launched process, chosen from the
//! process's terminal flag and whether the launch is detached:
//!
//! | terminal | detach | strategy |
//! |----------|--------|----------|
//! | true     | any    | [`PtyChannel`]: slave is the process's stdio, master stays here (or with the caller, for a given console) |
//! | false    | true   | [`DirectBinding`]: host stdio handed over as-is, re-owned to the sandbox root |
//! | false    | false  | [`PipeChannel`]: three pipes, proxied to host stdio while the process runs |
//!
//! Every descriptor a strategy allocates is an [`OwnedFd`](std::os::fd::OwnedFd)
//! held either by the [`crate::runtime::Process`] (process side, until the
//! container takes it) or by the channel (launcher side), so it is closed
//! exactly once on every exit path.

mod direct;
mod pipes;
mod proxy;
mod pty;

pub use direct::DirectBinding;
pub use pipes::PipeChannel;
pub use proxy::{HostReader, HostStdio, HostWriter, ProxyTasks, SharedStdin, SharedStdinReader};
pub use pty::PtyChannel;

use crate::runtime::{ContainerConfig, Process};
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use nix::unistd::{fchown, Gid, Uid};
use std::fmt;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::Path;

/// Which stdio strategy a launch uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStrategy {
    Pty,
    Direct,
    Pipes,
}

impl IoStrategy {
    /// Pick the strategy for a launch.
    pub fn select(terminal: bool, detach: bool) -> Self {
        match (terminal, detach) {
            (true, _) => Self::Pty,
            (false, true) => Self::Direct,
            (false, false) => Self::Pipes,
        }
    }
}

impl fmt::Display for IoStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pty => "pty",
            Self::Direct => "direct",
            Self::Pipes => "pipes",
        };
        f.write_str(s)
    }
}

/// Host uid/gid that the sandbox's root maps to.
///
/// Process-side descriptors are re-owned to it so the process can still use
/// them from across the user namespace boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Resolve the mapped root from the sandbox configuration.
    pub fn for_config(config: &ContainerConfig) -> BoxrunResult<Self> {
        Ok(Self::new(config.host_root_uid()?, config.host_root_gid()?))
    }

    /// `fchown` the descriptor to this owner.
    pub fn chown(&self, fd: BorrowedFd<'_>) -> BoxrunResult<()> {
        let raw = fd.as_raw_fd();
        fchown(
            raw,
            Some(Uid::from_raw(self.uid)),
            Some(Gid::from_raw(self.gid)),
        )
        .map_err(|e| BoxrunError::ownership(raw, self.uid, self.gid, e.into()))
    }
}

/// The live stdio attachment of one launched process.
#[derive(Debug)]
pub enum IoChannel {
    Pty(PtyChannel),
    Direct(DirectBinding),
    Pipes(PipeChannel),
}

impl IoChannel {
    /// Allocate the strategy's descriptors and attach the process side.
    ///
    /// `console` is a pty slave to use instead of a fresh pty; only the
    /// pty strategy looks at it.
    pub fn attach(
        strategy: IoStrategy,
        process: &mut Process,
        owner: Owner,
        console: Option<&Path>,
    ) -> BoxrunResult<Self> {
        let channel = match (strategy, console) {
            (IoStrategy::Pty, Some(path)) => Self::Pty(PtyChannel::attach_console(process, owner, path)?),
            (IoStrategy::Pty, None) => Self::Pty(PtyChannel::attach(process, owner)?),
            (IoStrategy::Direct, _) => Self::Direct(DirectBinding::attach(process, owner)?),
            (IoStrategy::Pipes, _) => Self::Pipes(PipeChannel::attach(process, owner)?),
        };
        tracing::debug!(strategy = %strategy, uid = owner.uid, gid = owner.gid, "Attached stdio");
        Ok(channel)
    }

    pub fn strategy(&self) -> IoStrategy {
        match self {
            Self::Pty(_) => IoStrategy::Pty,
            Self::Direct(_) => IoStrategy::Direct,
            Self::Pipes(_) => IoStrategy::Pipes,
        }
    }
}

/// Map a nix error from descriptor allocation to a launch failure.
pub(crate) fn alloc_error(what: &str, err: impl fmt::Display) -> BoxrunError {
    BoxrunError::Start(format!("Failed to create {}: {}", what, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ProcessSpec;
    use std::os::fd::AsFd;

    #[test]
    fn test_strategy_table() {
        assert_eq!(IoStrategy::select(true, false), IoStrategy::Pty);
        assert_eq!(IoStrategy::select(true, true), IoStrategy::Pty);
        assert_eq!(IoStrategy::select(false, true), IoStrategy::Direct);
        assert_eq!(IoStrategy::select(false, false), IoStrategy::Pipes);
    }

    #[test]
    fn test_chown_to_self_succeeds() {
        let owner = Owner::new(
            nix::unistd::geteuid().as_raw(),
            nix::unistd::getegid().as_raw(),
        );
        let (r, _w) = nix::unistd::pipe().unwrap();
        owner.chown(r.as_fd()).unwrap();
    }

    #[test]
    fn test_pipes_attach_sets_process_stdio() {
        let owner = Owner::new(
            nix::unistd::geteuid().as_raw(),
            nix::unistd::getegid().as_raw(),
        );
        let mut process = Process::new(ProcessSpec::new(["true"]), false);
        let channel = IoChannel::attach(IoStrategy::Pipes, &mut process, owner, None).unwrap();
        assert_eq!(channel.strategy(), IoStrategy::Pipes);
        assert!(process.has_stdio());
    }

    #[test]
    fn test_pty_attach_sets_process_stdio() {
        let owner = Owner::new(
            nix::unistd::geteuid().as_raw(),
            nix::unistd::getegid().as_raw(),
        );
        let mut process = Process::new(ProcessSpec::new(["true"]), false);
        let channel = IoChannel::attach(IoStrategy::Pty, &mut process, owner, None).unwrap();
        assert_eq!(channel.strategy(), IoStrategy::Pty);
        let stdio = process.take_stdio().unwrap();
        assert!(std::io::IsTerminal::is_terminal(&stdio.stdout));
    }

    #[test]
    fn test_console_is_ignored_without_terminal() {
        let owner = Owner::new(
            nix::unistd::geteuid().as_raw(),
            nix::unistd::getegid().as_raw(),
        );
        let mut process = Process::new(ProcessSpec::new(["true"]), false);
        let channel = IoChannel::attach(
            IoStrategy::Pipes,
            &mut process,
            owner,
            Some(Path::new("/no/such/console")),
        )
        .unwrap();
        assert_eq!(channel.strategy(), IoStrategy::Pipes);
    }
}
