//! Pseudo-terminal strategy.

use super::proxy::{async_file, relay, HostStdio, ProxyTasks};
use super::{alloc_error, Owner};
use crate::runtime::{Process, ProcessStdio};
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg, Termios};
use std::io::IsTerminal;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Launcher side of a pty-attached process: the master end.
///
/// The slave end is duplicated three times into the process's stdio and
/// re-owned to the sandbox root; the original slave is closed at attach.
/// With a caller-supplied console there is no master here and nothing to
/// relay.
#[derive(Debug)]
pub struct PtyChannel {
    master: Option<OwnedFd>,
    raw_mode: Option<RawModeGuard>,
    console: Option<PathBuf>,
}

impl PtyChannel {
    pub fn attach(process: &mut Process, owner: Owner) -> BoxrunResult<Self> {
        let stdin = std::io::stdin();
        let winsize = window_size(stdin.as_fd());

        let OpenptyResult { master, slave } =
            openpty(winsize.as_ref(), None).map_err(|e| alloc_error("pty", e))?;
        set_cloexec(master.as_fd())?;
        set_cloexec(slave.as_fd())?;

        owner.chown(slave.as_fd())?;
        process.set_stdio(slave_stdio(slave)?);

        Ok(Self {
            master: Some(master),
            raw_mode: None,
            console: None,
        })
    }

    /// Attach the process to the pty slave at `path`, opened here.
    pub fn attach_console(process: &mut Process, owner: Owner, path: &Path) -> BoxrunResult<Self> {
        let console_error = |e: &dyn std::fmt::Display| {
            BoxrunError::Start(format!("Failed to open console {}: {}", path.display(), e))
        };
        // std opens with O_CLOEXEC
        let slave: OwnedFd = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(path)
            .map_err(|e| console_error(&e))?
            .into();
        if !slave.is_terminal() {
            return Err(console_error(&"not a terminal"));
        }

        owner.chown(slave.as_fd())?;
        process.set_stdio(slave_stdio(slave)?);
        tracing::debug!(console = %path.display(), "Attached process to console");

        Ok(Self {
            master: None,
            raw_mode: None,
            console: Some(path.to_path_buf()),
        })
    }

    /// The caller-supplied console, if any.
    pub fn console(&self) -> Option<&Path> {
        self.console.as_deref()
    }

    pub fn master(&self) -> Option<BorrowedFd<'_>> {
        self.master.as_ref().map(|fd| fd.as_fd())
    }

    /// Copy the host terminal's current window size onto the master.
    pub fn resize_from_host(&self) -> BoxrunResult<()> {
        let Some(master) = self.master.as_ref() else {
            return Ok(());
        };
        let stdin = std::io::stdin();
        match window_size(stdin.as_fd()) {
            Some(ws) => set_window_size(master.as_fd(), &ws),
            None => Ok(()),
        }
    }

    /// Start relaying host stdio through the master.
    ///
    /// Output is a single merged stream; the host's stderr is unused.
    /// When the host stdin is a terminal it is switched to raw mode until
    /// [`PtyChannel::close`].
    pub fn proxy(&mut self, host: HostStdio) -> BoxrunResult<ProxyTasks> {
        if self.console.is_some() {
            return Ok(ProxyTasks::default());
        }
        let master = self
            .master
            .as_ref()
            .ok_or_else(|| BoxrunError::Internal("pty master already closed".into()))?;

        let reader = master
            .try_clone()
            .map_err(|e| BoxrunError::Forwarding(format!("Failed to dup pty master: {}", e)))?;
        let writer = master
            .try_clone()
            .map_err(|e| BoxrunError::Forwarding(format!("Failed to dup pty master: {}", e)))?;

        if host.is_interactive() {
            self.raw_mode = RawModeGuard::enable();
        }

        let HostStdio { stdin, stdout, .. } = host;
        let input = tokio::spawn(relay(stdin, async_file(writer), "stdin"));
        let output = tokio::spawn(relay(async_file(reader), stdout, "stdout"));
        Ok(ProxyTasks::new(input, vec![output]))
    }

    /// Restore the host terminal and close the master.
    pub fn close(&mut self) {
        self.raw_mode.take();
        self.master.take();
    }
}

fn slave_stdio(slave: OwnedFd) -> BoxrunResult<ProcessStdio> {
    let stdin = slave
        .try_clone()
        .map_err(|e| alloc_error("pty slave dup for stdin", e))?;
    let stdout = slave
        .try_clone()
        .map_err(|e| alloc_error("pty slave dup for stdout", e))?;
    Ok(ProcessStdio {
        stdin,
        stdout,
        stderr: slave,
    })
}

fn set_cloexec(fd: BorrowedFd<'_>) -> BoxrunResult<()> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .map(drop)
        .map_err(|e| alloc_error("pty (close-on-exec)", e))
}

/// Window size of `fd`, if it is a terminal.
pub(crate) fn window_size(fd: BorrowedFd<'_>) -> Option<Winsize> {
    let mut ws = Winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCGWINSZ writes a winsize into the pointed-to struct.
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCGWINSZ, &mut ws as *mut Winsize) };
    (rc != -1).then_some(ws)
}

pub(crate) fn set_window_size(fd: BorrowedFd<'_>, ws: &Winsize) -> BoxrunResult<()> {
    // SAFETY: TIOCSWINSZ only reads the pointed-to struct.
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCSWINSZ, ws as *const Winsize) };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        return Err(BoxrunError::Forwarding(format!(
            "Failed to set pty window size ({}x{}): {}",
            ws.ws_row, ws.ws_col, err
        )));
    }
    Ok(())
}

/// Host stdin in raw mode; the original settings come back on drop.
struct RawModeGuard {
    original: Termios,
}

impl RawModeGuard {
    fn enable() -> Option<Self> {
        let stdin = std::io::stdin();
        let original = tcgetattr(stdin.as_fd()).ok()?;
        let mut raw = original.clone();
        cfmakeraw(&mut raw);
        if let Err(e) = tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw) {
            tracing::debug!("Failed to enable raw mode: {}", e);
            return None;
        }
        Some(Self { original })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let stdin = std::io::stdin();
        if let Err(e) = tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &self.original) {
            tracing::debug!("Failed to restore terminal mode: {}", e);
        }
    }
}

impl std::fmt::Debug for RawModeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RawModeGuard")
    }
}
