use boxrun::io::{HostStdio, SharedStdin};
use boxrun::ProcessLauncher;
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// In-memory writer shared between a test and the relay tasks.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.inner.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Launcher whose proxied launches read nothing and write into the
/// returned stdout/stderr buffers.
pub fn capture_launcher() -> (ProcessLauncher, SharedBuffer, SharedBuffer) {
    launcher_with_stdin(None)
}

/// Like [`capture_launcher`], but every launch reads from `stdin`.
pub fn feeding_launcher(stdin: SharedStdin) -> (ProcessLauncher, SharedBuffer, SharedBuffer) {
    launcher_with_stdin(Some(stdin))
}

fn launcher_with_stdin(stdin: Option<SharedStdin>) -> (ProcessLauncher, SharedBuffer, SharedBuffer) {
    let stdout = SharedBuffer::new();
    let stderr = SharedBuffer::new();
    let (out, err) = (stdout.clone(), stderr.clone());
    let launcher = ProcessLauncher::with_host_stdio(move || {
        let input: boxrun::io::HostReader = match &stdin {
            Some(stdin) => Box::new(stdin.reader()),
            None => Box::new(tokio::io::empty()),
        };
        HostStdio::new(input, Box::new(out.clone()), Box::new(err.clone()))
    });
    (launcher, stdout, stderr)
}
