//! Byte relay between host stdio and a process's launcher-side descriptors.

use futures::future::BoxFuture;
use nix::errno::Errno;
use std::future::Future;
use std::io::{IsTerminal, Read};
use std::os::fd::OwnedFd;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

pub type HostReader = Box<dyn AsyncRead + Send + Unpin>;
pub type HostWriter = Box<dyn AsyncWrite + Send + Unpin>;

const BUF_SIZE: usize = 8192;

/// Chunks read ahead of the relay that is going to consume them.
const STDIN_CHANNEL_DEPTH: usize = 16;

/// Host side of a proxied launch.
///
/// [`HostStdio::inherit`] is the orchestrator's own standard streams; tests
/// and batch mode substitute their own readers and writers.
pub struct HostStdio {
    pub stdin: HostReader,
    pub stdout: HostWriter,
    pub stderr: HostWriter,
    interactive: bool,
}

impl HostStdio {
    pub fn new(stdin: HostReader, stdout: HostWriter, stderr: HostWriter) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
            interactive: false,
        }
    }

    /// The orchestrator's own stdin/stdout/stderr.
    ///
    /// Stdin is read through `stdin`, so bytes a finished launch did not
    /// consume go to the next one.
    pub fn inherit(stdin: &SharedStdin) -> Self {
        Self {
            stdin: Box::new(stdin.reader()),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
            interactive: std::io::stdin().is_terminal(),
        }
    }

    /// Replace stdin with an empty reader.
    pub fn without_stdin(mut self) -> Self {
        self.stdin = Box::new(tokio::io::empty());
        self.interactive = false;
        self
    }

    /// Whether stdin is the controlling terminal (raw mode applies).
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }
}

impl std::fmt::Debug for HostStdio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostStdio")
            .field("interactive", &self.interactive)
            .finish_non_exhaustive()
    }
}

/// One input source read by successive launches, one at a time.
///
/// A blocking read cannot be cancelled, so the source is read by a single
/// thread for as long as it has data. Chunks go through a channel to
/// whichever [`SharedStdinReader`] holds the source at the time; bytes
/// read while no launch is relaying, or left over when a relay is
/// cancelled, wait for the next reader. The thread starts on first read.
#[derive(Clone)]
pub struct SharedStdin {
    slot: Arc<Mutex<StdinSlot>>,
}

struct StdinSlot {
    source: Option<Box<dyn Read + Send>>,
    chunks: Option<mpsc::Receiver<Vec<u8>>>,
    pending: Vec<u8>,
}

impl SharedStdin {
    /// The orchestrator's own stdin.
    pub fn host() -> Self {
        Self::from_reader(std::io::stdin())
    }

    pub fn from_reader<R>(source: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self {
            slot: Arc::new(Mutex::new(StdinSlot {
                source: Some(Box::new(source)),
                chunks: None,
                pending: Vec::new(),
            })),
        }
    }

    /// A reader for one launch. It waits until the previous reader is gone.
    pub fn reader(&self) -> SharedStdinReader {
        SharedStdinReader {
            slot: Arc::clone(&self.slot),
            state: ReaderState::Idle,
        }
    }
}

impl std::fmt::Debug for SharedStdin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStdin").finish_non_exhaustive()
    }
}

impl StdinSlot {
    fn receiver(&mut self) -> Option<&mut mpsc::Receiver<Vec<u8>>> {
        if self.chunks.is_none() {
            let source = self.source.take()?;
            self.chunks = spawn_stdin_thread(source);
        }
        self.chunks.as_mut()
    }

    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        if self.pending.is_empty() {
            let Some(chunks) = self.receiver() else {
                return Poll::Ready(Ok(()));
            };
            match ready!(chunks.poll_recv(cx)) {
                Some(chunk) => self.pending = chunk,
                None => return Poll::Ready(Ok(())),
            }
        }
        let n = buf.remaining().min(self.pending.len());
        buf.put_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Poll::Ready(Ok(()))
    }
}

fn spawn_stdin_thread(mut source: Box<dyn Read + Send>) -> Option<mpsc::Receiver<Vec<u8>>> {
    let (tx, rx) = mpsc::channel(STDIN_CHANNEL_DEPTH);
    let spawned = std::thread::Builder::new()
        .name("boxrun-stdin".into())
        .spawn(move || {
            let mut buf = vec![0u8; BUF_SIZE];
            loop {
                let n = match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::debug!("Host stdin read failed: {}", e);
                        break;
                    }
                };
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        });
    match spawned {
        Ok(_) => Some(rx),
        Err(e) => {
            tracing::warn!("Failed to start host stdin reader: {}", e);
            None
        }
    }
}

enum ReaderState {
    Idle,
    Locking(BoxFuture<'static, OwnedMutexGuard<StdinSlot>>),
    Holding(OwnedMutexGuard<StdinSlot>),
}

/// [`SharedStdin`] as seen by one launch. Dropping it releases the source.
pub struct SharedStdinReader {
    slot: Arc<Mutex<StdinSlot>>,
    state: ReaderState,
}

impl AsyncRead for SharedStdinReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                ReaderState::Idle => {
                    this.state = ReaderState::Locking(Box::pin(Arc::clone(&this.slot).lock_owned()));
                }
                ReaderState::Locking(lock) => {
                    let guard = ready!(lock.as_mut().poll(cx));
                    this.state = ReaderState::Holding(guard);
                }
                ReaderState::Holding(slot) => return slot.poll_read(cx, buf),
            }
        }
    }
}

/// Running copy tasks of one proxied launch.
///
/// Output tasks end on their own once every write end of the process's
/// stdout/stderr is closed; the input task is cancelled when the process
/// has exited since host stdin may never reach EOF.
#[derive(Debug, Default)]
pub struct ProxyTasks {
    input: Option<JoinHandle<u64>>,
    outputs: Vec<JoinHandle<u64>>,
}

impl ProxyTasks {
    pub(crate) fn new(input: JoinHandle<u64>, outputs: Vec<JoinHandle<u64>>) -> Self {
        Self {
            input: Some(input),
            outputs,
        }
    }

    /// Drain the output copies, then stop the input copy.
    pub async fn finish(mut self) {
        let outputs = std::mem::take(&mut self.outputs);
        for joined in futures::future::join_all(outputs).await {
            match joined {
                Ok(bytes) => tracing::trace!(bytes, "Output relay finished"),
                Err(e) => tracing::debug!("Output relay task failed: {}", e),
            }
        }
        if let Some(input) = self.input.take() {
            input.abort();
        }
    }
}

impl Drop for ProxyTasks {
    fn drop(&mut self) {
        if let Some(input) = self.input.take() {
            input.abort();
        }
        for task in self.outputs.drain(..) {
            task.abort();
        }
    }
}

/// Wrap a launcher-side descriptor for async use.
pub(crate) fn async_file(fd: OwnedFd) -> tokio::fs::File {
    tokio::fs::File::from_std(std::fs::File::from(fd))
}

/// Copy `reader` into `writer` until EOF.
///
/// A pty master reports `EIO` once the last slave descriptor is closed;
/// that is treated as EOF.
pub(crate) async fn relay<R, W>(mut reader: R, mut writer: W, stream: &'static str) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => break,
            Err(e) => {
                tracing::debug!(stream, "Read failed: {}", e);
                break;
            }
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            tracing::debug!(stream, "Write failed: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            tracing::debug!(stream, "Flush failed: {}", e);
            break;
        }
        total += n as u64;
    }
    let _ = writer.shutdown().await;
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_relay_copies_until_eof() {
        let (r, w) = nix::unistd::pipe().unwrap();
        let mut writer = std::fs::File::from(w);
        writer.write_all(b"hello\nworld\n").unwrap();
        drop(writer);

        let mut out = Vec::new();
        let n = relay(async_file(r), &mut out, "stdout").await;
        assert_eq!(n, 12);
        assert_eq!(out, b"hello\nworld\n");
    }

    #[tokio::test]
    async fn test_shared_stdin_keeps_bytes_for_the_next_reader() {
        let stdin = SharedStdin::from_reader(&b"abcdef"[..]);

        let mut first = stdin.reader();
        let mut buf = [0u8; 2];
        first.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ab");
        drop(first);

        let mut rest = Vec::new();
        stdin.reader().read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"cdef");
    }

    #[tokio::test]
    async fn test_shared_stdin_second_reader_waits_for_the_first() {
        let stdin = SharedStdin::from_reader(&b"x"[..]);
        let mut held = stdin.reader();
        let mut one = [0u8; 1];
        held.read_exact(&mut one).await.unwrap();

        let mut second = stdin.reader();
        let mut rest = Vec::new();
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            second.read_to_end(&mut rest),
        )
        .await;
        assert!(blocked.is_err());

        drop(held);
        second.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_finish_drains_outputs_and_cancels_input() {
        let (r, w) = nix::unistd::pipe().unwrap();
        // Host stdin that never reaches EOF while `_host` is alive.
        let (pending, _host) = tokio::io::duplex(64);

        let input = tokio::spawn(relay(pending, tokio::io::sink(), "stdin"));
        let output = tokio::spawn(relay(async_file(r), tokio::io::sink(), "stdout"));
        drop(w);

        let tasks = ProxyTasks::new(input, vec![output]);
        tokio::time::timeout(std::time::Duration::from_secs(5), tasks.finish())
            .await
            .unwrap();
    }
}
