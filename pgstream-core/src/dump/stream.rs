//! The readable, closable handle over a running dump process.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::ExitStatus;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::ChildStdout;
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, warn};

use crate::error::{DumpError, Result};
use crate::tools::DumpTool;

/// Exit report sent by the supervisor task once the child is reaped.
#[derive(Debug)]
pub(crate) struct ExitReport {
    pub(crate) status: io::Result<ExitStatus>,
    /// The kill token fired before the supervisor saw the child exit.
    pub(crate) killed: bool,
}

pub(crate) type ExitReceiver = oneshot::Receiver<ExitReport>;

/// Output of a running `pg_dump` / `pg_dumpall` process.
///
/// Read it with [`tokio::io::AsyncReadExt`] (or hand it to
/// [`tokio::io::copy`]), then call [`DumpStream::close`] to release the pipe
/// and learn whether the dump tool succeeded. A clean end-of-stream alone
/// does not mean the dump is complete.
///
/// Dropping a handle that was never closed kills the process.
pub struct DumpStream {
    tool: DumpTool,
    pid: Option<u32>,
    pipe: Option<ChildStdout>,
    // Held until a close that was interrupted mid-wait is retried
    pipe_error: Option<DumpError>,
    exit: Option<ExitReceiver>,
    kill: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl DumpStream {
    pub(crate) fn new(
        tool: DumpTool,
        pid: Option<u32>,
        pipe: ChildStdout,
        exit: ExitReceiver,
        kill: CancellationToken,
    ) -> Self {
        let cancelled = Box::pin(kill.clone().cancelled_owned());
        Self {
            tool,
            pid,
            pipe: Some(pipe),
            pipe_error: None,
            exit: Some(exit),
            kill,
            cancelled,
        }
    }

    /// Which tool produces this stream.
    pub fn tool(&self) -> DumpTool {
        self.tool
    }

    /// OS process id of the dump tool, while it is known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether [`DumpStream::close`] has run to completion.
    pub fn is_closed(&self) -> bool {
        self.pipe.is_none() && self.exit.is_none()
    }

    /// Releases the output pipe and waits for the process to exit.
    ///
    /// Closing before end-of-stream is allowed: the tool sees a broken pipe
    /// and exits, and the wait still completes. A failed pipe release and a
    /// failed wait are reported together as [`DumpError::Close`].
    ///
    /// Calling this again after it has completed is a no-op returning
    /// `Ok(())`. If the returned future is dropped before completing (under
    /// a timeout, say), the process is still owned by this handle: a later
    /// `close` waits again and dropping the handle kills it.
    ///
    /// # Errors
    /// - [`DumpError::ExitStatus`] when the tool exited unsuccessfully
    /// - [`DumpError::Cancelled`] when the caller's token fired and the
    ///   process had to be killed
    /// - [`DumpError::PipeClose`], [`DumpError::Wait`], [`DumpError::Close`]
    ///   for failures reclaiming the pipe or process
    pub async fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }

        if let Err(e) = self.release_pipe() {
            self.pipe_error = Some(e);
        }
        let wait = self.wait_for_exit().await.err();
        DumpError::join_close(self.pipe_error.take(), wait)
    }

    /// Copies the rest of the stream into `writer`, then closes it.
    ///
    /// The handle is closed whether or not the copy succeeds. A copy failure
    /// takes precedence over a close failure, except that cancellation is
    /// always reported as [`DumpError::Cancelled`].
    ///
    /// # Errors
    /// Returns [`DumpError::Io`] if reading or writing fails, otherwise the
    /// outcome of [`DumpStream::close`].
    pub async fn drain_to<W>(&mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let copied = tokio::io::copy(self, writer).await;
        let closed = self.close().await;

        match (copied, closed) {
            (Ok(bytes), Ok(())) => Ok(bytes),
            (Ok(_), Err(err)) => Err(err),
            (Err(_), Err(DumpError::Cancelled)) => Err(DumpError::Cancelled),
            (Err(source), closed) => {
                if let Err(close_err) = closed {
                    warn!("{} also failed to close: {}", self.tool, close_err);
                }
                Err(DumpError::io(
                    format!("Failed to copy {} output", self.tool),
                    source,
                ))
            }
        }
    }

    fn release_pipe(&mut self) -> Result<()> {
        let Some(pipe) = self.pipe.take() else {
            return Ok(());
        };

        // Deregistering from the reactor is the fallible half of closing;
        // the descriptor itself is closed when the owned fd drops.
        #[cfg(unix)]
        {
            pipe.into_owned_fd()
                .map(drop)
                .map_err(|source| DumpError::PipeClose { source })
        }
        #[cfg(not(unix))]
        {
            drop(pipe);
            Ok(())
        }
    }

    async fn wait_for_exit(&mut self) -> Result<()> {
        let Some(exit) = self.exit.as_mut() else {
            return Ok(());
        };

        // The receiver stays in place until a report arrives, so an
        // interrupted wait can be resumed and Drop still kills the process.
        let report = exit.await;
        self.exit = None;
        self.pid = None;

        let report = report.map_err(|_| DumpError::SupervisorLost)?;
        let status = report.status.map_err(|source| DumpError::Wait { source })?;

        if status.success() {
            debug!("{} exited successfully", self.tool);
            return Ok(());
        }

        if report.killed {
            warn!("{} was cancelled ({})", self.tool, status);
            return Err(DumpError::Cancelled);
        }

        warn!("{} exited unsuccessfully: {}", self.tool, status);
        Err(DumpError::ExitStatus {
            tool: self.tool,
            status,
        })
    }
}

impl AsyncRead for DumpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        let Some(pipe) = this.pipe.as_mut() else {
            return Poll::Ready(Ok(()));
        };

        if this.kill.is_cancelled() || this.cancelled.as_mut().poll(cx).is_ready() {
            // The supervisor is killing the child; stop reading even if a
            // grandchild still holds the write end open.
            this.pipe = None;
            return Poll::Ready(Err(io::Error::other(DumpError::Cancelled)));
        }

        Pin::new(pipe).poll_read(cx, buf)
    }
}

impl Drop for DumpStream {
    fn drop(&mut self) {
        if self.exit.is_some() {
            debug!("{} handle dropped without close; killing process", self.tool);
            self.kill.cancel();
        }
    }
}

impl std::fmt::Debug for DumpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpStream")
            .field("tool", &self.tool)
            .field("pid", &self.pid)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
