// async_reader.rs

use log::{debug, trace, warn};
use std::future::{poll_fn, Future};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

use crate::buffer::{ActiveBuffer, Buffer, Fill};
use crate::config::ReaderConfig;
use crate::error::{panic_message, ReaderError};
use crate::stats::ReaderStats;

/// Consumer's handle on the filler task
struct AsyncFiller {
    swap_ready: mpsc::Sender<Buffer>,
    fill_ready: mpsc::Receiver<Fill>,
    handle: JoinHandle<()>,
}

/// Tokio flavour of the double-buffered reader.
///
/// The filler is a spawned task and the two signals are single-slot mpsc
/// channels. Only two buffers exist, so a slot never holds more than one of
/// them and ownership still alternates strictly between the two sides.
///
/// Panics inside the source are contained by the task boundary and surface as
/// an error on the buffer that was being filled.
pub struct AsyncDoubleBufferedReader {
    active: ActiveBuffer,
    filler: Option<AsyncFiller>,
    buffer_size: usize,
    stats: ReaderStats,
    swap_started: Option<Instant>,
}

impl AsyncDoubleBufferedReader {
    pub async fn new<R>(source: R, buffer_size: usize) -> Result<Self, ReaderError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::with_config(source, ReaderConfig::new(buffer_size)).await
    }

    /// Create a reader, waiting for the first fill before returning.
    ///
    /// Must be called from within a tokio runtime. The filler is a tokio task,
    /// so `config.thread_name` is not used here.
    pub async fn with_config<R>(source: R, config: ReaderConfig) -> Result<Self, ReaderError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        config.validate()?;
        let buffer_size = config.buffer_size;

        // The initial fill runs in its own task so a panicking source is
        // contained here as well
        let mut source = source;
        let initial = tokio::spawn(async move {
            let fill = fill_buffer(&mut source, Buffer::new(0, buffer_size)).await;
            (source, fill)
        })
        .await;

        let (source, first) = match initial {
            Ok((source, fill)) => (Some(source), fill),
            Err(e) => (
                None,
                Fill::failed(Buffer::new(0, buffer_size), join_error(e).into()),
            ),
        };
        debug!(
            "AsyncDoubleBufferedReader: initial fill of {} bytes",
            first.buffer.filled()
        );

        let active = ActiveBuffer::new(first);
        let source = match source {
            Some(source) if !active.is_terminal() => source,
            _ => {
                debug!("Source ended during the initial fill, no filler started");
                return Ok(Self {
                    active,
                    filler: None,
                    buffer_size,
                    stats: ReaderStats::default(),
                    swap_started: None,
                });
            }
        };

        let (swap_tx, swap_rx) = mpsc::channel::<Buffer>(1);
        let (fill_tx, fill_rx) = mpsc::channel::<Fill>(1);
        let handle = tokio::spawn(run_filler(source, swap_rx, fill_tx));

        swap_tx
            .try_send(Buffer::new(1, buffer_size))
            .map_err(|_| ReaderError::FillerDisconnected)?;

        Ok(Self {
            active,
            filler: Some(AsyncFiller {
                swap_ready: swap_tx,
                fill_ready: fill_rx,
                handle,
            }),
            buffer_size,
            stats: ReaderStats::default(),
            swap_started: None,
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn stats(&self) -> &ReaderStats {
        &self.stats
    }

    /// Read until `dst` is full, the stream ends or an error occurs.
    ///
    /// Not cancel safe: bytes copied before the future is dropped are lost.
    pub async fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let mut copied = 0;
        poll_fn(|cx| self.poll_copy(cx, dst, &mut copied)).await
    }

    /// Stop the filler task and wait for it to finish.
    pub async fn close(mut self) -> Result<ReaderStats, ReaderError> {
        if let Some(AsyncFiller {
            swap_ready,
            fill_ready,
            handle,
        }) = self.filler.take()
        {
            drop(swap_ready);
            drop(fill_ready);
            // A fill still in flight is not needed any more
            handle.abort();
            match handle.await {
                Err(e) if e.is_panic() => return Err(join_error(e)),
                _ => {}
            }
        }
        debug!(
            "AsyncDoubleBufferedReader closed: {} bytes, {} swaps, stalled {:?}",
            self.stats.bytes_read, self.stats.swaps, self.stats.stalled
        );
        Ok(std::mem::take(&mut self.stats))
    }

    /// Copy into `dst[*copied..]`, swapping as buffers run out.
    fn poll_copy(
        &mut self,
        cx: &mut Context<'_>,
        dst: &mut [u8],
        copied: &mut usize,
    ) -> Poll<io::Result<usize>> {
        while *copied < dst.len() {
            if self.active.is_exhausted() {
                if self.active.is_terminal() {
                    if *copied > 0 {
                        break;
                    }
                    return Poll::Ready(self.active.report());
                }
                match self.poll_swap(cx) {
                    Poll::Ready(()) => continue,
                    Poll::Pending => return Poll::Pending,
                }
            }

            *copied += self.active.copy_to(&mut dst[*copied..]);
        }

        self.stats.record_read(*copied);
        Poll::Ready(Ok(*copied))
    }

    fn poll_swap(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let started = *self.swap_started.get_or_insert_with(Instant::now);

        let Some(filler) = self.filler.as_mut() else {
            self.swap_started = None;
            self.active.fail(ReaderError::FillerDisconnected.into());
            return Poll::Ready(());
        };

        match filler.fill_ready.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(fill)) => {
                self.swap_started = None;
                self.stats.record_swap(started.elapsed());

                let terminal = fill.status.is_terminal();
                let retired = self.active.install(fill);
                trace!(
                    "Swapped to buffer {}, retired buffer {}",
                    self.active.slot(),
                    retired.slot()
                );

                // After a terminal fill the task exits by itself
                if !terminal && filler.swap_ready.try_send(retired).is_err() {
                    warn!("Filler task went away before taking the back buffer");
                }
                Poll::Ready(())
            }
            Poll::Ready(None) => {
                // The task dropped its sender without a fill: collect the reason
                let result = match Pin::new(&mut filler.handle).poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(result) => result,
                };
                let err = match result {
                    Ok(()) => ReaderError::FillerDisconnected,
                    Err(e) => join_error(e),
                };
                warn!("Swap failed: {}", err);
                self.filler = None;
                self.swap_started = None;
                self.active.fail(err.into());
                Poll::Ready(())
            }
        }
    }
}

impl AsyncRead for AsyncDoubleBufferedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut copied = 0;

        // Bytes go straight from the active buffer into `buf`, so the
        // caller's uninitialized tail is never zeroed
        while buf.remaining() > 0 {
            if this.active.is_exhausted() {
                if this.active.is_terminal() {
                    if copied > 0 {
                        break;
                    }
                    return Poll::Ready(this.active.report().map(|_| ()));
                }
                match this.poll_swap(cx) {
                    Poll::Ready(()) => continue,
                    // Hand back what is already there rather than wait
                    Poll::Pending if copied > 0 => break,
                    Poll::Pending => return Poll::Pending,
                }
            }

            let unread = this.active.unread();
            let count = unread.len().min(buf.remaining());
            buf.put_slice(&unread[..count]);
            this.active.consume(count);
            copied += count;
        }

        this.stats.record_read(copied);
        Poll::Ready(Ok(()))
    }
}

impl Drop for AsyncDoubleBufferedReader {
    fn drop(&mut self) {
        if let Some(filler) = self.filler.take() {
            filler.handle.abort();
        }
    }
}

async fn run_filler<R: AsyncRead + Unpin>(
    mut source: R,
    mut swap_ready: mpsc::Receiver<Buffer>,
    fill_ready: mpsc::Sender<Fill>,
) {
    while let Some(buffer) = swap_ready.recv().await {
        let slot = buffer.slot();
        let fill = fill_buffer(&mut source, buffer).await;
        let terminal = fill.status.is_terminal();
        trace!("Filled buffer {} with {} bytes", slot, fill.buffer.filled());

        if fill_ready.send(fill).await.is_err() {
            debug!("Reader dropped while buffer {} was filling", slot);
            break;
        }
        if terminal {
            debug!("Filler task stopping after terminal fill of buffer {}", slot);
            break;
        }
    }
    trace!("Filler task exiting");
}

async fn fill_buffer<R: AsyncRead + Unpin>(source: &mut R, mut buffer: Buffer) -> Fill {
    let result = loop {
        match source.read(buffer.storage_mut()).await {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => break other,
        }
    };
    Fill::from_read(buffer, result)
}

fn join_error(err: JoinError) -> ReaderError {
    if err.is_panic() {
        let payload = err.into_panic();
        ReaderError::FillPanicked(panic_message(payload.as_ref()))
    } else {
        ReaderError::FillerDisconnected
    }
}
