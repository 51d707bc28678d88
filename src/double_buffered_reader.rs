// double_buffered_reader.rs

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, trace, warn};
use std::io::{self, Read};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::buffer::{ActiveBuffer, Buffer, Fill};
use crate::config::ReaderConfig;
use crate::error::{panic_message, ReaderError};
use crate::stats::ReaderStats;

/// Consumer's handle on the background filler thread
struct Filler {
    /// Carries the retired buffer to the filler ("swap ready")
    swap_ready: Sender<Buffer>,
    /// Carries the filled back buffer to the consumer ("fill ready")
    fill_ready: Receiver<Fill>,
    handle: JoinHandle<()>,
}

/// Double-buffered read-ahead reader.
///
/// Wraps a blocking source and prefetches the next `buffer_size` bytes on a
/// dedicated thread while the caller drains the current buffer. Both channels
/// are zero-capacity, so every exchange is a rendezvous and each buffer is
/// owned by exactly one thread at a time.
///
/// Construction performs one fill synchronously, so the first read never waits
/// on the filler.
pub struct DoubleBufferedReader {
    active: ActiveBuffer,
    filler: Option<Filler>,
    buffer_size: usize,
    stats: ReaderStats,
}

impl DoubleBufferedReader {
    /// Create a reader around `source` with two buffers of `buffer_size` bytes.
    ///
    /// # Arguments
    ///
    /// * `source` - Any blocking byte source; it moves to the filler thread
    /// * `buffer_size` - Capacity of each buffer, must be greater than zero
    ///
    /// # Returns
    ///
    /// * `Result<Self, ReaderError>` - Reader with buffer 0 already filled
    pub fn new<R>(source: R, buffer_size: usize) -> Result<Self, ReaderError>
    where
        R: Read + Send + 'static,
    {
        Self::with_config(source, ReaderConfig::new(buffer_size))
    }

    pub fn with_config<R>(mut source: R, config: ReaderConfig) -> Result<Self, ReaderError>
    where
        R: Read + Send + 'static,
    {
        config.validate()?;

        let first = fill_buffer(&mut source, Buffer::new(0, config.buffer_size));
        debug!(
            "DoubleBufferedReader: initial fill of {} bytes",
            first.buffer.filled()
        );

        let active = ActiveBuffer::new(first);
        if active.is_terminal() {
            debug!("Source ended during the initial fill, no filler started");
            return Ok(Self {
                active,
                filler: None,
                buffer_size: config.buffer_size,
                stats: ReaderStats::default(),
            });
        }

        let (swap_tx, swap_rx) = bounded::<Buffer>(0);
        let (fill_tx, fill_rx) = bounded::<Fill>(0);

        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run_filler(source, swap_rx, fill_tx))?;

        // Buffer 1 starts filling while the caller drains buffer 0
        swap_tx
            .send(Buffer::new(1, config.buffer_size))
            .map_err(|_| ReaderError::FillerDisconnected)?;

        Ok(Self {
            active,
            filler: Some(Filler {
                swap_ready: swap_tx,
                fill_ready: fill_rx,
                handle,
            }),
            buffer_size: config.buffer_size,
            stats: ReaderStats::default(),
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn stats(&self) -> &ReaderStats {
        &self.stats
    }

    /// Stop the filler and wait for it to exit.
    ///
    /// Returns the final counters, or the panic of a filler that died outside
    /// a fill.
    pub fn close(mut self) -> Result<ReaderStats, ReaderError> {
        self.join_filler()?;
        debug!(
            "DoubleBufferedReader closed: {} bytes, {} swaps, stalled {:?}",
            self.stats.bytes_read, self.stats.swaps, self.stats.stalled
        );
        Ok(std::mem::take(&mut self.stats))
    }

    /// Wait for the back buffer, make it active and send the retired buffer
    /// back to the filler.
    fn swap(&mut self) {
        let started = Instant::now();
        let received = match &self.filler {
            Some(filler) => filler.fill_ready.recv().ok(),
            None => None,
        };

        let Some(fill) = received else {
            let err = match self.join_filler() {
                Ok(()) => ReaderError::FillerDisconnected,
                Err(e) => e,
            };
            warn!("Swap failed: {}", err);
            self.active.fail(err.into());
            return;
        };

        self.stats.record_swap(started.elapsed());
        let terminal = fill.status.is_terminal();
        let retired = self.active.install(fill);
        trace!(
            "Swapped to buffer {}, retired buffer {}",
            self.active.slot(),
            retired.slot()
        );

        if terminal {
            // The filler stops on its own after a terminal fill
            if let Err(e) = self.join_filler() {
                warn!("Filler exited abnormally: {}", e);
            }
            return;
        }

        if let Some(filler) = &self.filler {
            if filler.swap_ready.send(retired).is_err() {
                warn!("Filler went away before taking the back buffer");
            }
        }
    }

    fn join_filler(&mut self) -> Result<(), ReaderError> {
        let Some(Filler {
            swap_ready,
            fill_ready,
            handle,
        }) = self.filler.take()
        else {
            return Ok(());
        };

        // Disconnecting both signals wakes the filler wherever it is parked
        drop(swap_ready);
        drop(fill_ready);

        handle
            .join()
            .map_err(|payload| ReaderError::FillPanicked(panic_message(payload.as_ref())))
    }
}

impl Read for DoubleBufferedReader {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let mut copied = 0;

        while copied < dst.len() {
            if self.active.is_exhausted() {
                if self.active.is_terminal() {
                    // Bytes already copied are returned first; the terminal
                    // status is reported by the next call
                    if copied > 0 {
                        break;
                    }
                    return self.active.report();
                }
                self.swap();
                continue;
            }

            copied += self.active.copy_to(&mut dst[copied..]);
        }

        self.stats.record_read(copied);
        Ok(copied)
    }
}

impl Drop for DoubleBufferedReader {
    /// Disconnects the filler without waiting for it. A filler parked on a
    /// signal exits at once; one inside a source read exits as soon as that
    /// read returns. Use `close` to wait.
    fn drop(&mut self) {
        if let Some(Filler {
            swap_ready,
            fill_ready,
            handle,
        }) = self.filler.take()
        {
            drop(swap_ready);
            drop(fill_ready);
            debug!(
                "Detached filler thread {:?}",
                handle.thread().name().unwrap_or("unnamed")
            );
            drop(handle);
        }
    }
}

/// Filler loop: one fill per swap-ready signal until the reader goes away or
/// a fill ends the stream.
fn run_filler<R: Read>(mut source: R, swap_ready: Receiver<Buffer>, fill_ready: Sender<Fill>) {
    for buffer in swap_ready.iter() {
        let slot = buffer.slot();
        let fill = fill_buffer(&mut source, buffer);
        let terminal = fill.status.is_terminal();
        trace!("Filled buffer {} with {} bytes", slot, fill.buffer.filled());

        if fill_ready.send(fill).is_err() {
            debug!("Reader dropped while buffer {} was filling", slot);
            break;
        }
        if terminal {
            debug!("Filler stopping after terminal fill of buffer {}", slot);
            break;
        }
    }
    trace!("Filler exiting");
}

/// One source read into `buffer`. A panic inside the source is contained here
/// and recorded as a failed fill.
fn fill_buffer<R: Read + ?Sized>(source: &mut R, mut buffer: Buffer) -> Fill {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        read_retrying(source, buffer.storage_mut())
    }));

    match outcome {
        Ok(result) => Fill::from_read(buffer, result),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(
                "Source panicked while filling buffer {}: {}",
                buffer.slot(),
                message
            );
            Fill::failed(buffer, ReaderError::FillPanicked(message).into())
        }
    }
}

fn read_retrying<R: Read + ?Sized>(source: &mut R, dst: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(dst) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}
