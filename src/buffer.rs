// buffer.rs

use log::warn;
use std::io;

/// One half of the double buffer.
///
/// A `Buffer` is owned by exactly one side at a time: the consumer while it is
/// active, the filler while it is the back buffer. Ownership moves through the
/// swap-ready and fill-ready signals.
#[derive(Debug)]
pub(crate) struct Buffer {
    slot: usize,
    data: Box<[u8]>,
    filled: usize,
}

impl Buffer {
    pub(crate) fn new(slot: usize, capacity: usize) -> Self {
        Self {
            slot,
            data: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    pub(crate) fn capacity(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn filled(&self) -> usize {
        self.filled
    }

    /// Whole backing storage, handed to the source for a fill.
    pub(crate) fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn set_filled(&mut self, count: usize) {
        self.filled = count.min(self.data.len());
    }

    fn valid_from(&self, offset: usize) -> &[u8] {
        &self.data[offset.min(self.filled)..self.filled]
    }
}

/// Outcome of a single fill
#[derive(Debug)]
pub(crate) enum FillStatus {
    Filled,
    Eof,
    Failed(io::Error),
}

impl FillStatus {
    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self, FillStatus::Filled)
    }
}

/// A filled buffer travelling back to the consumer with its fill result
#[derive(Debug)]
pub(crate) struct Fill {
    pub(crate) buffer: Buffer,
    pub(crate) status: FillStatus,
}

impl Fill {
    /// Record the result of one source read into `buffer`.
    pub(crate) fn from_read(mut buffer: Buffer, result: io::Result<usize>) -> Self {
        let status = match result {
            Ok(0) => {
                buffer.set_filled(0);
                FillStatus::Eof
            }
            Ok(count) => {
                if count > buffer.capacity() {
                    warn!(
                        "Source reported {} bytes into a {} byte buffer, clamping",
                        count,
                        buffer.capacity()
                    );
                }
                buffer.set_filled(count);
                FillStatus::Filled
            }
            Err(e) => {
                buffer.set_filled(0);
                FillStatus::Failed(e)
            }
        };
        Self { buffer, status }
    }

    pub(crate) fn failed(mut buffer: Buffer, err: io::Error) -> Self {
        buffer.set_filled(0);
        Self {
            buffer,
            status: FillStatus::Failed(err),
        }
    }
}

#[derive(Debug)]
enum Terminal {
    Streaming,
    Eof,
    Failed {
        pending: Option<io::Error>,
        kind: io::ErrorKind,
        message: String,
    },
}

impl Terminal {
    fn failed(err: io::Error) -> Self {
        Terminal::Failed {
            kind: err.kind(),
            message: err.to_string(),
            pending: Some(err),
        }
    }
}

/// Consumer side of the double buffer: the active buffer, the read cursor and
/// the terminal status once the stream has ended.
#[derive(Debug)]
pub(crate) struct ActiveBuffer {
    buffer: Buffer,
    cursor: usize,
    terminal: Terminal,
}

impl ActiveBuffer {
    pub(crate) fn new(first: Fill) -> Self {
        let mut active = Self {
            buffer: first.buffer,
            cursor: 0,
            terminal: Terminal::Streaming,
        };
        active.apply(first.status);
        active
    }

    pub(crate) fn slot(&self) -> usize {
        self.buffer.slot()
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.cursor >= self.buffer.capacity() || self.cursor >= self.buffer.filled()
    }

    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self.terminal, Terminal::Streaming)
    }

    /// Valid bytes past the cursor.
    pub(crate) fn unread(&self) -> &[u8] {
        self.buffer.valid_from(self.cursor)
    }

    pub(crate) fn consume(&mut self, count: usize) {
        self.cursor = (self.cursor + count).min(self.buffer.filled());
    }

    /// Copy as much of the unread part of the active buffer as fits in `dst`.
    pub(crate) fn copy_to(&mut self, dst: &mut [u8]) -> usize {
        let available = self.unread();
        let count = available.len().min(dst.len());
        dst[..count].copy_from_slice(&available[..count]);
        self.consume(count);
        count
    }

    /// Make `fill` the active buffer and return the retired one.
    pub(crate) fn install(&mut self, fill: Fill) -> Buffer {
        let retired = std::mem::replace(&mut self.buffer, fill.buffer);
        self.cursor = 0;
        self.apply(fill.status);
        retired
    }

    /// Enter the failed state without a buffer exchange.
    pub(crate) fn fail(&mut self, err: io::Error) {
        self.cursor = self.buffer.filled();
        self.terminal = Terminal::failed(err);
    }

    /// Result of a read that found the stream terminated with nothing copied.
    ///
    /// The original error is returned once, later calls get a copy with the
    /// same kind and message.
    pub(crate) fn report(&mut self) -> io::Result<usize> {
        match &mut self.terminal {
            Terminal::Streaming | Terminal::Eof => Ok(0),
            Terminal::Failed {
                pending,
                kind,
                message,
            } => match pending.take() {
                Some(err) => Err(err),
                None => Err(io::Error::new(*kind, message.clone())),
            },
        }
    }

    fn apply(&mut self, status: FillStatus) {
        self.terminal = match status {
            FillStatus::Filled => Terminal::Streaming,
            FillStatus::Eof => Terminal::Eof,
            FillStatus::Failed(err) => Terminal::failed(err),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(slot: usize, capacity: usize, bytes: &[u8]) -> Fill {
        let mut buffer = Buffer::new(slot, capacity);
        buffer.storage_mut()[..bytes.len()].copy_from_slice(bytes);
        Fill::from_read(buffer, Ok(bytes.len()))
    }

    #[test]
    fn test_fill_from_read_statuses() {
        let fill = Fill::from_read(Buffer::new(0, 8), Ok(5));
        assert_eq!(fill.buffer.filled(), 5);
        assert!(!fill.status.is_terminal());

        let fill = Fill::from_read(Buffer::new(0, 8), Ok(0));
        assert!(matches!(fill.status, FillStatus::Eof));

        let fill = Fill::from_read(
            Buffer::new(0, 8),
            Err(io::Error::new(io::ErrorKind::Other, "boom")),
        );
        assert_eq!(fill.buffer.filled(), 0);
        assert!(matches!(fill.status, FillStatus::Failed(_)));
    }

    #[test]
    fn test_overlong_count_is_clamped() {
        let fill = Fill::from_read(Buffer::new(1, 4), Ok(100));
        assert_eq!(fill.buffer.filled(), 4);
    }

    #[test]
    fn test_copy_respects_fill_count() {
        let mut active = ActiveBuffer::new(filled(0, 8, &[1, 2, 3]));
        let mut dst = [0u8; 2];
        assert_eq!(active.copy_to(&mut dst), 2);
        assert_eq!(dst, [1, 2]);
        assert!(!active.is_exhausted());

        let mut dst = [0u8; 8];
        assert_eq!(active.copy_to(&mut dst), 1);
        assert_eq!(dst[0], 3);
        assert!(active.is_exhausted());
        assert_eq!(active.copy_to(&mut dst), 0);
    }

    #[test]
    fn test_unread_and_consume() {
        let mut active = ActiveBuffer::new(filled(0, 8, &[4, 5, 6]));
        assert_eq!(active.unread(), &[4, 5, 6]);
        active.consume(2);
        assert_eq!(active.unread(), &[6]);
        active.consume(10);
        assert!(active.unread().is_empty());
        assert!(active.is_exhausted());
    }

    #[test]
    fn test_install_resets_cursor_and_returns_retired() {
        let mut active = ActiveBuffer::new(filled(0, 4, &[1, 2, 3, 4]));
        let mut dst = [0u8; 4];
        active.copy_to(&mut dst);

        let retired = active.install(filled(1, 4, &[5, 6]));
        assert_eq!(retired.slot(), 0);
        assert_eq!(active.slot(), 1);
        assert!(!active.is_exhausted());
        assert_eq!(active.copy_to(&mut dst), 2);
        assert_eq!(&dst[..2], &[5, 6]);
    }

    #[test]
    fn test_error_reported_verbatim_once_then_repeated() {
        let fill = Fill::failed(
            Buffer::new(0, 4),
            io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"),
        );
        let mut active = ActiveBuffer::new(fill);
        assert!(active.is_terminal());
        assert!(active.is_exhausted());

        let first = active.report().unwrap_err();
        assert_eq!(first.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(first.to_string(), "reset by peer");

        let again = active.report().unwrap_err();
        assert_eq!(again.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(again.to_string(), "reset by peer");
    }

    #[test]
    fn test_eof_reports_zero() {
        let mut active = ActiveBuffer::new(Fill::from_read(Buffer::new(0, 4), Ok(0)));
        assert!(active.is_terminal());
        assert_eq!(active.report().unwrap(), 0);
        assert_eq!(active.report().unwrap(), 0);
    }

    #[test]
    fn test_fail_marks_exhausted() {
        let mut active = ActiveBuffer::new(filled(0, 4, &[9, 9]));
        active.fail(io::Error::new(io::ErrorKind::Other, "filler gone"));
        assert!(active.is_exhausted());
        assert!(active.is_terminal());
        assert!(active.report().is_err());
    }
}
