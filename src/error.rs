// error.rs

use std::io;
use thiserror::Error;

/// Error types for the double-buffered reader
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Buffer size must be greater than zero")]
    InvalidBufferSize,
    #[error("Invalid size: {0}")]
    InvalidSize(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Background fill panicked: {0}")]
    FillPanicked(String),
    #[error("Background filler disconnected")]
    FillerDisconnected,
}

impl From<ReaderError> for io::Error {
    fn from(err: ReaderError) -> Self {
        match err {
            ReaderError::Io(e) => e,
            ReaderError::InvalidBufferSize | ReaderError::InvalidSize(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

/// Extract a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
