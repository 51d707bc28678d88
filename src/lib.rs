//! Double-buffered read-ahead reader library
//!
//! Wraps a byte source and overlaps its I/O latency with the caller's own
//! processing: while the caller drains one buffer, a background filler reads
//! the next chunk into the other. The two buffers are handed back and forth
//! through a pair of signals, so each one is owned by exactly one side at a
//! time and no lock is needed.
//!
//! Two flavours share the same protocol:
//! - [`DoubleBufferedReader`] for blocking `std::io::Read` sources, backed by
//!   a filler thread
//! - [`AsyncDoubleBufferedReader`] for `tokio::io::AsyncRead` sources, backed
//!   by a filler task

mod buffer;

pub mod async_reader;
pub mod config;
pub mod double_buffered_reader;
pub mod error;
pub mod stats;

// Re-export main types for convenience
pub use async_reader::AsyncDoubleBufferedReader;
pub use config::{parse_buffer_size, ReaderConfig, DEFAULT_BUFFER_SIZE};
pub use double_buffered_reader::DoubleBufferedReader;
pub use error::ReaderError;
pub use stats::ReaderStats;
