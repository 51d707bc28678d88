// config.rs

use crate::error::ReaderError;

/// Default size of each of the two buffers (64 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default name given to the background filler thread
pub const DEFAULT_THREAD_NAME: &str = "dbuf-filler";

/// Configuration for a double-buffered reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Capacity of each buffer, which is also the prefetch granularity
    pub buffer_size: usize,
    /// Name of the filler thread (blocking reader only)
    pub thread_name: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl ReaderConfig {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            ..Self::default()
        }
    }

    /// Name the filler thread. The async reader runs its filler as a task and
    /// ignores this.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Bytes kept resident by a reader using this configuration.
    pub fn footprint(&self) -> usize {
        self.buffer_size.saturating_mul(2)
    }

    pub fn validate(&self) -> Result<(), ReaderError> {
        if self.buffer_size == 0 {
            return Err(ReaderError::InvalidBufferSize);
        }
        Ok(())
    }
}

/// Parse a human readable buffer size
///
/// Accepts plain byte counts ("4096") and binary suffixes, case-insensitive:
/// "64K", "64KB", "64KiB", "13M", "1G".
///
/// # Returns
///
/// * `Result<usize, ReaderError>` - Size in bytes, never zero
pub fn parse_buffer_size(input: &str) -> Result<usize, ReaderError> {
    let lower = input.trim().to_ascii_lowercase();
    let digits_end = lower
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(lower.len());
    let (digits, suffix) = lower.split_at(digits_end);

    if digits.is_empty() {
        return Err(ReaderError::InvalidSize(input.to_string()));
    }

    let value: usize = digits
        .parse()
        .map_err(|_| ReaderError::InvalidSize(input.to_string()))?;

    let multiplier: usize = match suffix.trim() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        "g" | "gb" | "gib" => 1024 * 1024 * 1024,
        _ => return Err(ReaderError::InvalidSize(input.to_string())),
    };

    let size = value
        .checked_mul(multiplier)
        .ok_or_else(|| ReaderError::InvalidSize(input.to_string()))?;

    if size == 0 {
        return Err(ReaderError::InvalidBufferSize);
    }

    Ok(size)
}
