//! Error types for binary UI-document operations.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid input to a build-side component (non-UTF-8 bytes, unknown
    /// property id in strict mode). Always fatal at the call site.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The stream is not a UI document this runtime can open at all:
    /// bad magic, or a major version beyond runtime capability.
    #[error("format error: {0}")]
    Format(String),

    /// The stream claims to be a valid document but its content is damaged.
    /// Fatal in strict mode; a diagnostic in lenient mode.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Checksum over the stream does not match the header field.
    #[error("checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Decompression failure or resource exhaustion during decode.
    #[error("resource error: {0}")]
    Resource(String),

    /// Truncated stream while reading.
    #[error("unexpected end of data at offset {offset} (need {need} bytes for {context})")]
    UnexpectedEof {
        offset: usize,
        need: usize,
        context: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
