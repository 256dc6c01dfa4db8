use std::io;
use thiserror::Error;

/// The primary error type for the `smu-lib` library.
#[derive(Error, Debug)]
pub enum SmuError {
    #[error("Value {value} out of range [{min}, {max}]")]
    Range { value: i64, min: i64, max: i64 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Expected {expected} response field(s), got {actual} in {line:?}")]
    ArityMismatch {
        expected: usize,
        actual: usize,
        line: String,
    },

    #[error("Unterminated frame exceeds {max} bytes ({len} buffered)")]
    FrameTooLong { len: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Timeout waiting for the instrument: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Not connected to an instrument")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, SmuError>;
