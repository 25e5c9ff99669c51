//! Error types for the codec and entry loaders

use thiserror::Error;

/// Errors raised by the checked codec entry points
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// SPN outside 1..=524287
    #[error("SPN {0} out of range (1..=524287)")]
    SpnOutOfRange(u32),

    /// FMI outside 0..=31
    #[error("FMI {0} out of range (0..=31)")]
    FmiOutOfRange(u32),

    /// Frame is not the expected parameter group
    #[error("unexpected PGN: expected 0x{expected:04X}, got 0x{actual:04X}")]
    UnexpectedPgn { expected: u32, actual: u32 },

    /// Payload does not carry exactly 8 bytes
    #[error("invalid payload length: expected 8 bytes, got {0}")]
    InvalidLength(usize),
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while loading a DTC entry set
#[derive(Debug, Error)]
pub enum LoadError {
    /// Header line lacks a required column
    #[error("missing required column: {0}")]
    MissingColumn(&'static str),

    /// Input has no header line
    #[error("entry source is empty")]
    Empty,

    /// Every data row was rejected
    #[error("no valid entries ({rejected} rows rejected)")]
    NoValidEntries { rejected: usize },

    /// Unknown lamp label
    #[error("invalid lamp value: {0}")]
    InvalidLamp(String),

    /// File extension does not map to a known format
    #[error("unsupported entry format: {0}")]
    UnsupportedFormat(String),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for entry loading
pub type LoadResult<T> = Result<T, LoadError>;
