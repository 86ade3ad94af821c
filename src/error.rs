//! Error types for SEED volume export and read-back.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    /// Builder or volume configuration rejected before any byte is written.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid export script: {0}")]
    Script(String),

    #[error("export script nests loops {depth} deep, limit is {limit}")]
    LoopDepth { depth: usize, limit: usize },

    /// An object arrived out of the order the volume structure requires.
    #[error("ordering error: {0}")]
    Ordering(String),

    #[error("blockette {code:03} too large: {detail}")]
    Size { code: u16, detail: String },

    #[error("malformed blockette {code:03}: {detail}")]
    Malformed { code: u16, detail: String },

    #[error("unknown blockette type {0}")]
    UnknownBlockette(u16),

    #[error("record too short: expected at least {expected} bytes, got {actual}")]
    RecordTooShort { expected: usize, actual: usize },

    #[error("invalid logical record: {0}")]
    InvalidRecord(String),

    #[error("unsupported encoding format: {0}")]
    UnsupportedEncoding(u8),

    #[error("output sink: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    pub(crate) fn malformed(code: u16, detail: impl Into<String>) -> Self {
        Self::Malformed {
            code,
            detail: detail.into(),
        }
    }

    pub(crate) fn size(code: u16, detail: impl Into<String>) -> Self {
        Self::Size {
            code,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;
