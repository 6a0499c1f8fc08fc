use std::path::PathBuf;
use thiserror::Error;

/// Structural problems inside a single four-line record.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum FormatErrorKind {
    #[error("header line must start with '@'")]
    MissingHeaderSentinel,

    #[error("separator line must start with '+'")]
    MissingSeparatorSentinel,

    #[error("sequence length {seq_len} does not match quality length {qual_len}")]
    LengthMismatch { seq_len: usize, qual_len: usize },
}

#[derive(Debug, Error)]
pub enum QcError {
    #[error("input file not found: {}", .path.display())]
    InputNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated FASTQ record starting at line {line}: found {found} of 4 lines")]
    TruncatedRecord { line: u64, found: u8 },

    #[error("invalid FASTQ format at line {line}: {kind}")]
    Format { line: u64, kind: FormatErrorKind },

    #[error(
        "invalid quality byte {byte} at line {line}, column {column}: below phred offset {offset}"
    )]
    Decode {
        line: u64,
        column: usize,
        byte: u8,
        offset: u8,
    },

    #[error("gzip decompression setup failed: {0}")]
    Decompress(String),

    #[error("processing pipeline failed: {0}")]
    Pipeline(String),
}

impl QcError {
    /// True for every malformed-input failure, quality decoding included.
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            QcError::TruncatedRecord { .. } | QcError::Format { .. } | QcError::Decode { .. }
        )
    }

    pub fn line(&self) -> Option<u64> {
        match self {
            QcError::TruncatedRecord { line, .. }
            | QcError::Format { line, .. }
            | QcError::Decode { line, .. } => Some(*line),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, QcError>;
