//! Error types shared by rule compilation, scanning, and output.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while compiling rules or scanning log data.
///
/// Construction-time variants (`InvalidRegex`, `MissingDirectory`, `Config`)
/// abort before any data is read. The per-row variants (`FieldCount`,
/// `Submatch`, `HashColumn`) are returned alongside usable partial results.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("invalid regex in {field}: {source}")]
    InvalidRegex {
        field: String,
        #[source]
        source: regex::Error,
    },

    #[error("{field} does not exist: {}", path.display())]
    MissingDirectory { field: &'static str, path: PathBuf },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("moving {} to {}: {source}", from.display(), to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("line {line}: invalid UTF-8")]
    InvalidUtf8 { line: usize },

    #[error("Split expectedFieldCount: {expected}, actual: {actual}")]
    FieldCount { expected: usize, actual: usize },

    #[error("submatch index {index} out of range for {groups} submatches, regex: {pattern}")]
    Submatch {
        index: usize,
        groups: usize,
        pattern: String,
    },

    #[error("hash column {column} out of range for {fields} fields")]
    HashColumn { column: usize, fields: usize },

    #[error("scanner is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, ScanError>;

impl ScanError {
    /// True for errors that only affect a single row and leave the stream usable.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            ScanError::FieldCount { .. }
                | ScanError::Submatch { .. }
                | ScanError::HashColumn { .. }
                | ScanError::InvalidUtf8 { .. }
        )
    }
}
