//! Rule-set configuration documents.
//!
//! A configuration is a JSON document describing how one type of log file is
//! parsed. Keys use PascalCase, every key is optional, and rule entries may
//! carry a free-text `Comment` that is ignored.
//!
//! ```json
//! {
//!   "InputDelimiter": "\\s\\s+",
//!   "ExpectedFieldCount": 8,
//!   "OutputDelimiter": "|",
//!   "Replacements": [{ "RegexString": "\\s\\s+", "Replacement": "  " }],
//!   "Extracts": [{ "Columns": [7], "RegexString": "(\\()(\\d+)(\\))", "Submatch": 2, "Token": "${1}{}${3}" }],
//!   "HashColumns": [3, 4, 5, 7]
//! }
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, ScanError};

/// Output delimiter used when the document leaves `OutputDelimiter` empty.
pub const DEFAULT_OUTPUT_DELIMITER: &str = "|";

/// An extraction rule as written in the configuration document.
///
/// `Submatch` indexes the capture groups of each match; index 0 is the whole
/// match, so capture groups start at 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ExtractSpec {
    pub columns: Vec<usize>,
    pub regex_string: String,
    pub submatch: usize,
    pub token: String,
    pub comment: Option<String>,
}

/// A line-level replacement rule as written in the configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ReplacementSpec {
    pub regex_string: String,
    pub replacement: String,
    pub comment: Option<String>,
}

/// Raw inputs for one input type, before any regex is compiled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Inputs {
    /// Directory scanned for data files when no single file is given.
    pub data_directory: Option<PathBuf>,
    /// Expected number of fields after splitting; 0 disables the check.
    pub expected_field_count: usize,
    pub extracts: Vec<ExtractSpec>,
    /// Zero-based column indices combined into the row hash.
    pub hash_columns: Vec<usize>,
    pub input_delimiter: String,
    pub negative_filter: String,
    pub output_delimiter: String,
    pub positive_filter: String,
    /// Fully read input files are moved here; unset leaves them in place.
    pub processed_input_directory: Option<PathBuf>,
    pub replacements: Vec<ReplacementSpec>,
    /// Field indices emitted as quoted strings in SQL output.
    pub sql_quote_columns: Vec<usize>,
}

impl Inputs {
    /// Load inputs from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        tracing::debug!("loaded inputs from {}", path.display());
        Self::from_json(&contents)
    }

    /// Parse inputs from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ScanError::Config(e.to_string()))
    }

    /// The output delimiter, falling back to [`DEFAULT_OUTPUT_DELIMITER`].
    pub fn output_delimiter(&self) -> &str {
        if self.output_delimiter.is_empty() {
            DEFAULT_OUTPUT_DELIMITER
        } else {
            &self.output_delimiter
        }
    }
}
