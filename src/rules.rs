//! Compiled rule sets.
//!
//! A [`RuleSet`] is built once per input type from [`Inputs`] and is read-only
//! afterwards. Every regex is compiled eagerly so that a bad pattern fails
//! construction instead of surfacing halfway through a file.

use regex::Regex;
use std::path::PathBuf;

use crate::config::Inputs;
use crate::error::{Result, ScanError};

/// Replacement pattern that triggers date-time to Unix epoch conversion.
///
/// A replacement whose `RegexString` is exactly this pattern replaces every
/// matched `YYYY-MM-DD HH:MM:SS` (or `YYYY-MM-DD-HH:MM:SS`) with its epoch
/// seconds, ignoring the configured replacement template.
pub const DATE_TIME_REGEX: &str = r"(\d{4}-\d{2}-\d{2}[ -]\d{2}:\d{2}:\d{2})";

/// How a replacement rewrites its matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceKind {
    /// Regex template expansion (`$1`, `${name}`).
    Template(String),
    /// Date-time to Unix epoch seconds.
    UnixEpoch,
}

/// A compiled line-level replacement.
#[derive(Debug, Clone)]
pub struct Replacement {
    pub regex: Regex,
    pub kind: ReplaceKind,
}

/// A compiled extraction rule.
#[derive(Debug, Clone)]
pub struct Extract {
    pub columns: Vec<usize>,
    pub regex: Regex,
    pub submatch: usize,
    pub token: String,
}

/// Immutable, fully compiled parsing rules for one input type.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub(crate) input_delimiter: Regex,
    pub(crate) expected_field_count: usize,
    pub(crate) negative_filter: Option<Regex>,
    pub(crate) positive_filter: Option<Regex>,
    pub(crate) replacements: Vec<Replacement>,
    pub(crate) extracts: Vec<Extract>,
    pub(crate) hash_columns: Vec<usize>,
    pub(crate) output_delimiter: String,
    pub(crate) sql_quote_columns: Vec<usize>,
    pub(crate) processed_directory: Option<PathBuf>,
}

fn compile(field: impl Into<String>, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| ScanError::InvalidRegex {
        field: field.into(),
        source,
    })
}

fn compile_filter(field: &'static str, pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    compile(field, pattern).map(Some)
}

impl RuleSet {
    /// Compile a rule set from raw inputs.
    ///
    /// Fails if any pattern does not compile, naming the offending field, or
    /// if a configured processed-input directory does not exist.
    pub fn new(inputs: &Inputs) -> Result<Self> {
        let input_delimiter = compile("InputDelimiter", &inputs.input_delimiter)?;
        let negative_filter = compile_filter("NegativeFilter", &inputs.negative_filter)?;
        let positive_filter = compile_filter("PositiveFilter", &inputs.positive_filter)?;

        let replacements = inputs
            .replacements
            .iter()
            .enumerate()
            .map(|(i, spec)| -> Result<Replacement> {
                let regex = compile(format!("Replacements[{}]", i), &spec.regex_string)?;
                let kind = if spec.regex_string == DATE_TIME_REGEX {
                    ReplaceKind::UnixEpoch
                } else {
                    ReplaceKind::Template(spec.replacement.clone())
                };
                Ok(Replacement { regex, kind })
            })
            .collect::<Result<Vec<_>>>()?;

        // Entries without a pattern only carry comments.
        let extracts = inputs
            .extracts
            .iter()
            .enumerate()
            .filter(|(_, spec)| !spec.regex_string.is_empty())
            .map(|(i, spec)| -> Result<Extract> {
                Ok(Extract {
                    columns: spec.columns.clone(),
                    regex: compile(format!("Extracts[{}]", i), &spec.regex_string)?,
                    submatch: spec.submatch,
                    token: spec.token.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut hash_columns = inputs.hash_columns.clone();
        hash_columns.sort_unstable();
        hash_columns.dedup();

        let processed_directory = match &inputs.processed_input_directory {
            Some(dir) if !dir.as_os_str().is_empty() => {
                if !dir.is_dir() {
                    return Err(ScanError::MissingDirectory {
                        field: "ProcessedInputDirectory",
                        path: dir.clone(),
                    });
                }
                Some(dir.clone())
            }
            _ => None,
        };

        Ok(Self {
            input_delimiter,
            expected_field_count: inputs.expected_field_count,
            negative_filter,
            positive_filter,
            replacements,
            extracts,
            hash_columns,
            output_delimiter: inputs.output_delimiter().to_string(),
            sql_quote_columns: inputs.sql_quote_columns.clone(),
            processed_directory,
        })
    }

    /// Hash columns, sorted ascending without duplicates.
    pub fn hash_columns(&self) -> &[usize] {
        &self.hash_columns
    }

    #[inline]
    pub fn hashing_enabled(&self) -> bool {
        !self.hash_columns.is_empty()
    }

    pub fn output_delimiter(&self) -> &str {
        &self.output_delimiter
    }

    pub fn expected_field_count(&self) -> usize {
        self.expected_field_count
    }

    pub fn sql_quote_columns(&self) -> &[usize] {
        &self.sql_quote_columns
    }

    pub fn processed_directory(&self) -> Option<&PathBuf> {
        self.processed_directory.as_ref()
    }

    pub fn replacements(&self) -> &[Replacement] {
        &self.replacements
    }

    pub fn extracts(&self) -> &[Extract] {
        &self.extracts
    }
}
