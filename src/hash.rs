//! Content hashing for deduplication and pareto analysis.
//!
//! After extraction has scrubbed the variable data out of a row, rows that
//! describe the same kind of event have identical values in their hash
//! columns. [`HashReducer`] digests those columns, replaces them with a single
//! hash token, and counts every hash in a [`HashState`].

use md5::{Digest, Md5};
use rustc_hash::FxHashMap;

use crate::error::{Result, ScanError};
use crate::rules::RuleSet;

/// Textual rendering of a digest.
///
/// `String` renders a quoted hex string (`'0xdeadbeef'`); `Sql` renders a
/// blob literal suitable for SQLite (`x'deadbeef'`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HashFormat {
    #[default]
    String,
    Sql,
}

/// Hex MD5 digest of `input`, rendered in `format`.
pub fn hash(input: &str, format: HashFormat) -> String {
    let digest = hex::encode(Md5::digest(input.as_bytes()));
    match format {
        HashFormat::String => format!("'0x{}'", digest),
        HashFormat::Sql => format!("x'{}'", digest),
    }
}

/// djb2-style 64-bit digest of `input`, rendered in `format`.
///
/// Shorter than [`hash`] at the cost of more collisions.
pub fn hash8(input: &str, format: HashFormat) -> String {
    let mut h: i64 = 0;
    for c in input.chars() {
        h = h.wrapping_mul(33).wrapping_add(c as i64);
    }
    let h = h.unsigned_abs();
    match format {
        HashFormat::String => format!("'0x{:x}'", h),
        HashFormat::Sql => format!("x'{:016x}'", h),
    }
}

/// Hash values and occurrence counts seen by one scanner.
///
/// Entries are only ever added. The first value recorded for a hash is kept,
/// and the count for a hash equals the number of rows that produced it.
#[derive(Debug, Clone, Default)]
pub struct HashState {
    values: FxHashMap<String, String>,
    counts: FxHashMap<String, usize>,
    /// Hashes in first-seen order.
    order: Vec<String>,
}

impl HashState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence of `hash` produced from `value`.
    pub fn record(&mut self, hash: &str, value: &str) {
        if let Some(count) = self.counts.get_mut(hash) {
            *count += 1;
            return;
        }
        self.values.insert(hash.to_string(), value.to_string());
        self.counts.insert(hash.to_string(), 1);
        self.order.push(hash.to_string());
    }

    /// The first value recorded for `hash`.
    pub fn value(&self, hash: &str) -> Option<&str> {
        self.values.get(hash).map(String::as_str)
    }

    /// Number of rows that produced `hash`.
    pub fn count(&self, hash: &str) -> usize {
        self.counts.get(hash).copied().unwrap_or(0)
    }

    /// Number of distinct hashes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Total number of rows recorded.
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Hashes ordered by descending count; ties keep first-seen order.
    pub fn sorted_by_count(&self) -> Vec<&str> {
        let mut hashes: Vec<&str> = self.order.iter().map(String::as_str).collect();
        hashes.sort_by(|a, b| self.counts[*b].cmp(&self.counts[*a]));
        hashes
    }

    /// `(hash, count, value)` in pareto order.
    pub fn pareto(&self) -> impl Iterator<Item = (&str, usize, &str)> + '_ {
        self.sorted_by_count()
            .into_iter()
            .map(move |h| (h, self.counts[h], self.values[h].as_str()))
    }
}

/// Collapses the hash columns of a row into a single hash token.
#[derive(Debug, Clone)]
pub struct HashReducer {
    /// Sorted ascending, no duplicates.
    columns: Vec<usize>,
    delimiter: String,
    format: HashFormat,
}

impl HashReducer {
    pub fn new(columns: &[usize], delimiter: &str, format: HashFormat) -> Self {
        let mut columns = columns.to_vec();
        columns.sort_unstable();
        columns.dedup();
        Self {
            columns,
            delimiter: delimiter.to_string(),
            format,
        }
    }

    /// Build a reducer from a rule set's hash columns and output delimiter.
    pub fn from_rules(rules: &RuleSet, format: HashFormat) -> Self {
        Self::new(rules.hash_columns(), rules.output_delimiter(), format)
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    pub fn format(&self) -> HashFormat {
        self.format
    }

    /// Hash the designated columns of `fields` and return the reduced row.
    ///
    /// The reduced row has the hash columns removed and the hash inserted at
    /// the position of the first (lowest) hash column, so its length is
    /// `fields.len() - columns.len() + 1`. The hash is recorded in `state`.
    pub fn reduce(&self, fields: &[String], state: &mut HashState) -> Result<(Vec<String>, String)> {
        if let Some(&column) = self.columns.iter().find(|&&c| c >= fields.len()) {
            return Err(ScanError::HashColumn {
                column,
                fields: fields.len(),
            });
        }
        if self.columns.is_empty() {
            return Ok((fields.to_vec(), String::new()));
        }

        let hashed: Vec<&str> = self.columns.iter().map(|&c| fields[c].as_str()).collect();
        let value = hashed.join(&self.delimiter);
        let digest = hash(&value, self.format);
        state.record(&digest, &value);

        let first = self.columns[0];
        let mut reduced = Vec::with_capacity(fields.len() - self.columns.len() + 1);
        let mut remaining = self.columns.iter().peekable();
        for (i, field) in fields.iter().enumerate() {
            if remaining.peek() == Some(&&i) {
                remaining.next();
                if i == first {
                    reduced.push(digest.clone());
                }
                continue;
            }
            reduced.push(field.clone());
        }

        Ok((reduced, digest))
    }
}
