//! Per-line transforms: filter, replace, split, and extract.
//!
//! These are pure functions of a compiled [`RuleSet`] and the line or row
//! being processed. The usual order is
//! [`filter`](RuleSet::filter) → [`replace`](RuleSet::replace) →
//! [`split`](RuleSet::split) → [`extract`](RuleSet::extract).

use chrono::NaiveDateTime;
use regex::Captures;

use crate::error::ScanError;
use crate::rules::{ReplaceKind, RuleSet};

const DATE_TIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d-%H:%M:%S"];

impl RuleSet {
    /// Decide whether a line is dropped.
    ///
    /// Returns true when the negative filter matches, or when a positive
    /// filter is configured and does not match. The negative filter is
    /// checked first.
    pub fn filter(&self, line: &str) -> bool {
        if let Some(negative) = &self.negative_filter {
            if negative.is_match(line) {
                return true;
            }
        }
        if let Some(positive) = &self.positive_filter {
            if !positive.is_match(line) {
                return true;
            }
        }
        false
    }

    /// Apply every replacement in declaration order.
    ///
    /// Each rule sees the output of the rule before it.
    pub fn replace(&self, line: &str) -> String {
        let mut row = line.to_string();
        for rule in &self.replacements {
            row = match &rule.kind {
                ReplaceKind::Template(template) => rule
                    .regex
                    .replace_all(&row, template.as_str())
                    .into_owned(),
                ReplaceKind::UnixEpoch => rule
                    .regex
                    .replace_all(&row, |caps: &Captures| date_time_to_unix_epoch(&caps[0]))
                    .into_owned(),
            };
        }
        row
    }

    /// Split a line on the input delimiter.
    ///
    /// The fields are always returned. When an expected field count is
    /// configured and differs from the actual count, a
    /// [`ScanError::FieldCount`] is returned alongside them.
    pub fn split(&self, line: &str) -> (Vec<String>, Option<ScanError>) {
        let fields: Vec<String> = self
            .input_delimiter
            .split(line)
            .map(str::to_string)
            .collect();

        let expected = self.expected_field_count;
        if expected != 0 && fields.len() != expected {
            let actual = fields.len();
            return (fields, Some(ScanError::FieldCount { expected, actual }));
        }
        (fields, None)
    }

    /// Extract values from split fields, replacing each match with its token.
    ///
    /// Values are ordered by rule, then by column, then by match; this is not
    /// the left-to-right order of the text in the original field.
    ///
    /// Columns past the end of `fields` are skipped. A match that lacks the
    /// configured submatch is recorded as a [`ScanError::Submatch`] and
    /// skipped; the remaining matches are still extracted.
    pub fn extract(&self, fields: &mut [String]) -> (Vec<String>, Vec<ScanError>) {
        let mut values = Vec::new();
        let mut errors = Vec::new();

        for rule in &self.extracts {
            for &column in &rule.columns {
                let Some(field) = fields.get_mut(column) else {
                    continue;
                };

                for caps in rule.regex.captures_iter(field.as_str()) {
                    if rule.submatch >= caps.len() {
                        errors.push(ScanError::Submatch {
                            index: rule.submatch,
                            groups: caps.len(),
                            pattern: rule.regex.as_str().to_string(),
                        });
                        continue;
                    }
                    let value = caps.get(rule.submatch).map_or("", |m| m.as_str());
                    values.push(value.to_string());
                }

                *field = rule
                    .regex
                    .replace_all(field.as_str(), rule.token.as_str())
                    .into_owned();
            }
        }

        (values, errors)
    }
}

/// Convert a `YYYY-MM-DD HH:MM:SS` date-time (UTC) to Unix epoch seconds.
///
/// Text that matches the shape but is not a valid date-time is returned
/// unchanged.
pub fn date_time_to_unix_epoch(input: &str) -> String {
    for format in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(input, format) {
            let mut buf = itoa::Buffer::new();
            return buf.format(dt.and_utc().timestamp()).to_string();
        }
    }
    input.to_string()
}
