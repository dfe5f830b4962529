//! Output formatting for parsed rows and hash tables.
//!
//! Rows are written either as delimited text
//! (`f0|f1|...|EXTRACTS|e0|e1|...`) or as SQLite `INSERT` statements.
//! Hash tables are written in pareto order as `hash|value` lines or as
//! `INSERT INTO <table> VALUES(hash, 'value');` statements.

use std::io::{BufWriter, Write};

use super::buffers::DEFAULT_OUTPUT_BUFFER;
use crate::error::Result;
use crate::hash::HashState;

/// Separates fields from extracted values in delimited output.
pub const EXTRACTS_SEPARATOR: &str = "|EXTRACTS|";

/// Delimiter between a hash and its value in delimited hash output.
pub const HASHES_DELIMITER: &str = "|";

/// Render a delimited row.
pub fn format_row(fields: &[String], extracts: &[String], delimiter: &str) -> String {
    let mut out = fields.join(delimiter);
    out.push_str(EXTRACTS_SEPARATOR);
    out.push_str(&extracts.join(delimiter));
    out
}

fn push_quoted(out: &mut String, value: &str) {
    out.push('\'');
    for c in value.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
}

/// Render a row as `INSERT OR IGNORE INTO <table> VALUES(...);`.
///
/// `fields` are followed by `extracts`. Field values are quoted when their
/// index is in `quote_columns`; extracts are always quoted. The VALUES list
/// holds exactly `columns` entries: longer rows are truncated and shorter
/// rows are padded with `NULL`.
pub fn splits_to_sql(
    columns: usize,
    table: &str,
    fields: &[String],
    extracts: &[String],
    quote_columns: &[usize],
) -> String {
    let mut out = format!("INSERT OR IGNORE INTO {} VALUES(", table);
    let values = fields.iter().chain(extracts.iter()).take(columns);
    let mut written = 0;
    for (i, value) in values.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if i >= fields.len() || quote_columns.contains(&i) {
            push_quoted(&mut out, value);
        } else {
            out.push_str(value);
        }
        written += 1;
    }
    for i in written..columns {
        if i > 0 {
            out.push(',');
        }
        out.push_str("NULL");
    }
    out.push_str(");");
    out
}

/// Render one hash table entry.
pub fn format_hash(hash: &str, value: &str, sql_table: Option<&str>) -> String {
    match sql_table {
        Some(table) => {
            let mut out = format!("INSERT INTO {} VALUES({}, ", table, hash);
            push_quoted(&mut out, value);
            out.push_str(");");
            out
        }
        None => format!("{}{}{}", hash, HASHES_DELIMITER, value),
    }
}

/// Buffered writer for parsed rows and hash tables.
pub struct RowWriter<W: Write> {
    writer: BufWriter<W>,
    rows: usize,
}

impl<W: Write> RowWriter<W> {
    /// Create a new RowWriter with the default 2MB buffer.
    pub fn new(output: W) -> Self {
        Self::with_capacity(DEFAULT_OUTPUT_BUFFER, output)
    }

    pub fn with_capacity(capacity: usize, output: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(capacity, output),
            rows: 0,
        }
    }

    /// Number of lines written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Write a pre-rendered line followed by a newline.
    #[inline]
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.rows += 1;
        Ok(())
    }

    /// Write a delimited row.
    pub fn write_row(&mut self, fields: &[String], extracts: &[String], delimiter: &str) -> Result<()> {
        self.write_line(&format_row(fields, extracts, delimiter))
    }

    /// Write a row as an SQL insert statement.
    pub fn write_sql(
        &mut self,
        columns: usize,
        table: &str,
        fields: &[String],
        extracts: &[String],
        quote_columns: &[usize],
    ) -> Result<()> {
        self.write_line(&splits_to_sql(columns, table, fields, extracts, quote_columns))
    }

    /// Write every hash in `state`, most frequent first.
    ///
    /// With `sql_table` set, each entry is an insert into that table.
    pub fn write_hashes(&mut self, state: &HashState, sql_table: Option<&str>) -> Result<()> {
        for (hash, _, value) in state.pareto() {
            self.write_line(&format_hash(hash, value, sql_table))?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error().into())
    }
}
