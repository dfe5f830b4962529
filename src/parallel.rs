//! Per-file pipeline driver and parallel fan-out using Rayon.
//!
//! [`parse_file`] runs one data file through
//! Filter → Replace → Split → Extract → Reduce and writes the parsed rows and
//! the hash table next to each other in the output directory. Files are
//! written under a `.locked` suffix and renamed when complete, so a consumer
//! polling the output directory never sees a partial file.
//!
//! [`parse_files`] and [`parse_directory`] run many files at once, one rayon
//! task per file. Every file gets its own [`Scanner`] and hash state, so
//! hashes are never shared across files. [`DirectoryWatch`] polls a data
//! directory whose parsed files are moved to a processed directory.

use crossbeam_channel::{never, select};
use rayon::prelude::*;
use regex::Regex;
use rustc_hash::FxHashSet;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, ScanError};
use crate::hash::HashFormat;
use crate::rules::RuleSet;
use crate::streaming::buffers::{DEFAULT_DATA_QUEUE, DEFAULT_ERROR_QUEUE};
use crate::streaming::output::{format_hash, format_row, splits_to_sql, RowWriter};
use crate::streaming::Scanner;

pub const PARSED_SUFFIX: &str = ".parsed.txt";
pub const HASHES_SUFFIX: &str = ".hashes.txt";
pub const LOCKED_SUFFIX: &str = ".locked";

/// Options shared by every file in a run.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Directory that receives `.parsed.txt` and `.hashes.txt` files.
    pub output_dir: PathBuf,
    /// When > 0, rows are written as SQL inserts with this many values.
    pub sql_columns: usize,
    pub sql_data_table: String,
    pub sql_hash_table: String,
    /// Literal unique ID written at the start of every row.
    pub unique_id: Option<String>,
    /// Searched line by line until it matches; the first capture group
    /// becomes the unique ID. Overrides `unique_id`.
    pub unique_id_regex: Option<Regex>,
    /// Echo parsed rows and hashes to stdout.
    pub stdout: bool,
    pub data_buffer: usize,
    pub error_buffer: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            sql_columns: 0,
            sql_data_table: "data".to_string(),
            sql_hash_table: "hash".to_string(),
            unique_id: None,
            unique_id_regex: None,
            stdout: false,
            data_buffer: DEFAULT_DATA_QUEUE,
            error_buffer: DEFAULT_ERROR_QUEUE,
        }
    }
}

impl ParseOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    #[inline]
    pub fn sql_mode(&self) -> bool {
        self.sql_columns > 0
    }

    /// SQL output stores hashes as blobs.
    pub fn hash_format(&self) -> HashFormat {
        if self.sql_mode() {
            HashFormat::Sql
        } else {
            HashFormat::String
        }
    }
}

/// Counters from parsing one or more files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub lines_read: usize,
    pub lines_filtered: usize,
    pub rows_written: usize,
    pub field_count_errors: usize,
    pub extract_errors: usize,
    pub hash_errors: usize,
    pub read_errors: usize,
    pub distinct_hashes: usize,
}

impl ParseStats {
    /// Add another file's counters to these.
    pub fn merge(&mut self, other: &ParseStats) {
        self.lines_read += other.lines_read;
        self.lines_filtered += other.lines_filtered;
        self.rows_written += other.rows_written;
        self.field_count_errors += other.field_count_errors;
        self.extract_errors += other.extract_errors;
        self.hash_errors += other.hash_errors;
        self.read_errors += other.read_errors;
        self.distinct_hashes += other.distinct_hashes;
    }
}

impl fmt::Display for ParseStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lines: {}, Filtered: {}, Rows: {}, Field count errors: {}, Extract errors: {}, \
             Hash errors: {}, Read errors: {}, Hashes: {}",
            self.lines_read,
            self.lines_filtered,
            self.rows_written,
            self.field_count_errors,
            self.extract_errors,
            self.hash_errors,
            self.read_errors,
            self.distinct_hashes
        )
    }
}

/// Files produced for one input file.
#[derive(Debug, Clone)]
pub struct ParseOutput {
    pub parsed: PathBuf,
    /// Only written when hashing is enabled.
    pub hashes: Option<PathBuf>,
    pub stats: ParseStats,
}

fn output_path(dir: &Path, name: &str, suffix: &str, locked: bool) -> PathBuf {
    let mut file_name = format!("{}{}", name, suffix);
    if locked {
        file_name.push_str(LOCKED_SUFFIX);
    }
    dir.join(file_name)
}

/// Per-row state for one file.
struct RowPipeline<'a> {
    scanner: Scanner,
    options: &'a ParseOptions,
    writer: RowWriter<File>,
    /// Unique ID written before each row, once known.
    prefix: Option<String>,
    stats: ParseStats,
}

impl<'a> RowPipeline<'a> {
    fn new(scanner: Scanner, options: &'a ParseOptions, writer: RowWriter<File>) -> Self {
        let prefix = match (&options.unique_id_regex, &options.unique_id) {
            (None, Some(id)) if !id.is_empty() => {
                tracing::info!("unique ID from options: {}", id);
                Some(id.clone())
            }
            _ => None,
        };
        Self {
            scanner,
            options,
            writer,
            prefix,
            stats: ParseStats::default(),
        }
    }

    fn find_unique_id(&mut self, line: &str) {
        let Some(re) = &self.options.unique_id_regex else {
            return;
        };
        if let Some(caps) = re.captures(line) {
            if let Some(m) = caps.get(1).or_else(|| caps.get(0)) {
                tracing::info!("unique ID found via regex: {}", m.as_str());
                self.prefix = Some(m.as_str().to_string());
            }
        }
    }

    fn process_line(&mut self, line: String) -> Result<()> {
        self.stats.lines_read += 1;
        if self.prefix.is_none() {
            self.find_unique_id(&line);
        }

        if self.scanner.filter(&line) {
            self.stats.lines_filtered += 1;
            return Ok(());
        }

        let line = self.scanner.replace(&line);
        let (mut fields, mismatch) = self.scanner.split(&line);
        if let Some(err) = mismatch {
            self.stats.field_count_errors += 1;
            tracing::warn!(
                "{}, fields: {}",
                err,
                fields.join(self.scanner.output_delimiter())
            );
        }

        let (extracts, errors) = self.scanner.extract(&mut fields);
        for err in &errors {
            tracing::warn!("{}", err);
        }
        self.stats.extract_errors += errors.len();

        if self.scanner.hashing_enabled() {
            match self.scanner.reduce(&fields) {
                Ok((reduced, _)) => fields = reduced,
                Err(err) => {
                    self.stats.hash_errors += 1;
                    tracing::warn!("{}", err);
                }
            }
        }

        self.write_row(fields, &extracts)?;
        self.stats.rows_written += 1;
        Ok(())
    }

    fn write_row(&mut self, fields: Vec<String>, extracts: &[String]) -> Result<()> {
        let rules = self.scanner.rules();
        let options = self.options;
        let shifted: Vec<usize>;
        let (values, quote) = match &self.prefix {
            // The unique ID becomes the first value, quoted in SQL output.
            Some(id) => {
                let mut values = Vec::with_capacity(fields.len() + 1);
                values.push(id.clone());
                values.extend(fields);
                shifted = std::iter::once(0)
                    .chain(rules.sql_quote_columns().iter().map(|c| c + 1))
                    .collect();
                (values, shifted.as_slice())
            }
            None => (fields, rules.sql_quote_columns()),
        };

        if options.sql_mode() {
            let table = &options.sql_data_table;
            self.writer
                .write_sql(options.sql_columns, table, &values, extracts, quote)?;
            if options.stdout {
                println!("{}", splits_to_sql(options.sql_columns, table, &values, extracts, quote));
            }
        } else {
            let delimiter = rules.output_delimiter();
            self.writer.write_row(&values, extracts, delimiter)?;
            if options.stdout {
                println!("{}", format_row(&values, extracts, delimiter));
            }
        }
        Ok(())
    }
}

/// Parse one data file into the output directory.
///
/// Row-level problems (field count mismatches, extract errors, unreadable
/// lines) are logged and counted; only failures to open the input or to
/// write the output are returned as errors.
pub fn parse_file(rules: Arc<RuleSet>, data_file: &Path, options: &ParseOptions) -> Result<ParseOutput> {
    let name = data_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ScanError::Config(format!("not a file: {}", data_file.display())))?;

    let mut scanner = Scanner::new(rules).with_hash_format(options.hash_format());
    scanner.open_file(data_file)?;

    let parsed_locked = output_path(&options.output_dir, &name, PARSED_SUFFIX, true);
    tracing::info!("parsed output file: {}", parsed_locked.display());
    let writer = RowWriter::new(File::create(&parsed_locked)?);

    let (data_rx, error_rx) = scanner.read(options.data_buffer, options.error_buffer)?;
    let mut pipeline = RowPipeline::new(scanner, options, writer);

    if options.stdout {
        println!("---------------- PARSED OUTPUT START ----------------");
    }

    // Drain both queues; a closed queue is swapped for one that never fires.
    let (mut data_rx, mut error_rx) = (data_rx, error_rx);
    let (mut data_open, mut errors_open) = (true, true);
    while data_open || errors_open {
        select! {
            recv(data_rx) -> msg => match msg {
                Ok(line) => pipeline.process_line(line)?,
                Err(_) => {
                    data_open = false;
                    data_rx = never();
                }
            },
            recv(error_rx) -> msg => match msg {
                Ok(err) => {
                    pipeline.stats.read_errors += 1;
                    if err.is_row_level() {
                        tracing::warn!("{}: {}", data_file.display(), err);
                    } else {
                        tracing::error!("{}: {}", data_file.display(), err);
                    }
                }
                Err(_) => {
                    errors_open = false;
                    error_rx = never();
                }
            },
        }
    }

    if options.stdout {
        println!("---------------- PARSED OUTPUT END   ----------------");
    }

    let RowPipeline {
        scanner,
        mut writer,
        mut stats,
        ..
    } = pipeline;
    writer.flush()?;
    drop(writer);
    tracing::info!(
        "{}: total lines with unexpected number of fields={}",
        name,
        stats.field_count_errors
    );

    let parsed = output_path(&options.output_dir, &name, PARSED_SUFFIX, false);
    fs::rename(&parsed_locked, &parsed)?;

    let hashes = if scanner.hashing_enabled() {
        stats.distinct_hashes = scanner.hash_state().len();
        Some(write_hashes(&scanner, &name, options)?)
    } else {
        None
    };

    tracing::debug!("{}: {}", name, stats);
    Ok(ParseOutput {
        parsed,
        hashes,
        stats,
    })
}

fn write_hashes(scanner: &Scanner, name: &str, options: &ParseOptions) -> Result<PathBuf> {
    let locked = output_path(&options.output_dir, name, HASHES_SUFFIX, true);
    tracing::info!("hashes output file: {}", locked.display());

    let state = scanner.hash_state();
    let table = options
        .sql_mode()
        .then_some(options.sql_hash_table.as_str());
    let mut writer = RowWriter::new(File::create(&locked)?);
    writer.write_hashes(state, table)?;
    writer.flush()?;
    drop(writer);

    tracing::info!(
        "{}: {} distinct hashes over {} rows",
        name,
        state.len(),
        state.total()
    );
    for (hash, count, value) in state.pareto() {
        tracing::debug!("hash: {}, count: {}, value: {}", hash, count, value);
    }

    if options.stdout {
        println!("---------------- HASHED OUTPUT START   ----------------");
        for (hash, _, value) in state.pareto() {
            println!("{}", format_hash(hash, value, table));
        }
        println!("---------------- HASHED OUTPUT END   ----------------");
    }

    let unlocked = output_path(&options.output_dir, name, HASHES_SUFFIX, false);
    fs::rename(&locked, &unlocked)?;
    Ok(unlocked)
}

/// Parse many files in parallel on the current rayon pool.
///
/// Results are returned in the order of `files`.
pub fn parse_files(
    rules: &Arc<RuleSet>,
    files: &[PathBuf],
    options: &ParseOptions,
) -> Vec<(PathBuf, Result<ParseOutput>)> {
    files
        .par_iter()
        .map(|file| {
            tracing::debug!("parsing {}", file.display());
            let result = parse_file(Arc::clone(rules), file, options);
            (file.clone(), result)
        })
        .collect()
}

/// List the regular files in `dir`, sorted by name.
pub fn list_data_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Parse every file currently in `dir`.
///
/// Failures of individual files are logged and do not stop the others.
pub fn parse_directory(rules: &Arc<RuleSet>, dir: &Path, options: &ParseOptions) -> Result<ParseStats> {
    let files = list_data_files(dir)?;
    let mut total = ParseStats::default();
    for (file, result) in parse_files(rules, &files, options) {
        match result {
            Ok(output) => total.merge(&output.stats),
            Err(err) => tracing::error!("{}: {}", file.display(), err),
        }
    }
    Ok(total)
}

/// Repeated polls of a data directory whose parsed files are moved away.
///
/// A file that is still present after its parse (the parse failed, or the
/// move to the processed directory did) is remembered and skipped by later
/// polls until it disappears.
pub struct DirectoryWatch {
    dir: PathBuf,
    handled: FxHashSet<PathBuf>,
}

impl DirectoryWatch {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            handled: FxHashSet::default(),
        }
    }

    /// Parse the files that appeared since the previous poll.
    pub fn poll(&mut self, rules: &Arc<RuleSet>, options: &ParseOptions) -> Result<ParseStats> {
        self.handled.retain(|path| path.exists());
        let files: Vec<PathBuf> = list_data_files(&self.dir)?
            .into_iter()
            .filter(|file| !self.handled.contains(file))
            .collect();

        let mut total = ParseStats::default();
        for (file, result) in parse_files(rules, &files, options) {
            match result {
                Ok(output) => total.merge(&output.stats),
                Err(err) => tracing::error!("{}: {}", file.display(), err),
            }
            if file.exists() {
                tracing::warn!("{} was not moved; skipping it on later polls", file.display());
                self.handled.insert(file);
            }
        }
        Ok(total)
    }
}
