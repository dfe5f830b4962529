//! logsieve: rule-driven log parser
//!
//! Usage: logsieve --inputfile <RULES.json> [--datafile <FILE>] [OPTIONS]

use clap::Parser;
use regex::Regex;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use logsieve::config::Inputs;
use logsieve::error::{Result, ScanError};
use logsieve::parallel::{parse_directory, parse_file, DirectoryWatch, ParseOptions};
use logsieve::rules::RuleSet;
use logsieve::streaming::buffers::{DEFAULT_DATA_QUEUE, DEFAULT_ERROR_QUEUE};

const DEFAULT_LOG_FILTER: &str = "logsieve=info";

/// Polls between watch-mode idle messages.
const WATCH_LOG_INTERVAL: u64 = 60;

#[derive(Parser)]
#[command(name = "logsieve")]
#[command(version)]
#[command(
    about = "logsieve: parse log files into delimited or SQL records using JSON rules",
    long_about = None,
    after_help = "Parsed output is written to the output directory using the data file name \
                  with '.parsed.txt' appended; hash tables use '.hashes.txt'."
)]
struct Cli {
    /// Path to the JSON rules file
    #[arg(long = "inputfile", short = 'i')]
    input_file: PathBuf,

    /// Path to a single data file; overrides DataDirectory in the rules file
    #[arg(long = "datafile", short = 'd')]
    data_file: Option<PathBuf>,

    /// Directory for parsed and hash output (default: $HOME/tmp/logsieve)
    #[arg(long, short = 'o')]
    output_dir: Option<PathBuf>,

    /// Number of files processed concurrently from a data directory
    #[arg(long, short = 't', default_value_t = 6)]
    threads: usize,

    /// Also print parsed rows and hashes to stdout
    #[arg(long)]
    stdout: bool,

    /// When > 0, write rows as SQL INSERT statements with this many VALUES
    #[arg(long = "sqlcolumns", default_value_t = 0)]
    sql_columns: usize,

    /// Table receiving parsed rows in SQL output
    #[arg(long = "sqldatatable", default_value = "data")]
    sql_data_table: String,

    /// Table receiving hashes in SQL output
    #[arg(long = "sqlhashtable", default_value = "hash")]
    sql_hash_table: String,

    /// Unique ID written at the start of every parsed row
    #[arg(long = "uniqueid")]
    unique_id: Option<String>,

    /// Regex searched in the input for a unique ID (first capture group); overrides --uniqueid
    #[arg(long = "uniqueidregex")]
    unique_id_regex: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log level for logsieve (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    init_logging(cli.log_file.as_deref(), cli.log_level.as_deref())?;

    let output_dir = cli.output_dir.clone().unwrap_or_else(default_output_dir);
    fs::create_dir_all(&output_dir)?;
    tracing::info!("output being saved to directory: {}", output_dir.display());

    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.threads)
        .build_global()
        .map_err(|e| ScanError::Config(format!("failed to initialize thread pool: {}", e)))?;

    let inputs = Inputs::from_file(&cli.input_file)?;
    let rules = Arc::new(RuleSet::new(&inputs)?);
    let options = parse_options(&cli, output_dir)?;

    match (&cli.data_file, &inputs.data_directory) {
        (Some(file), _) => {
            let output = parse_file(Arc::clone(&rules), file, &options)?;
            tracing::info!("{}: {}", file.display(), output.stats);
        }
        (None, Some(dir)) if !dir.as_os_str().is_empty() => {
            if !dir.is_dir() {
                return Err(ScanError::MissingDirectory {
                    field: "DataDirectory",
                    path: dir.clone(),
                });
            }
            watch_directory(&rules, dir, &options)?;
        }
        _ => {
            return Err(ScanError::Config(
                "no data to parse: pass --datafile or set DataDirectory".to_string(),
            ));
        }
    }

    tracing::info!("logsieve processing complete");
    Ok(())
}

/// Parse everything in `dir`. With a processed directory configured, input
/// files are moved away once parsed and the directory is polled forever;
/// files that cannot be moved are parsed once and then skipped.
fn watch_directory(rules: &Arc<RuleSet>, dir: &Path, options: &ParseOptions) -> Result<()> {
    if rules.processed_directory().is_none() {
        let stats = parse_directory(rules, dir, options)?;
        tracing::info!("{}: {}", dir.display(), stats);
        return Ok(());
    }

    let mut watch = DirectoryWatch::new(dir);
    let mut polls: u64 = 0;
    loop {
        let stats = watch.poll(rules, options)?;
        if stats.lines_read > 0 || polls == 0 {
            tracing::info!("{}: {}", dir.display(), stats);
        }
        thread::sleep(Duration::from_secs(1));
        if polls % WATCH_LOG_INTERVAL == 0 {
            tracing::debug!("waiting to process more input in {}", dir.display());
        }
        polls += 1;
    }
}

fn parse_options(cli: &Cli, output_dir: PathBuf) -> Result<ParseOptions> {
    let unique_id_regex = cli
        .unique_id_regex
        .as_deref()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| ScanError::InvalidRegex {
                field: "uniqueidregex".to_string(),
                source,
            })
        })
        .transpose()?;

    Ok(ParseOptions {
        output_dir,
        sql_columns: cli.sql_columns,
        sql_data_table: cli.sql_data_table.clone(),
        sql_hash_table: cli.sql_hash_table.clone(),
        unique_id: cli.unique_id.clone(),
        unique_id_regex,
        stdout: cli.stdout,
        data_buffer: DEFAULT_DATA_QUEUE,
        error_buffer: DEFAULT_ERROR_QUEUE,
    })
}

fn default_output_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join("tmp")
        .join("logsieve")
}

/// Install the tracing subscriber.
///
/// `--log-level` wins over `RUST_LOG`, which wins over the default filter.
fn init_logging(log_file: Option<&Path>, log_level: Option<&str>) -> Result<()> {
    let filter = match log_level {
        Some(level) => EnvFilter::try_new(format!("logsieve={}", level))
            .map_err(|e| ScanError::Config(format!("invalid log level '{}': {}", level, e)))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
    };

    let (file_layer, stderr_layer) = match log_file {
        Some(path) => {
            let file = File::create(path)?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (Some(layer), None)
        }
        None => (
            None,
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Ok(())
}
