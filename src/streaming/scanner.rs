//! Streaming scanner: one input stream, one background reader.
//!
//! A [`Scanner`] owns an input stream and the [`HashState`] for that stream.
//! [`Scanner::read`] starts a single worker thread that reads the stream line
//! by line and hands lines and errors to the caller over two bounded queues.
//!
//! # Lifecycle
//!
//! `Created` → `Opened` (stream attached) → `Reading` → `Drained`. A
//! scanner closed without being read, or whose reader stopped before the
//! end of its input, ends in `Shutdown` instead of `Drained`.
//!
//! # Queue contract
//!
//! - The worker is the only sender on both queues. Lines arrive in file
//!   order, errors in encounter order, with no ordering between the two.
//! - The worker blocks while either queue is full. Callers must drain both
//!   queues until they close, or drop the receivers to stop the worker.
//! - The data queue closes when the stream is exhausted. The error queue
//!   closes afterwards, once the input file has been closed and, if
//!   configured, moved to the processed directory. A failed move is the
//!   last error delivered.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

use super::buffers::MAX_CONSECUTIVE_IO_ERRORS;
use super::lines::LineReader;
use crate::config::Inputs;
use crate::error::{Result, ScanError};
use crate::hash::{HashFormat, HashReducer, HashState};
use crate::rules::RuleSet;

type Source = Box<dyn Read + Send>;

// Worker outcomes shared through `Scanner::outcome`.
const RUNNING: u8 = 0;
const COMPLETE: u8 = 1;
const ABORTED: u8 = 2;

/// Lifecycle state of a [`Scanner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    Created,
    Opened,
    Reading,
    Drained,
    Shutdown,
}

impl ScannerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScannerState::Created => "created",
            ScannerState::Opened => "opened",
            ScannerState::Reading => "reading",
            ScannerState::Drained => "drained",
            ScannerState::Shutdown => "shut down",
        }
    }
}

impl fmt::Display for ScannerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scans one input stream with a compiled [`RuleSet`].
pub struct Scanner {
    rules: Arc<RuleSet>,
    reducer: HashReducer,
    hashes: HashState,
    source: Option<LineReader<Source>>,
    path: Option<PathBuf>,
    state: ScannerState,
    outcome: Arc<AtomicU8>,
}

impl Scanner {
    /// Create a scanner for rules shared with other scanners.
    pub fn new(rules: Arc<RuleSet>) -> Self {
        let reducer = HashReducer::from_rules(&rules, HashFormat::String);
        Self {
            rules,
            reducer,
            hashes: HashState::new(),
            source: None,
            path: None,
            state: ScannerState::Created,
            outcome: Arc::new(AtomicU8::new(RUNNING)),
        }
    }

    /// Compile `inputs` and create a scanner for them.
    pub fn from_inputs(inputs: &Inputs) -> Result<Self> {
        Ok(Self::new(Arc::new(RuleSet::new(inputs)?)))
    }

    /// Set how hashes are rendered by [`reduce`](Self::reduce).
    pub fn with_hash_format(mut self, format: HashFormat) -> Self {
        self.reducer = HashReducer::from_rules(&self.rules, format);
        self
    }

    fn expect_state(&self, expected: ScannerState) -> Result<()> {
        let actual = self.state();
        if actual != expected {
            return Err(ScanError::InvalidState {
                expected: expected.as_str(),
                actual: actual.as_str(),
            });
        }
        Ok(())
    }

    /// Open a file for scanning.
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.expect_state(ScannerState::Created)?;
        let path = path.as_ref();
        let file = File::open(path)?;
        tracing::debug!("opened {}", path.display());
        self.source = Some(LineReader::new(Box::new(file)));
        self.path = Some(path.to_path_buf());
        self.state = ScannerState::Opened;
        Ok(())
    }

    /// Open any reader for scanning. Streams opened this way are never moved
    /// to the processed directory.
    pub fn open_reader<R: Read + Send + 'static>(&mut self, reader: R) -> Result<()> {
        self.expect_state(ScannerState::Created)?;
        self.source = Some(LineReader::new(Box::new(reader)));
        self.state = ScannerState::Opened;
        Ok(())
    }

    /// Start the background reader.
    ///
    /// Returns the data and error receivers, bounded to `data_buffer` lines
    /// and `error_buffer` errors. See the module docs for the queue contract.
    pub fn read(
        &mut self,
        data_buffer: usize,
        error_buffer: usize,
    ) -> Result<(Receiver<String>, Receiver<ScanError>)> {
        self.start(data_buffer, error_buffer, spawn_reader)
    }

    fn start<F>(
        &mut self,
        data_buffer: usize,
        error_buffer: usize,
        spawn: F,
    ) -> Result<(Receiver<String>, Receiver<ScanError>)>
    where
        F: FnOnce(ReadWorker, Sender<String>, Sender<ScanError>) -> io::Result<()>,
    {
        self.expect_state(ScannerState::Opened)?;
        let source = self.source.take().ok_or(ScanError::InvalidState {
            expected: ScannerState::Opened.as_str(),
            actual: ScannerState::Shutdown.as_str(),
        })?;

        let (data_tx, data_rx) = bounded(data_buffer);
        let (error_tx, error_rx) = bounded(error_buffer);
        let worker = ReadWorker {
            source,
            path: self.path.clone(),
            processed_directory: self.rules.processed_directory().cloned(),
            outcome: Arc::clone(&self.outcome),
        };

        // The stream now belongs to the worker; if it cannot start, there is
        // nothing left to read.
        self.state = ScannerState::Shutdown;
        spawn(worker, data_tx, error_tx)?;
        self.state = ScannerState::Reading;
        Ok((data_rx, error_rx))
    }

    /// Close the input if it is still attached.
    ///
    /// Idempotent. A scanner that has started reading closes its input when
    /// the worker finishes, so this only matters for scanners that were
    /// opened but never read.
    pub fn shutdown(&mut self) {
        if self.source.take().is_some() {
            tracing::debug!("scanner shut down before reading");
        }
        if matches!(self.state, ScannerState::Created | ScannerState::Opened) {
            self.state = ScannerState::Shutdown;
        }
    }

    pub fn state(&self) -> ScannerState {
        if self.state != ScannerState::Reading {
            return self.state;
        }
        match self.outcome.load(Ordering::Acquire) {
            COMPLETE => ScannerState::Drained,
            ABORTED => ScannerState::Shutdown,
            _ => ScannerState::Reading,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Path of the opened file, if the scanner was opened from a file.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn hashing_enabled(&self) -> bool {
        self.rules.hashing_enabled()
    }

    pub fn output_delimiter(&self) -> &str {
        self.rules.output_delimiter()
    }

    pub fn hash_state(&self) -> &HashState {
        &self.hashes
    }

    pub fn filter(&self, line: &str) -> bool {
        self.rules.filter(line)
    }

    pub fn replace(&self, line: &str) -> String {
        self.rules.replace(line)
    }

    pub fn split(&self, line: &str) -> (Vec<String>, Option<ScanError>) {
        self.rules.split(line)
    }

    pub fn extract(&self, fields: &mut [String]) -> (Vec<String>, Vec<ScanError>) {
        self.rules.extract(fields)
    }

    /// Collapse the hash columns of `fields`, counting the hash in this
    /// scanner's [`HashState`].
    pub fn reduce(&mut self, fields: &[String]) -> Result<(Vec<String>, String)> {
        self.reducer.reduce(fields, &mut self.hashes)
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Everything the background reader owns.
struct ReadWorker {
    source: LineReader<Source>,
    path: Option<PathBuf>,
    processed_directory: Option<PathBuf>,
    outcome: Arc<AtomicU8>,
}

fn spawn_reader(
    worker: ReadWorker,
    data_tx: Sender<String>,
    error_tx: Sender<ScanError>,
) -> io::Result<()> {
    thread::Builder::new()
        .name("logsieve-reader".to_string())
        .spawn(move || worker.run(data_tx, error_tx))
        .map(drop)
}

impl ReadWorker {
    fn run(mut self, data_tx: Sender<String>, error_tx: Sender<ScanError>) {
        let mut lines = 0usize;
        let mut errors = 0usize;
        let mut consecutive_io = 0usize;
        let mut complete = true;

        while let Some(result) = self.source.next() {
            match result {
                Ok(line) => {
                    consecutive_io = 0;
                    lines += 1;
                    if data_tx.send(line).is_err() {
                        tracing::debug!("data receiver dropped after {} lines", lines);
                        complete = false;
                        break;
                    }
                }
                Err(err) => {
                    errors += 1;
                    let is_io = matches!(err, ScanError::Io(_));
                    consecutive_io = if is_io { consecutive_io + 1 } else { 0 };
                    // A dropped error receiver does not stop the data stream.
                    let _ = error_tx.send(err);
                    if consecutive_io >= MAX_CONSECUTIVE_IO_ERRORS {
                        tracing::debug!("giving up after {} consecutive I/O errors", consecutive_io);
                        complete = false;
                        break;
                    }
                }
            }
        }
        drop(data_tx);

        let ReadWorker {
            source,
            path,
            processed_directory,
            outcome,
        } = self;
        let line_number = source.line_number();
        // Close the input before moving it.
        drop(source);

        if complete {
            if let (Some(path), Some(dir)) = (path.as_deref(), processed_directory.as_deref()) {
                match relocate(path, dir) {
                    Ok(dest) => tracing::debug!("moved {} to {}", path.display(), dest.display()),
                    Err(err) => {
                        errors += 1;
                        let _ = error_tx.send(err);
                    }
                }
            }
        }

        outcome.store(if complete { COMPLETE } else { ABORTED }, Ordering::Release);
        tracing::debug!(
            "reader finished at line {}: {} lines sent, {} errors",
            line_number,
            lines,
            errors
        );
    }
}

/// Move `path` into `dir`, keeping its file name.
fn relocate(path: &Path, dir: &Path) -> Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| ScanError::Move {
        from: path.to_path_buf(),
        to: dir.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
    })?;
    let dest = dir.join(name);
    fs::rename(path, &dest).map_err(|source| ScanError::Move {
        from: path.to_path_buf(),
        to: dest.clone(),
        source,
    })?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    fn scanner() -> Scanner {
        let inputs = Inputs {
            input_delimiter: r"\s\s+".to_string(),
            ..Default::default()
        };
        Scanner::from_inputs(&inputs).unwrap()
    }

    fn drain(data: Receiver<String>, errors: Receiver<ScanError>) -> (Vec<String>, Vec<ScanError>) {
        let lines: Vec<String> = data.iter().collect();
        let errors: Vec<ScanError> = errors.iter().collect();
        (lines, errors)
    }

    #[test]
    fn test_read_in_order_with_small_queue() {
        let input: String = (0..500).map(|i| format!("line {}\n", i)).collect();
        let mut scnr = scanner();
        scnr.open_reader(Cursor::new(input.into_bytes())).unwrap();
        let (data, errors) = scnr.read(1, 1).unwrap();

        let (lines, errors) = drain(data, errors);
        assert!(errors.is_empty());
        assert_eq!(lines.len(), 500);
        for (i, line) in lines.iter().enumerate() {
            assert_eq!(line, &format!("line {}", i));
        }
        assert_eq!(scnr.state(), ScannerState::Drained);
    }

    #[test]
    fn test_read_errors_do_not_stop_stream() {
        let mut scnr = scanner();
        scnr.open_reader(Cursor::new(b"a\n\xff\nb\n".to_vec())).unwrap();
        let (data, errors) = scnr.read(10, 10).unwrap();

        let (lines, errors) = drain(data, errors);
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ScanError::InvalidUtf8 { line: 2 }));
    }

    #[test]
    fn test_open_missing_file() {
        let mut scnr = scanner();
        let err = scnr.open_file("/nonexistent/data.log").unwrap_err();
        assert!(matches!(err, ScanError::Io(_)));
        assert_eq!(scnr.state(), ScannerState::Created);
    }

    #[test]
    fn test_read_requires_open() {
        let mut scnr = scanner();
        let err = scnr.read(1, 1).unwrap_err();
        assert!(matches!(
            err,
            ScanError::InvalidState {
                expected: "opened",
                actual: "created"
            }
        ));
    }

    #[test]
    fn test_read_twice_fails() {
        let mut scnr = scanner();
        scnr.open_reader(Cursor::new(b"x\n".to_vec())).unwrap();
        let (data, errors) = scnr.read(1, 1).unwrap();
        assert!(scnr.read(1, 1).is_err());
        drain(data, errors);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "x").unwrap();
        let mut scnr = scanner();
        scnr.open_file(file.path()).unwrap();
        assert_eq!(scnr.state(), ScannerState::Opened);

        scnr.shutdown();
        scnr.shutdown();
        assert_eq!(scnr.state(), ScannerState::Shutdown);
        assert!(scnr.read(1, 1).is_err());
    }

    #[test]
    fn test_read_then_move() {
        let source_dir = tempfile::tempdir().unwrap();
        let processed_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("test_read.txt");
        let contents = b"first line\nsecond line\n";
        fs::write(&source, contents).unwrap();

        let inputs = Inputs {
            input_delimiter: r"\s\s+".to_string(),
            processed_input_directory: Some(processed_dir.path().to_path_buf()),
            ..Default::default()
        };
        let mut scnr = Scanner::from_inputs(&inputs).unwrap();
        scnr.open_file(&source).unwrap();
        let (data, errors) = scnr.read(1, 1).unwrap();
        let (lines, errors) = drain(data, errors);

        assert_eq!(lines, vec!["first line", "second line"]);
        assert!(errors.is_empty());
        assert!(!source.exists());
        let moved = fs::read(processed_dir.path().join("test_read.txt")).unwrap();
        assert_eq!(moved, contents);
    }

    #[test]
    fn test_move_failure_reported_after_data() {
        let source_dir = tempfile::tempdir().unwrap();
        let processed_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("data.log");
        fs::write(&source, "x\n").unwrap();

        let inputs = Inputs {
            processed_input_directory: Some(processed_dir.path().to_path_buf()),
            ..Default::default()
        };
        let mut scnr = Scanner::from_inputs(&inputs).unwrap();
        scnr.open_file(&source).unwrap();
        // Make the destination unusable after construction.
        fs::remove_dir(processed_dir.path()).unwrap();

        let (data, errors) = scnr.read(1, 1).unwrap();
        let (lines, errors) = drain(data, errors);
        assert_eq!(lines, vec!["x"]);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ScanError::Move { .. }));
        assert!(source.exists());
    }

    #[test]
    fn test_dropping_data_receiver_stops_worker_without_move() {
        let source_dir = tempfile::tempdir().unwrap();
        let processed_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("big.log");
        let input: String = (0..1000).map(|i| format!("{}\n", i)).collect();
        fs::write(&source, input).unwrap();

        let inputs = Inputs {
            processed_input_directory: Some(processed_dir.path().to_path_buf()),
            ..Default::default()
        };
        let mut scnr = Scanner::from_inputs(&inputs).unwrap();
        scnr.open_file(&source).unwrap();
        let (data, errors) = scnr.read(1, 1).unwrap();
        assert_eq!(data.recv().unwrap(), "0");
        drop(data);

        // The error queue closes once the worker has exited.
        assert!(errors.iter().next().is_none());
        assert!(source.exists());
        assert_eq!(scnr.state(), ScannerState::Shutdown);
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device gone"))
        }
    }

    #[test]
    fn test_repeated_io_errors_end_in_shutdown() {
        let mut scnr = scanner();
        scnr.open_reader(BrokenReader).unwrap();
        let (data, errors) = scnr.read(1, MAX_CONSECUTIVE_IO_ERRORS + 1).unwrap();

        let (lines, errors) = drain(data, errors);
        assert!(lines.is_empty());
        assert_eq!(errors.len(), MAX_CONSECUTIVE_IO_ERRORS);
        assert!(errors.iter().all(|e| matches!(e, ScanError::Io(_))));
        assert_eq!(scnr.state(), ScannerState::Shutdown);
    }

    #[test]
    fn test_failed_spawn_leaves_scanner_shut_down() {
        let mut scnr = scanner();
        scnr.open_reader(Cursor::new(b"x\n".to_vec())).unwrap();

        let err = scnr
            .start(1, 1, |_, _, _| {
                Err(io::Error::new(io::ErrorKind::Other, "no threads left"))
            })
            .unwrap_err();
        assert!(matches!(err, ScanError::Io(_)));
        assert_eq!(scnr.state(), ScannerState::Shutdown);

        let err = scnr.read(1, 1).unwrap_err();
        assert!(matches!(
            err,
            ScanError::InvalidState {
                expected: "opened",
                actual: "shut down"
            }
        ));
    }

    #[test]
    fn test_reduce_uses_scanner_state() {
        let inputs = Inputs {
            input_delimiter: ",".to_string(),
            hash_columns: vec![1],
            ..Default::default()
        };
        let mut scnr = Scanner::from_inputs(&inputs)
            .unwrap()
            .with_hash_format(HashFormat::Sql);
        let (fields, _) = scnr.split("a,b,c");
        let (reduced, digest) = scnr.reduce(&fields).unwrap();
        let (fields, _) = scnr.split("x,b,z");
        scnr.reduce(&fields).unwrap();

        assert!(digest.starts_with("x'"));
        assert_eq!(reduced, vec!["a".to_string(), digest.clone(), "c".to_string()]);
        assert_eq!(scnr.hash_state().count(&digest), 2);
        assert_eq!(scnr.hash_state().value(&digest), Some("b"));
    }
}
