//! Buffer and queue size constants for streaming operations.
//!
//! These constants control memory usage vs I/O throughput tradeoffs.

/// Default output buffer size (2 MB).
pub const DEFAULT_OUTPUT_BUFFER: usize = 2 * 1024 * 1024;

/// Default input buffer size (256 KB).
pub const DEFAULT_INPUT_BUFFER: usize = 256 * 1024;

/// Default line buffer capacity (1 KB).
/// Sufficient for most log lines.
pub const DEFAULT_LINE_BUFFER: usize = 1024;

/// Default capacity of the scanner's data queue, in lines.
pub const DEFAULT_DATA_QUEUE: usize = 100;

/// Default capacity of the scanner's error queue.
pub const DEFAULT_ERROR_QUEUE: usize = 100;

/// Consecutive I/O errors after which the reader gives up on a stream.
pub const MAX_CONSECUTIVE_IO_ERRORS: usize = 8;
