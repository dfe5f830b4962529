//! Streaming input and output.
//!
//! This module provides the components that move data through the parser:
//! - Line tokenizing over any byte stream
//! - The background-reading [`Scanner`] and its lifecycle
//! - Delimited and SQL output formatting
//!
//! A scanner holds at most the configured number of lines in flight, so
//! memory use does not grow with input size.

pub mod buffers;
pub mod lines;
pub mod output;
pub mod scanner;

pub use lines::LineReader;
pub use output::{format_row, splits_to_sql, RowWriter, EXTRACTS_SEPARATOR};
pub use scanner::{Scanner, ScannerState};
