//! logsieve: rule-driven log parsing
//!
//! This library turns semi-structured, human-oriented log files into
//! delimited or SQL records using a JSON rule file of regular expressions.
//!
//! # Features
//!
//! - **Rule-driven**: filter, replace, split, and extract lines with compiled regexes
//! - **Hashing**: collapse the columns that identify an event into one MD5 token
//!   and count tokens for pareto analysis
//! - **Streaming I/O**: a background reader feeds lines through bounded queues
//! - **Parallel processing**: one Rayon task per input file
//!
//! # Example
//!
//! ```rust,no_run
//! use crossbeam_channel::{never, select};
//! use logsieve::{Inputs, Scanner};
//!
//! let inputs = Inputs::from_file("rules.json").unwrap();
//! let mut scanner = Scanner::from_inputs(&inputs).unwrap();
//! scanner.open_file("app.log").unwrap();
//! let (mut lines, mut errors) = scanner.read(100, 100).unwrap();
//!
//! // Drain both queues together; the reader blocks when either one is full.
//! let (mut lines_open, mut errors_open) = (true, true);
//! while lines_open || errors_open {
//!     select! {
//!         recv(lines) -> msg => match msg {
//!             Ok(line) if scanner.filter(&line) => {}
//!             Ok(line) => {
//!                 let line = scanner.replace(&line);
//!                 let (mut fields, _) = scanner.split(&line);
//!                 let (extracts, _) = scanner.extract(&mut fields);
//!                 println!("{}|EXTRACTS|{}", fields.join("|"), extracts.join("|"));
//!             }
//!             Err(_) => {
//!                 lines = never();
//!                 lines_open = false;
//!             }
//!         },
//!         recv(errors) -> msg => match msg {
//!             Ok(err) => eprintln!("{}", err),
//!             Err(_) => {
//!                 errors = never();
//!                 errors_open = false;
//!             }
//!         },
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod hash;
pub mod parallel;
pub mod rules;
pub mod streaming;
pub mod transform;

// Re-export commonly used types
pub use config::Inputs;
pub use error::{Result, ScanError};
pub use hash::{hash, hash8, HashFormat, HashReducer, HashState};
pub use rules::RuleSet;
pub use streaming::{Scanner, ScannerState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{ExtractSpec, Inputs, ReplacementSpec};
    pub use crate::error::{Result, ScanError};
    pub use crate::hash::{HashFormat, HashReducer, HashState};
    pub use crate::parallel::{parse_directory, parse_file, ParseOptions, ParseStats};
    pub use crate::rules::RuleSet;
    pub use crate::streaming::{RowWriter, Scanner, ScannerState};
}
