//! Output processing.
//!
//! This module turns raw subprocess output into text:
//! - Streaming UTF-8 decoding
//! - Whole-string capture per stream and interleaved
//! - Line splitting and line sequences
//! - Control sequence stripping for command strings
//!
//! # Example
//!
//! ```
//! use spawnline::output::{strip_control_sequences, LineSplitter};
//!
//! assert_eq!(strip_control_sequences("\x1b[31mRed text\x1b[0m"), "Red text");
//!
//! let mut splitter = LineSplitter::new();
//! assert_eq!(splitter.push("Hello\r\nWor"), vec!["Hello"]);
//! assert_eq!(splitter.finish().as_deref(), Some("Wor"));
//! ```

mod collector;
mod decoder;
mod lines;
mod sanitizer;

pub use collector::{strip_final_newline, CapturedOutput, OutputCollector, OutputSource};
pub use decoder::TextDecoder;
pub use lines::{LineSplitter, LineStream};
pub use sanitizer::strip_control_sequences;
