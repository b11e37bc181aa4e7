//! Command strings and the context threaded through a pipeline.

use std::time::{Duration, Instant};

use crate::output::strip_control_sequences;

/// Render a command as a quoted, human-readable string.
///
/// Used in messages and results only; it is never executed.
pub fn format_command<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(AsRef::as_ref))
        .map(quote_part)
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_part(part: &str) -> String {
    let part = strip_control_sequences(part);
    if part.chars().all(is_plain_char) {
        part
    } else {
        format!("'{}'", part.replace('\'', "'\\''"))
    }
}

fn is_plain_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-')
}

/// Start time and accumulated command string of a stage.
///
/// Each pipeline stage extends the context of the previous one, keeping
/// its start time so the duration covers the whole chain.
#[derive(Debug, Clone)]
pub struct Context {
    start: Instant,
    command: String,
}

impl Context {
    /// Context of the first stage.
    pub fn new<S: AsRef<str>>(program: &str, args: &[S]) -> Self {
        Self {
            start: Instant::now(),
            command: format_command(program, args),
        }
    }

    /// Context of a stage piped after this one.
    pub fn extend<S: AsRef<str>>(&self, program: &str, args: &[S]) -> Self {
        Self {
            start: self.start,
            command: format!("{} | {}", self.command, format_command(program, args)),
        }
    }

    /// The accumulated command string.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Time since the first stage started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
