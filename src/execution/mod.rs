//! Subprocess execution engine.
//!
//! This module provides:
//! - Launching with platform normalization
//! - Buffered or line-by-line output consumption
//! - Pipelines with coordinated failure propagation
//!
//! # Example
//!
//! ```no_run
//! use spawnline::invoke;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let output = invoke("printf", ["test"])?
//!     .pipe("tr", ["a-z", "A-Z"])
//!     .await?;
//! assert_eq!(output.stdout.as_deref(), Some("TEST"));
//! # Ok(())
//! # }
//! ```

mod command;
mod escape;
mod launcher;
mod mode;
mod pipeline;
mod result;
mod stage;
mod subprocess;

pub use command::{format_command, Context};
pub use escape::{escape_arguments, is_forced_shell, shell_invocation, Platform};
pub use launcher::{Interpreter, ProcessHandle};
pub use mode::ConsumptionMode;
pub use result::{Output, SubprocessError};
pub use subprocess::Subprocess;

pub(crate) use stage::Stage;
