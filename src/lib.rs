//! # spawnline
//!
//! Run subprocesses from async Rust with one uniform API.
//!
//! A call to [`invoke`] launches the program right away and returns a
//! [`Subprocess`] handle. Awaiting the handle gives the captured output,
//! iterating it gives lines as they are produced, and piping it chains
//! another program onto its stdout.
//!
//! ## Features
//!
//! - **Structured results**: stdout, stderr, interleaved output, command
//!   string and duration, on success and on failure
//! - **Line iteration**: low-memory consumption through [`LineStream`]
//! - **Pipelines**: `a | b | c` with upstream-first failure reporting
//! - **Cross-platform**: shell forcing and `cmd.exe` escaping on Windows,
//!   `prefer_local` binary lookup everywhere
//!
//! ## Quick Start
//!
//! ```no_run
//! use futures_util::StreamExt;
//! use spawnline::{invoke, invoke_with, Options, NO_ARGS};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Initialize logging
//!     spawnline::logging::try_init().ok();
//!
//!     // Buffered
//!     let output = invoke("echo", ["hello"])?.await?;
//!     println!("{}", output.stdout.unwrap_or_default());
//!
//!     // Line by line
//!     let mut lines = invoke("ls", ["-la"])?.lines()?;
//!     while let Some(line) = lines.next().await {
//!         println!("{}", line?);
//!     }
//!
//!     // Options and pipelines
//!     let options = Options::new().cwd("/tmp").prefer_local(true);
//!     let output = invoke_with("ls", NO_ARGS, options)?
//!         .pipe("wc", ["-l"])
//!         .await?;
//!     println!("{} ({:?})", output.command, output.duration);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod output;

use tokio::runtime::Handle;

// Re-export commonly used types
pub use config::{NativeOptions, Options, Stdio};
pub use error::{Result, SpawnError};
pub use execution::{
    ConsumptionMode, Interpreter, Output, ProcessHandle, Subprocess, SubprocessError,
};
pub use output::{LineStream, OutputSource};

use execution::{Context, Stage};

/// Empty argument list, for programs invoked without arguments.
pub const NO_ARGS: [&str; 0] = [];

/// Launch `program` with default options.
///
/// See [`invoke_with`].
pub fn invoke<I, S>(program: &str, args: I) -> Result<Subprocess>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    invoke_with(program, args, Options::default())
}

/// Launch `program` with `options`.
///
/// Fails immediately only for configuration errors: an empty program,
/// invalid options, or no tokio runtime. Launch failures and everything
/// after are reported by the returned handle.
pub fn invoke_with<I, S>(program: &str, args: I, options: Options) -> Result<Subprocess>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    let context = Context::new(program, &args);
    if Handle::try_current().is_err() {
        return Err(SpawnError::NoRuntime(context.command().to_owned()));
    }

    let stage = Stage::start(program, &args, options, context)?;
    Ok(Subprocess::new(stage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoke_outside_runtime() {
        let err = invoke("echo", ["hi"]).unwrap_err();
        assert!(matches!(err, SpawnError::NoRuntime(ref command) if command == "echo hi"));
    }

    #[tokio::test]
    async fn test_empty_program_rejected() {
        let err = invoke("", NO_ARGS).unwrap_err();
        assert!(matches!(err, SpawnError::InvalidOptions { .. }));
    }

    #[tokio::test]
    async fn test_input_on_stdout_rejected() {
        let options = Options::new().stdout(Stdio::Input("x".into()));
        let err = invoke_with("cat", NO_ARGS, options).unwrap_err();
        match err {
            SpawnError::InvalidOptions { command, reason } => {
                assert_eq!(command, "cat");
                assert!(reason.contains("stdout"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
