//! Execution result types.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::command::Context;
use crate::error::SpawnError;
use crate::output::CapturedOutput;

/// Result of a successful subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Standard output, one trailing newline stripped.
    ///
    /// `None` when stdout was ignored or inherited. Empty when the output
    /// was iterated line by line.
    pub stdout: Option<String>,
    /// Standard error, with the same rules as `stdout`.
    pub stderr: Option<String>,
    /// Both streams in arrival order, `None` when both were suppressed.
    pub output: Option<String>,
    /// Human-readable command, `a | b` for a pipeline.
    pub command: String,
    /// Time since the (first) subprocess started.
    pub duration: Duration,
}

impl Output {
    pub(crate) fn new(captured: CapturedOutput, context: &Context) -> Self {
        Self {
            stdout: captured.stdout,
            stderr: captured.stderr,
            output: captured.output,
            command: context.command().to_owned(),
            duration: context.elapsed(),
        }
    }

    /// Re-label the result with a pipeline context.
    pub(crate) fn in_context(mut self, context: &Context) -> Self {
        self.command = context.command().to_owned();
        self.duration = context.elapsed();
        self
    }

    /// Lines of the captured stdout.
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.as_deref().unwrap_or_default().lines()
    }
}

/// Why a subprocess failed, in decreasing priority.
#[derive(Debug)]
pub(crate) enum Failure {
    /// Reading a stream or waiting for the exit failed.
    Fault(io::Error),
    /// The process was terminated by a signal.
    Signal(String),
    /// The process exited with a non-zero code.
    ExitCode(i32),
}

/// A subprocess that failed to launch, failed, or was terminated.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct SubprocessError {
    /// Description naming the command.
    pub message: String,
    /// Exit code, set only when it is at least 1.
    pub exit_code: Option<i32>,
    /// Name of the terminating signal, such as `SIGTERM`.
    pub signal_name: Option<String>,
    /// Captured stdout, `None` when suppressed or never launched.
    pub stdout: Option<String>,
    /// Captured stderr, `None` when suppressed or never launched.
    pub stderr: Option<String>,
    /// Both streams in arrival order.
    pub output: Option<String>,
    /// Human-readable command, `a | b` for a pipeline.
    pub command: String,
    /// Time since the (first) subprocess started.
    pub duration: Duration,
    /// Underlying error, if any.
    #[source]
    pub cause: Option<Arc<SpawnError>>,
}

impl SubprocessError {
    fn blank(message: String, context: &Context) -> Self {
        Self {
            message,
            exit_code: None,
            signal_name: None,
            stdout: None,
            stderr: None,
            output: None,
            command: context.command().to_owned(),
            duration: context.elapsed(),
            cause: None,
        }
    }

    /// The program could not be started.
    pub(crate) fn launch(context: &Context, error: io::Error) -> Self {
        let mut failure = Self::blank(format!("Command failed: {}", context.command()), context);
        failure.cause = Some(Arc::new(SpawnError::Io(error)));
        failure
    }

    /// A usage or configuration error reported through the result.
    pub(crate) fn usage(context: &Context, cause: SpawnError) -> Self {
        let mut failure = Self::blank(format!("{cause}: {}", context.command()), context);
        failure.cause = Some(Arc::new(cause));
        failure
    }

    /// A subprocess that ran and failed.
    pub(crate) fn failed(context: &Context, failure: Failure, captured: CapturedOutput) -> Self {
        let command = context.command();
        let mut error = match failure {
            Failure::Fault(cause) => {
                let mut error = Self::blank(format!("Command failed: {command}"), context);
                error.cause = Some(Arc::new(SpawnError::Io(cause)));
                error
            }
            Failure::Signal(name) => {
                let mut error = Self::blank(
                    format!("Command was terminated with {name}: {command}"),
                    context,
                );
                error.signal_name = Some(name);
                error
            }
            Failure::ExitCode(code) => {
                let mut error = Self::blank(
                    format!("Command failed with exit code {code}: {command}"),
                    context,
                );
                error.exit_code = (code >= 1).then_some(code);
                error
            }
        };
        error.stdout = captured.stdout;
        error.stderr = captured.stderr;
        error.output = captured.output;
        error
    }

    /// Re-label the failure with a pipeline context.
    pub(crate) fn in_context(mut self, context: &Context) -> Self {
        if self.command != context.command() {
            if let Some(prefix) = self.message.strip_suffix(self.command.as_str()) {
                self.message = format!("{prefix}{}", context.command());
            }
            self.command = context.command().to_owned();
        }
        self.duration = context.elapsed();
        self
    }

    /// Whether the process was terminated by a signal.
    pub fn is_terminated(&self) -> bool {
        self.signal_name.is_some()
    }

    /// Whether the failure comes from a misconfigured pipeline.
    pub fn is_pipeline_config(&self) -> bool {
        self.cause
            .as_deref()
            .is_some_and(SpawnError::is_pipeline_config)
    }
}

/// Terminal record of one stage or pipeline.
pub(crate) type Outcome = Result<Output, SubprocessError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn captured(stdout: &str, stderr: &str) -> CapturedOutput {
        CapturedOutput {
            stdout: Some(stdout.into()),
            stderr: Some(stderr.into()),
            output: Some(format!("{stdout}\n{stderr}")),
        }
    }

    #[test]
    fn test_output_carries_context() {
        let context = Context::new("echo", &["hi"]);
        let output = Output::new(captured("hi", ""), &context);
        assert_eq!(output.command, "echo hi");
        assert_eq!(output.stdout.as_deref(), Some("hi"));
        assert_eq!(output.stdout_lines().collect::<Vec<_>>(), vec!["hi"]);
    }

    #[test]
    fn test_stdout_lines_of_suppressed_stream() {
        let context = Context::new("true", &["x"]);
        let output = Output::new(CapturedOutput::default(), &context);
        assert_eq!(output.stdout_lines().count(), 0);
    }

    #[test]
    fn test_launch_failure_has_no_output() {
        let context = Context::new("missing-program", &["--flag"]);
        let io_err = io::Error::new(io::ErrorKind::NotFound, "not found");
        let err = SubprocessError::launch(&context, io_err);

        assert_eq!(err.to_string(), "Command failed: missing-program --flag");
        assert!(err.stdout.is_none());
        assert!(err.output.is_none());
        assert!(err.exit_code.is_none());
        assert!(err.source().is_some());
    }

    #[test]
    fn test_exit_code_failure() {
        let context = Context::new("sh", &["-c", "exit 2"]);
        let err = SubprocessError::failed(&context, Failure::ExitCode(2), captured("", "oops"));

        assert_eq!(
            err.message,
            "Command failed with exit code 2: sh -c 'exit 2'"
        );
        assert_eq!(err.exit_code, Some(2));
        assert_eq!(err.stderr.as_deref(), Some("oops"));
        assert!(!err.is_terminated());
    }

    #[test]
    fn test_negative_exit_code_not_reported() {
        let context = Context::new("tool", &["x"]);
        let err = SubprocessError::failed(&context, Failure::ExitCode(-1), CapturedOutput::default());
        assert!(err.exit_code.is_none());
        assert!(err.message.contains("exit code -1"));
    }

    #[test]
    fn test_signal_failure() {
        let context = Context::new("sleep", &["10"]);
        let err = SubprocessError::failed(
            &context,
            Failure::Signal("SIGTERM".into()),
            CapturedOutput::empty(true, true),
        );

        assert_eq!(err.to_string(), "Command was terminated with SIGTERM: sleep 10");
        assert_eq!(err.signal_name.as_deref(), Some("SIGTERM"));
        assert!(err.is_terminated());
        assert!(err.exit_code.is_none());
    }

    #[test]
    fn test_fault_failure_keeps_cause() {
        let context = Context::new("cat", &["file"]);
        let fault = io::Error::new(io::ErrorKind::Other, "read failed");
        let err = SubprocessError::failed(&context, Failure::Fault(fault), captured("", ""));

        assert_eq!(err.to_string(), "Command failed: cat file");
        let cause = err.source().unwrap().to_string();
        assert!(cause.contains("read failed"));
    }

    #[test]
    fn test_in_context_rewrites_command() {
        let first = Context::new("printf", &["test"]);
        let pipeline = first.extend("tr", &["a-z", "A-Z"]);
        let err = SubprocessError::failed(&first, Failure::ExitCode(1), captured("", ""))
            .in_context(&pipeline);

        assert_eq!(err.command, "printf test | tr a-z A-Z");
        assert_eq!(
            err.message,
            "Command failed with exit code 1: printf test | tr a-z A-Z"
        );
    }

    #[test]
    fn test_in_context_only_rewrites_trailing_command() {
        let first = Context::new("e", &[] as &[&str]);
        let pipeline = first.extend("cat", &[] as &[&str]);
        let io_err = io::Error::from(io::ErrorKind::NotFound);
        let err = SubprocessError::launch(&first, io_err).in_context(&pipeline);

        assert_eq!(err.message, "Command failed: e | cat");
        assert_eq!(err.command, "e | cat");
    }

    #[test]
    fn test_usage_error_is_pipeline_config() {
        let context = Context::new("cat", &["-"]);
        let err = SubprocessError::usage(&context, SpawnError::UpstreamOutputNotPiped);
        assert!(err.is_pipeline_config());
        assert!(err.message.contains("\"stdout\""));
        assert!(err.message.ends_with("cat -"));
    }
}
