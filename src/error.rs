//! Error types for spawnline.

use thiserror::Error;

use crate::execution::ConsumptionMode;
use crate::output::OutputSource;

/// Main error type for spawnline operations.
///
/// Failures of a running subprocess are reported as
/// [`SubprocessError`](crate::SubprocessError); this enum covers configuration
/// and usage errors, and is the `cause` attached to a `SubprocessError`.
#[derive(Error, Debug)]
pub enum SpawnError {
    /// Options rejected before anything was launched.
    #[error("invalid options for `{command}`: {reason}")]
    InvalidOptions { command: String, reason: String },

    /// `invoke` was called outside of a tokio runtime.
    #[error("no tokio runtime is running: `{0}` cannot be spawned")]
    NoRuntime(String),

    /// Options file could not be read.
    #[error("failed to read options file: {0}")]
    OptionsFileIo(#[source] std::io::Error),

    /// Options file could not be parsed.
    #[error("failed to parse options file: {0}")]
    OptionsFile(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A line sequence was requested after the output consumption was decided.
    #[error("the output lines must be iterated right away, before the subprocess is awaited")]
    LateIteration,

    /// The line sequence of a stream was already handed out.
    #[error("the {0:?} line sequence was already taken")]
    LinesTaken(OutputSource),

    /// Invalid consumption mode transition attempted.
    #[error("invalid consumption mode transition from {from:?} to {to:?}")]
    InvalidModeTransition {
        from: ConsumptionMode,
        to: ConsumptionMode,
    },

    /// The downstream command of a pipeline does not read from a pipe.
    #[error("the \"stdin\" option must be \"pipe\" on every command after the first one in the pipeline")]
    DownstreamInputNotPiped,

    /// The upstream command of a pipeline does not write to a pipe.
    #[error("the \"stdout\" option must be \"pipe\" on every command before the last one in the pipeline")]
    UpstreamOutputNotPiped,

    /// The upstream output was already consumed when the pipeline was built.
    #[error("the upstream command output was consumed before it could be piped")]
    UpstreamOutputConsumed,

    /// The driver task ended without settling.
    #[error("subprocess task ended before settling")]
    Abandoned,
}

impl SpawnError {
    /// Whether this error comes from a misconfigured pipeline.
    pub fn is_pipeline_config(&self) -> bool {
        matches!(
            self,
            Self::DownstreamInputNotPiped | Self::UpstreamOutputNotPiped | Self::UpstreamOutputConsumed
        )
    }
}

/// Convenience Result type for spawnline operations.
pub type Result<T> = std::result::Result<T, SpawnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_options_display() {
        let err = SpawnError::InvalidOptions {
            command: "ls -la".into(),
            reason: "empty program".into(),
        };
        assert!(err.to_string().contains("ls -la"));
        assert!(err.to_string().contains("empty program"));
    }

    #[test]
    fn test_late_iteration_display() {
        let err = SpawnError::LateIteration;
        assert!(err.to_string().contains("iterated right away"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SpawnError = io_err.into();
        assert!(matches!(err, SpawnError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_pipeline_errors_name_the_end() {
        assert!(SpawnError::DownstreamInputNotPiped
            .to_string()
            .contains("\"stdin\""));
        assert!(SpawnError::UpstreamOutputNotPiped
            .to_string()
            .contains("\"stdout\""));
        assert!(SpawnError::UpstreamOutputConsumed.is_pipeline_config());
        assert!(!SpawnError::LateIteration.is_pipeline_config());
    }

    #[test]
    fn test_lines_taken_display() {
        let err = SpawnError::LinesTaken(OutputSource::Stderr);
        assert!(err.to_string().contains("Stderr"));
    }
}
