//! Whole-string capture of subprocess output.

/// Source of output data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputSource {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl OutputSource {
    /// Stream name as used in options and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Text captured from a subprocess, before or after finalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Standard output, `None` when the stream was suppressed.
    pub stdout: Option<String>,
    /// Standard error, `None` when the stream was suppressed.
    pub stderr: Option<String>,
    /// Both streams in arrival order, `None` when both were suppressed.
    pub output: Option<String>,
}

impl CapturedOutput {
    /// Output of a stage whose streams were not buffered.
    ///
    /// Active streams are present but empty.
    pub fn empty(stdout_active: bool, stderr_active: bool) -> Self {
        Self {
            stdout: stdout_active.then(String::new),
            stderr: stderr_active.then(String::new),
            output: (stdout_active || stderr_active).then(String::new),
        }
    }
}

/// Accumulates decoded output per stream and in combined order.
#[derive(Debug)]
pub struct OutputCollector {
    captured: CapturedOutput,
}

impl OutputCollector {
    /// Create a collector for the active streams.
    pub fn new(stdout_active: bool, stderr_active: bool) -> Self {
        Self {
            captured: CapturedOutput::empty(stdout_active, stderr_active),
        }
    }

    /// Append decoded text from one stream.
    pub fn push(&mut self, source: OutputSource, text: &str) {
        if text.is_empty() {
            return;
        }

        let buffer = match source {
            OutputSource::Stdout => self.captured.stdout.as_mut(),
            OutputSource::Stderr => self.captured.stderr.as_mut(),
        };
        if let Some(buffer) = buffer {
            buffer.push_str(text);
            if let Some(output) = self.captured.output.as_mut() {
                output.push_str(text);
            }
        }
    }

    /// Finalize the buffers, stripping one trailing line terminator each.
    pub fn finish(self) -> CapturedOutput {
        let CapturedOutput {
            stdout,
            stderr,
            output,
        } = self.captured;
        CapturedOutput {
            stdout: stdout.map(strip_final_newline),
            stderr: stderr.map(strip_final_newline),
            output: output.map(strip_final_newline),
        }
    }
}

/// Strip exactly one trailing `\n` or `\r\n`.
pub fn strip_final_newline(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_one_newline_only() {
        assert_eq!(strip_final_newline("a\nb\n".into()), "a\nb");
        assert_eq!(strip_final_newline("a\nb\n\n".into()), "a\nb\n");
        assert_eq!(strip_final_newline("a\r\n".into()), "a");
        assert_eq!(strip_final_newline("a\r".into()), "a\r");
        assert_eq!(strip_final_newline(String::new()), "");
    }

    #[test]
    fn test_collects_per_stream_and_combined() {
        let mut collector = OutputCollector::new(true, true);
        collector.push(OutputSource::Stdout, "one\n");
        collector.push(OutputSource::Stderr, "two\n");
        collector.push(OutputSource::Stdout, "three\n");

        let captured = collector.finish();
        assert_eq!(captured.stdout.as_deref(), Some("one\nthree"));
        assert_eq!(captured.stderr.as_deref(), Some("two"));
        assert_eq!(captured.output.as_deref(), Some("one\ntwo\nthree"));
    }

    #[test]
    fn test_silent_stream_is_empty_not_absent() {
        let captured = OutputCollector::new(true, true).finish();
        assert_eq!(captured.stdout.as_deref(), Some(""));
        assert_eq!(captured.stderr.as_deref(), Some(""));
        assert_eq!(captured.output.as_deref(), Some(""));
    }

    #[test]
    fn test_suppressed_stream_is_absent() {
        let mut collector = OutputCollector::new(false, true);
        collector.push(OutputSource::Stdout, "ignored");
        collector.push(OutputSource::Stderr, "kept\n");

        let captured = collector.finish();
        assert_eq!(captured.stdout, None);
        assert_eq!(captured.stderr.as_deref(), Some("kept"));
        assert_eq!(captured.output.as_deref(), Some("kept"));
    }

    #[test]
    fn test_both_suppressed() {
        assert_eq!(
            OutputCollector::new(false, false).finish(),
            CapturedOutput::default()
        );
    }

    #[test]
    fn test_empty_capture_for_streamed_mode() {
        let captured = CapturedOutput::empty(true, false);
        assert_eq!(captured.stdout.as_deref(), Some(""));
        assert_eq!(captured.stderr, None);
        assert_eq!(captured.output.as_deref(), Some(""));
    }

    #[test]
    fn test_source_names() {
        assert_eq!(OutputSource::Stdout.as_str(), "stdout");
        assert_eq!(OutputSource::Stderr.as_str(), "stderr");
    }
}
