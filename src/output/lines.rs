//! Line splitting and the line sequence handed to callers.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::{self, BoxStream, Stream, StreamExt};

use crate::execution::SubprocessError;

/// Splits decoded text into lines on `\n` or `\r\n`.
///
/// Text after the last terminator is carried over to the next call.
#[derive(Debug, Default)]
pub struct LineSplitter {
    carry: String,
}

impl LineSplitter {
    /// Create a new splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next piece of text, returning the lines it completes.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.carry.push_str(text);
        let Some(last) = self.carry.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.carry.split_off(last + 1);
        let complete = std::mem::replace(&mut self.carry, rest);
        complete
            .split_terminator('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_owned())
            .collect()
    }

    /// End of stream: the final partial line, if it is not empty.
    pub fn finish(self) -> Option<String> {
        (!self.carry.is_empty()).then_some(self.carry)
    }
}

/// Lazy sequence of output lines from a subprocess.
///
/// Yields `Ok(line)` for each line, then waits for the subprocess to
/// settle and yields one final `Err` if it failed.
///
/// Keep polling until the end, or drop the stream to stop consuming:
/// a stream that is held but no longer polled applies backpressure to
/// the subprocess.
pub struct LineStream {
    inner: BoxStream<'static, Result<String, SubprocessError>>,
    on_first_poll: Option<Box<dyn FnOnce() + Send>>,
}

impl LineStream {
    pub(crate) fn new<F>(
        lines: BoxStream<'static, String>,
        settled: F,
        on_first_poll: impl FnOnce() + Send + 'static,
    ) -> Self
    where
        F: Future<Output = Result<(), SubprocessError>> + Send + 'static,
    {
        let failure = stream::once(settled).filter_map(|settled| async move { settled.err().map(Err) });
        Self {
            inner: lines.map(Ok).chain(failure).boxed(),
            on_first_poll: Some(Box::new(on_first_poll)),
        }
    }
}

impl Stream for LineStream {
    type Item = Result<String, SubprocessError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(hook) = this.on_first_poll.take() {
            hook();
        }
        this.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for LineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineStream")
            .field("started", &self.on_first_poll.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn split_all(chunks: &[&str]) -> Vec<String> {
        let mut splitter = LineSplitter::new();
        let mut lines: Vec<String> = chunks.iter().flat_map(|c| splitter.push(c)).collect();
        lines.extend(splitter.finish());
        lines
    }

    #[test]
    fn test_split_complete_lines() {
        assert_eq!(split_all(&["a\nb\n"]), vec!["a", "b"]);
    }

    #[test]
    fn test_split_crlf() {
        assert_eq!(split_all(&["a\r\nb\r\n"]), vec!["a", "b"]);
    }

    #[test]
    fn test_split_across_chunks() {
        assert_eq!(split_all(&["He", "llo\nWo", "rld"]), vec!["Hello", "World"]);
        assert_eq!(split_all(&["a\r", "\nb"]), vec!["a", "b"]);
    }

    #[test]
    fn test_final_partial_line_only_if_non_empty() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push("a\n"), vec!["a"]);
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_split_keeps_empty_interior_lines() {
        assert_eq!(split_all(&["a\n\nb\n"]), vec!["a", "", "b"]);
    }

    #[test]
    fn test_split_is_lossless() {
        for input in ["a\nb\n", "a\nb", "\n\nx\n", "one\n\n\ntwo\nthree"] {
            let lines = split_all(&[input]);
            let mut rebuilt = lines.join("\n");
            if input.ends_with('\n') {
                rebuilt.push('\n');
            }
            assert_eq!(rebuilt, input);
        }
    }

    #[tokio::test]
    async fn test_line_stream_runs_hook_once_and_ends_on_success() {
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();
        let lines = stream::iter(vec!["a".to_string(), "b".to_string()]).boxed();
        let stream = LineStream::new(lines, async { Ok(()) }, move || {
            assert!(!flag.swap(true, Ordering::SeqCst));
        });

        assert!(!started.load(Ordering::SeqCst));
        let items: Vec<_> = stream.map(|line| line.unwrap()).collect().await;
        assert!(started.load(Ordering::SeqCst));
        assert_eq!(items, vec!["a", "b"]);
    }
}
