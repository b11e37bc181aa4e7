//! Streaming UTF-8 decoding of output chunks.

/// Incremental UTF-8 decoder.
///
/// A multibyte character split across two reads is held back until the
/// rest of it arrives. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct TextDecoder {
    pending: Vec<u8>,
}

impl TextDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, returning all text that is complete so far.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut text = String::with_capacity(self.pending.len());
        let mut rest = self.pending.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // Validated just above.
                    text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // Incomplete character at the end: wait for more bytes.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let remainder = rest.to_vec();
        self.pending = remainder;
        text
    }

    /// Flush the decoder at end of stream.
    pub fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNICORN: &str = ".\u{1F984}.";

    #[test]
    fn test_ascii_passthrough() {
        let mut decoder = TextDecoder::new();
        assert_eq!(decoder.decode(b"hello\n"), "hello\n");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let bytes = UNICORN.as_bytes();
        let mut decoder = TextDecoder::new();

        let first = decoder.decode(&bytes[..3]);
        let second = decoder.decode(&bytes[3..]);

        assert_eq!(first, ".");
        assert_eq!(format!("{first}{second}"), UNICORN);
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut decoder = TextDecoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_truncated_tail_flushed_lossy() {
        let bytes = UNICORN.as_bytes();
        let mut decoder = TextDecoder::new();
        assert_eq!(decoder.decode(&bytes[..3]), ".");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }
}
