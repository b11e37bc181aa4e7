//! Control sequence stripping for command tokens.

use vte::{Params, Parser, Perform};

/// Remove terminal control sequences (colors, cursor movement, titles)
/// from a command token.
///
/// Printable text is kept as-is, including tabs and line terminators, so
/// the quoting rules of the command formatter still see them.
pub fn strip_control_sequences(token: &str) -> String {
    if !token.contains(['\x1b', '\u{9b}']) {
        return token.to_owned();
    }

    let mut text = TokenText::default();
    let mut parser = Parser::new();
    parser.advance(&mut text, token.as_bytes());
    text.into_string()
}

/// VTE performer that keeps the printable part of a token.
#[derive(Default)]
struct TokenText {
    bytes: Vec<u8>,
}

impl TokenText {
    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

impl Perform for TokenText {
    fn print(&mut self, c: char) {
        let mut buf = [0u8; 4];
        self.bytes
            .extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    }

    fn execute(&mut self, byte: u8) {
        // C0 controls are not sequences: keep them for the quoting step.
        if byte != 0x1b {
            self.bytes.push(byte);
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}

    fn csi_dispatch(
        &mut self,
        _params: &Params,
        _intermediates: &[u8],
        _ignore: bool,
        _action: char,
    ) {
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, _byte: u8) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_token_untouched() {
        assert_eq!(strip_control_sequences("--verbose"), "--verbose");
    }

    #[test]
    fn test_strip_color_codes() {
        assert_eq!(strip_control_sequences("\x1b[31mred\x1b[0m"), "red");
    }

    #[test]
    fn test_keeps_line_terminators() {
        assert_eq!(strip_control_sequences("\x1b[1ma\nb\x1b[0m"), "a\nb");
        assert_eq!(strip_control_sequences("a\r\nb"), "a\r\nb");
    }

    #[test]
    fn test_strip_osc_title() {
        assert_eq!(
            strip_control_sequences("\x1b]0;Window Title\x07arg"),
            "arg"
        );
    }

    #[test]
    fn test_keeps_multibyte_text() {
        assert_eq!(
            strip_control_sequences("\x1b[32m.\u{1F984}.\x1b[0m"),
            ".\u{1F984}."
        );
    }

    #[test]
    fn test_only_escape_codes() {
        assert_eq!(strip_control_sequences("\x1b[31m\x1b[0m\x1b[2J"), "");
    }
}
