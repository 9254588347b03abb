//! Control sequence normalization
//!
//! Terminal output arrives with cursor movement, color codes, OSC titles and
//! carriage returns mixed in. [`ControlSequenceFilter`] runs the raw bytes
//! through a `vte` state machine and keeps only printable text, newlines and
//! tabs. The parser is stateful, so a sequence split across two PTY reads is
//! still recognized as one sequence.

use vte::{Parser, Perform};

/// Streaming filter that turns raw terminal bytes into plain text
pub struct ControlSequenceFilter {
    parser: Parser,
    sink: PlainText,
}

#[derive(Default)]
struct PlainText {
    text: String,
}

impl Perform for PlainText {
    fn print(&mut self, c: char) {
        self.text.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => self.text.push('\n'),
            b'\t' => self.text.push('\t'),
            // \r, BEL, backspace and the rest carry no text
            _ => {}
        }
    }
}

impl ControlSequenceFilter {
    /// Create a new filter
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            sink: PlainText::default(),
        }
    }

    /// Feed raw bytes and return the plain text they produced
    pub fn feed(&mut self, bytes: &[u8]) -> String {
        self.parser.advance(&mut self.sink, bytes);
        std::mem::take(&mut self.sink.text)
    }

    /// Strip every control sequence from a complete string
    pub fn strip(text: &str) -> String {
        let mut filter = Self::new();
        filter.feed(text.as_bytes())
    }
}

impl Default for ControlSequenceFilter {
    fn default() -> Self {
        Self::new()
    }
}
