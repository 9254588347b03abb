//! Output capture for a single command
//!
//! Raw PTY bytes are normalized through [`ControlSequenceFilter`] and then
//! split two ways: a retained buffer that stops growing at the output cap,
//! and a bounded tail window that the marker is searched in. The stream is
//! consumed to the end either way, so a capped command still completes.

use super::marker::{Marker, StatusBlock, MAX_STATUS_BLOCK_LEN};
use crate::ansi::ControlSequenceFilter;
use crate::pty::StreamMatcher;

/// Size the tail window is trimmed back to
const TAIL_WINDOW: usize = 4 * MAX_STATUS_BLOCK_LEN;

/// What a finished capture produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    /// Output preceding the status block (or everything seen, if none)
    pub output: String,
    /// Output exceeded the cap
    pub truncated: bool,
    /// Parsed status block, if the marker was seen
    pub status: Option<StatusBlock>,
}

/// Incremental matcher and collector for one marker
pub struct OutputCapture<'m> {
    marker: &'m Marker,
    filter: ControlSequenceFilter,
    cap: usize,
    retained: String,
    tail: String,
    /// Absolute offset of `tail[0]` in the normalized stream
    tail_offset: usize,
    total: usize,
    /// Absolute offset of the first non-newline char that did not fit
    first_dropped: Option<usize>,
    found: Option<StatusBlock>,
}

impl<'m> OutputCapture<'m> {
    pub fn new(marker: &'m Marker, cap: usize) -> Self {
        Self {
            marker,
            filter: ControlSequenceFilter::new(),
            cap,
            retained: String::new(),
            tail: String::new(),
            tail_offset: 0,
            total: 0,
            first_dropped: None,
            found: None,
        }
    }

    /// Bytes of normalized text seen so far
    pub fn total_len(&self) -> usize {
        self.total
    }

    fn push_text(&mut self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }

        let room = self.cap.saturating_sub(self.retained.len());
        let kept = prefix_within(text, room);
        self.retained.push_str(kept);
        // Dropped newlines alone are not truncation
        if self.first_dropped.is_none() {
            if let Some(at) = text[kept.len()..].find(|c: char| c != '\r' && c != '\n') {
                self.first_dropped = Some(self.total + kept.len() + at);
            }
        }
        self.total += text.len();

        // A new block must end inside the fresh text, so only the region
        // that can contain it is searched
        let search_from = floor_boundary(
            &self.tail,
            self.tail.len().saturating_sub(MAX_STATUS_BLOCK_LEN),
        );
        self.tail.push_str(text);

        let matched = match self.marker.find_last(&self.tail[search_from..]) {
            Some(mut block) => {
                block.start += self.tail_offset + search_from;
                block.end += self.tail_offset + search_from;
                self.found = Some(block);
                true
            }
            None => false,
        };

        if self.tail.len() > 2 * TAIL_WINDOW {
            let cut = floor_boundary(&self.tail, self.tail.len() - TAIL_WINDOW);
            self.tail.drain(..cut);
            self.tail_offset += cut;
        }

        matched
    }

    /// Consume the capture
    pub fn finish(self) -> Captured {
        let (mut output, truncated) = match &self.found {
            Some(block) => {
                let end = block.start.min(self.retained.len());
                let dropped = self.first_dropped.is_some_and(|at| at < block.start);
                (self.retained[..end].to_string(), dropped)
            }
            None => (self.retained, self.first_dropped.is_some()),
        };
        let trimmed = output.trim_end_matches(['\r', '\n']).len();
        output.truncate(trimmed);

        Captured {
            output,
            truncated,
            status: self.found,
        }
    }
}

impl StreamMatcher for OutputCapture<'_> {
    fn feed(&mut self, chunk: &[u8]) -> bool {
        let text = self.filter.feed(chunk);
        self.push_text(&text)
    }
}

/// Longest prefix of `text` that fits in `limit` bytes without splitting a char
fn prefix_within(text: &str, limit: usize) -> &str {
    &text[..floor_boundary(text, limit)]
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
