//! Completion markers
//!
//! After each command the engine asks the shell to print a status block:
//!
//! ```text
//! __PSH_<token>__<exit code>__<cwd>__END__
//! ```
//!
//! The token is a fresh random UUID per call. The block is produced by a
//! `printf` format with the token passed as an argument, so the text of the
//! status line itself (if the terminal ever echoes it) never contains the
//! assembled terminator.

use regex::Regex;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::Result;

/// Prefix shared by every status block
pub const MARKER_PREFIX: &str = "__PSH_";

/// Longest status block we expect to see, bounded by PATH_MAX for the cwd
pub const MAX_STATUS_BLOCK_LEN: usize = 4096 + 128;

/// A single-use completion marker
#[derive(Debug, Clone)]
pub struct Marker {
    token: String,
    terminator: Regex,
}

/// Parsed status block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBlock {
    pub exit_code: i32,
    pub cwd: PathBuf,
    /// Byte offset of the block within the searched text
    pub start: usize,
    /// Byte offset just past the block
    pub end: usize,
}

impl Marker {
    /// Generate a marker with an unpredictable token
    pub fn new() -> Result<Self> {
        Self::with_token(Uuid::new_v4().simple().to_string())
    }

    fn with_token(token: String) -> Result<Self> {
        let terminator = Regex::new(&format!(
            r"{}{}__(-?\d+)__([^\n]*)__END__",
            MARKER_PREFIX,
            regex::escape(&token)
        ))?;
        Ok(Self { token, terminator })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Shell line that prints the status block for the previous command
    pub fn status_line(&self) -> String {
        format!(
            "printf '\\n{}%s__%d__%s__END__\\n' {} \"$?\" \"$PWD\"\n",
            MARKER_PREFIX, self.token
        )
    }

    /// Find the last complete status block in `text`
    ///
    /// A block only counts when nothing but whitespace follows it, so a
    /// terminator-shaped string in the middle of command output is ignored.
    pub fn find_last(&self, text: &str) -> Option<StatusBlock> {
        let caps = self.terminator.captures_iter(text).last()?;
        let whole = caps.get(0)?;
        if !text[whole.end()..].trim().is_empty() {
            return None;
        }

        let exit_code = caps[1].parse::<i32>().ok()?;
        Some(StatusBlock {
            exit_code,
            cwd: PathBuf::from(&caps[2]),
            start: whole.start(),
            end: whole.end(),
        })
    }
}
