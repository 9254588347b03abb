//! PTY Streams
//!
//! Bridges the blocking PTY master to async code with channels: a reader
//! thread forwards output chunks over a tokio channel, a writer thread drains
//! a std channel into the master. Reads are deadline-driven so a silent child
//! can never stall the caller past its deadline.

use crate::error::{Error, Result};
use std::sync::mpsc::Sender as StdSender;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout_at, Instant};

/// Consumer of PTY output used by [`PtyStreams::read_until`]
pub trait StreamMatcher {
    /// Consume a chunk of raw output; return `true` once the awaited pattern has been seen
    fn feed(&mut self, chunk: &[u8]) -> bool;
}

impl<F> StreamMatcher for F
where
    F: FnMut(&[u8]) -> bool,
{
    fn feed(&mut self, chunk: &[u8]) -> bool {
        self(chunk)
    }
}

/// How a [`PtyStreams::read_until`] call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The matcher accepted the stream
    Matched,
    /// The deadline elapsed first
    TimedOut,
    /// The PTY reached EOF (the child exited)
    Closed,
}

/// PTY I/O streams wrapper
pub struct PtyStreams {
    /// Receiver for output bytes from the PTY (stdout and stderr, merged)
    output_rx: UnboundedReceiver<Vec<u8>>,
    /// Sender for input bytes to the PTY (stdin)
    input_tx: StdSender<Vec<u8>>,
    stats: StreamStats,
}

impl PtyStreams {
    /// Create new PTY streams from channels
    pub fn from_channels(output_rx: UnboundedReceiver<Vec<u8>>, input_tx: StdSender<Vec<u8>>) -> Self {
        Self {
            output_rx,
            input_tx,
            stats: StreamStats::default(),
        }
    }

    /// Write data to the PTY stdin
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.input_tx
            .send(data.to_vec())
            .map_err(|e| Error::PtyInputSendFailed {
                reason: e.to_string(),
            })?;
        self.stats.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Feed output chunks to `matcher` until it matches, the deadline passes, or EOF
    pub async fn read_until(
        &mut self,
        matcher: &mut (dyn StreamMatcher + Send),
        deadline: Instant,
    ) -> ReadOutcome {
        loop {
            match timeout_at(deadline, self.output_rx.recv()).await {
                Ok(Some(chunk)) => {
                    self.stats.bytes_read += chunk.len() as u64;
                    self.stats.read_operations += 1;
                    if matcher.feed(&chunk) {
                        return ReadOutcome::Matched;
                    }
                }
                Ok(None) => return ReadOutcome::Closed,
                Err(_) => {
                    self.stats.read_timeouts += 1;
                    return ReadOutcome::TimedOut;
                }
            }
        }
    }

    /// Drain all pending output from the channel (discard it)
    pub fn drain_output(&mut self) -> usize {
        let mut count = 0;
        while let Ok(chunk) = self.output_rx.try_recv() {
            count += chunk.len();
        }
        count
    }

    /// I/O counters since the streams were created
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }
}

/// Stream statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    /// Total bytes read
    pub bytes_read: u64,
    /// Total bytes written
    pub bytes_written: u64,
    /// Number of chunks received
    pub read_operations: u64,
    /// Number of reads that hit their deadline
    pub read_timeouts: u64,
}
