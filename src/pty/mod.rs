//! Pseudoterminal (PTY) Management
//!
//! Spawning the shell on a pseudoterminal, deadline-bounded I/O on its
//! master side, and signal delivery for shutdown.

pub mod process;
pub mod signals;
pub mod streams;
pub mod transport;

// Re-exports for convenience
pub use process::{LivenessProbe, PtyProcess, SpawnConfig};
pub use signals::Signal;
pub use streams::{PtyStreams, ReadOutcome, StreamMatcher, StreamStats};
pub use transport::ShellTransport;
