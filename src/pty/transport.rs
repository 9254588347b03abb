//! Shell Transport Abstraction
//!
//! The protocol engine talks to the shell only through [`ShellTransport`],
//! which lets engine and session logic be exercised against a scripted
//! transport in tests while production uses [`PtyProcess`].

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

use super::process::{LivenessProbe, PtyProcess};
use super::streams::{ReadOutcome, StreamMatcher};
use crate::error::Result;

/// Byte-level operations the protocol engine needs from a shell
#[async_trait]
pub trait ShellTransport: Send {
    /// Raw write; no framing is added
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Feed output to `matcher` until it matches, `deadline` passes, or EOF
    async fn read_until(
        &mut self,
        matcher: &mut (dyn StreamMatcher + Send),
        deadline: Instant,
    ) -> ReadOutcome;

    /// Interrupt the foreground job
    fn interrupt(&mut self) -> Result<()>;

    /// Discard buffered output, returning the number of bytes dropped
    fn drain_output(&mut self) -> usize;

    fn is_alive(&self) -> bool;

    /// Handle for checking liveness without holding the transport
    fn liveness(&self) -> LivenessProbe;

    fn pid(&self) -> Option<u32>;

    /// Stop the shell; calling it again is a no-op
    async fn terminate(&mut self, grace: Duration) -> Result<()>;
}

#[async_trait]
impl ShellTransport for PtyProcess {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        PtyProcess::write(self, bytes)
    }

    async fn read_until(
        &mut self,
        matcher: &mut (dyn StreamMatcher + Send),
        deadline: Instant,
    ) -> ReadOutcome {
        PtyProcess::read_until(self, matcher, deadline).await
    }

    fn interrupt(&mut self) -> Result<()> {
        PtyProcess::interrupt(self)
    }

    fn drain_output(&mut self) -> usize {
        PtyProcess::drain_output(self)
    }

    fn is_alive(&self) -> bool {
        PtyProcess::is_alive(self)
    }

    fn liveness(&self) -> LivenessProbe {
        PtyProcess::liveness(self)
    }

    fn pid(&self) -> Option<u32> {
        PtyProcess::pid(self)
    }

    async fn terminate(&mut self, grace: Duration) -> Result<()> {
        PtyProcess::terminate(self, grace).await
    }
}
