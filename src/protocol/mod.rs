//! Command Protocol Engine
//!
//! Turns the interactive byte stream of a shell into request/response pairs.
//! Each command is followed by a status line carrying a single-use marker
//! (see [`marker`]); the engine reads until that marker's block appears and
//! splits the stream into output, exit code and the shell's new cwd.
//!
//! On timeout the foreground job is interrupted and a second marker is sent
//! as a probe. If the shell answers the probe within the grace window it is
//! ready for the next command; otherwise the engine is marked unusable and
//! the caller is expected to replace the shell. A command whose caller went
//! away mid-flight is interrupted through [`ProtocolEngine::abandon`] and the
//! same probe runs before the next command.

pub mod capture;
pub mod marker;

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::pty::{LivenessProbe, ReadOutcome, ShellTransport};
use capture::{Captured, OutputCapture};
use marker::Marker;

/// Shell setup sent once after spawn: no echo, no prompts
///
/// Canonical mode is switched off too. The line discipline caps a canonical
/// line at 4095 bytes and drops the rest, which would cut long commands short.
const HANDSHAKE_SETUP: &str =
    "stty -echo -icanon min 1 time 0 2>/dev/null; PS1=''; PS2=''; unset PROMPT_COMMAND\n";

/// Per-command limits
#[derive(Debug, Clone, Copy)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    pub max_output_size: usize,
    /// How long an interrupted shell gets to answer the recovery probe
    pub interrupt_grace: Duration,
}

/// How a command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The status block arrived
    Exited(i32),
    /// The deadline passed; `recovered` tells whether the shell answered the probe
    TimedOut { recovered: bool },
    /// The shell went away mid-command
    Closed,
}

/// Output and completion of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub completion: Completion,
    pub output: String,
    pub truncated: bool,
    pub elapsed: Duration,
}

/// Request/response protocol over one shell transport
pub struct ProtocolEngine {
    transport: Box<dyn ShellTransport>,
    cwd: PathBuf,
    usable: bool,
    /// An abandoned command may still be writing; probe before reuse
    pending_recovery: bool,
}

impl ProtocolEngine {
    /// Wrap a freshly spawned shell; call [`ProtocolEngine::handshake`] before use
    pub fn new(transport: Box<dyn ShellTransport>, initial_cwd: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            cwd: initial_cwd.into(),
            usable: true,
            pending_recovery: false,
        }
    }

    /// Quiet the shell and synchronize on an empty round-trip
    ///
    /// Returns the shell's working directory.
    pub async fn handshake(&mut self, timeout: Duration) -> Result<PathBuf> {
        let marker = Marker::new()?;
        let mut payload = String::from(HANDSHAKE_SETUP);
        payload.push_str(&marker.status_line());

        self.transport.write(payload.as_bytes()).map_err(|e| {
            self.usable = false;
            Error::HandshakeFailed {
                reason: e.to_string(),
            }
        })?;

        let mut capture = OutputCapture::new(&marker, 0);
        let outcome = self
            .transport
            .read_until(&mut capture, Instant::now() + timeout)
            .await;

        match (outcome, capture.finish().status) {
            (ReadOutcome::Matched, Some(status)) => {
                debug!("Handshake complete, shell cwd {}", status.cwd.display());
                self.cwd = status.cwd.clone();
                Ok(status.cwd)
            }
            (outcome, _) => {
                self.usable = false;
                Err(Error::HandshakeFailed {
                    reason: match outcome {
                        ReadOutcome::Closed => "shell exited during startup".to_string(),
                        _ => format!("no response within {:?}", timeout),
                    },
                })
            }
        }
    }

    /// Run one command
    ///
    /// Returns `Err` only when nothing could be written to the shell; every
    /// other failure is reported through [`Completion`].
    pub async fn execute(&mut self, command: &str, limits: &ExecutionLimits) -> Result<Execution> {
        if !self.is_usable() {
            return Err(Error::SessionDead {
                reason: "shell is not running".to_string(),
            });
        }

        let started = Instant::now();
        if self.pending_recovery {
            debug!("Resynchronizing after an abandoned command");
            if !self.recover(limits.interrupt_grace).await {
                return Err(Error::SessionDead {
                    reason: "shell did not recover from an abandoned command".to_string(),
                });
            }
        }

        let stale = self.transport.drain_output();
        if stale > 0 {
            debug!("Discarded {} bytes of stale output", stale);
        }

        let marker = Marker::new()?;
        let mut payload = String::with_capacity(command.len() + 96);
        payload.push_str(command);
        if !command.ends_with('\n') {
            payload.push('\n');
        }
        payload.push_str(&marker.status_line());

        if let Err(e) = self.transport.write(payload.as_bytes()) {
            self.usable = false;
            return Err(Error::SessionDead {
                reason: e.to_string(),
            });
        }

        let mut capture = OutputCapture::new(&marker, limits.max_output_size);
        let outcome = self
            .transport
            .read_until(&mut capture, started + limits.timeout)
            .await;
        let Captured {
            output,
            truncated,
            status,
        } = capture.finish();

        let completion = match (outcome, status) {
            (ReadOutcome::Matched, Some(status)) => {
                if status.cwd != self.cwd {
                    debug!("cwd changed to {}", status.cwd.display());
                }
                self.cwd = status.cwd;
                Completion::Exited(status.exit_code)
            }
            (ReadOutcome::Closed, _) => {
                warn!("Shell exited while running a command");
                self.usable = false;
                Completion::Closed
            }
            _ => {
                info!("Command timed out after {:?}", limits.timeout);
                let recovered = self.recover(limits.interrupt_grace).await;
                Completion::TimedOut { recovered }
            }
        };

        Ok(Execution {
            completion,
            output,
            truncated,
            elapsed: started.elapsed(),
        })
    }

    /// Interrupt a command whose caller stopped waiting for it
    ///
    /// Does not wait; the next [`ProtocolEngine::execute`] probes the shell
    /// before writing anything.
    pub fn abandon(&mut self) {
        self.pending_recovery = true;
        if let Err(e) = self.transport.interrupt() {
            warn!("Interrupt of abandoned command failed: {}", e);
            self.usable = false;
        }
    }

    /// Whether a probe is due before the next command
    pub fn needs_recovery(&self) -> bool {
        self.pending_recovery
    }

    /// Interrupt the foreground job and check the shell still answers
    async fn recover(&mut self, grace: Duration) -> bool {
        debug!("Interrupting foreground job");
        if let Err(e) = self.transport.interrupt() {
            warn!("Interrupt failed: {}", e);
            self.usable = false;
            return false;
        }

        let probe = match Marker::new() {
            Ok(probe) => probe,
            Err(e) => {
                error!("Could not build recovery probe: {}", e);
                self.usable = false;
                return false;
            }
        };
        if let Err(e) = self.transport.write(probe.status_line().as_bytes()) {
            warn!("Recovery probe write failed: {}", e);
            self.usable = false;
            return false;
        }

        let mut capture = OutputCapture::new(&probe, 0);
        let outcome = self
            .transport
            .read_until(&mut capture, Instant::now() + grace)
            .await;

        match (outcome, capture.finish().status) {
            (ReadOutcome::Matched, Some(status)) => {
                debug!("Shell recovered after interrupt");
                self.cwd = status.cwd;
                self.pending_recovery = false;
                true
            }
            _ => {
                warn!("Shell did not recover within {:?}", grace);
                self.usable = false;
                false
            }
        }
    }

    /// Last working directory reported by the shell
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// `false` once the shell has exited or failed to recover
    pub fn is_usable(&self) -> bool {
        self.usable && self.transport.is_alive()
    }

    pub fn liveness(&self) -> LivenessProbe {
        self.transport.liveness()
    }

    pub fn pid(&self) -> Option<u32> {
        self.transport.pid()
    }

    /// Stop the underlying shell
    pub async fn terminate(&mut self, grace: Duration) -> Result<()> {
        self.usable = false;
        self.transport.terminate(grace).await
    }
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("cwd", &self.cwd)
            .field("usable", &self.usable)
            .field("pid", &self.transport.pid())
            .finish()
    }
}
