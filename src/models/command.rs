//! Command Request and Result Models
//!
//! A [`CommandRequest`] is what a caller submits; a [`CommandResult`] is the
//! single answer it gets back, whether the command ran, timed out, was
//! rejected by policy, or failed inside the session engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A command submitted for execution against the shared shell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Unique identifier, used to correlate log lines
    pub id: String,

    /// Raw command text, written to the shell verbatim
    pub command: String,

    /// Caller-requested timeout
    #[serde(with = "optional_secs")]
    pub timeout: Option<Duration>,

    /// When the request entered the system
    pub enqueued_at: DateTime<Utc>,
}

impl CommandRequest {
    /// Create a request with the default timeout
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            command: command.into(),
            timeout: None,
            enqueued_at: Utc::now(),
        }
    }

    /// Set a timeout in seconds
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Some(Duration::from_secs(secs));
        self
    }

    /// Set an arbitrary timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a timeout from fractional seconds
    ///
    /// Non-finite and non-positive values leave the default in place; values
    /// too large for a `Duration` saturate and are clamped later.
    pub fn with_timeout_secs_f64(mut self, secs: f64) -> Self {
        self.timeout = timeout_from_secs(secs);
        self
    }

    /// Effective timeout: the requested one clamped to `max`, or `max` itself
    pub fn effective_timeout(&self, max: Duration) -> Duration {
        match self.timeout {
            Some(t) if !t.is_zero() => t.min(max),
            _ => max,
        }
    }
}

/// Outcome category of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    /// The command ran to completion (any exit code)
    Success,
    /// The deadline elapsed and the command was interrupted
    Timeout,
    /// Security policy refused the command; it never reached the shell
    Rejected,
    /// The session could not run the command
    Error,
}

/// The single result produced for an accepted or rejected request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub status: CommandStatus,

    /// Exit code, `None` when the command did not finish
    pub exit_code: Option<i32>,

    /// Terminal output with control sequences removed
    pub stdout: String,

    /// Diagnostics from the engine (rejection reason, timeout notice, failures)
    pub stderr: String,

    /// The command as submitted
    pub command: String,

    /// Wall-clock execution time in seconds
    pub execution_time: f64,

    /// Output was capped at the configured maximum
    pub truncated: bool,

    /// When the result was produced
    pub finished_at: DateTime<Utc>,
}

impl CommandResult {
    fn base(status: CommandStatus, command: &str, elapsed: Duration) -> Self {
        Self {
            status,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            command: command.to_string(),
            execution_time: elapsed.as_secs_f64(),
            truncated: false,
            finished_at: Utc::now(),
        }
    }

    /// Command ran and reported an exit code
    pub fn completed(
        command: &str,
        exit_code: i32,
        stdout: String,
        truncated: bool,
        elapsed: Duration,
    ) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout,
            truncated,
            ..Self::base(CommandStatus::Success, command, elapsed)
        }
    }

    /// Command exceeded its deadline
    pub fn timed_out(
        command: &str,
        partial: String,
        truncated: bool,
        limit: Duration,
        elapsed: Duration,
    ) -> Self {
        Self {
            stdout: partial,
            truncated,
            stderr: crate::error::Error::CommandTimeout {
                command: command.to_string(),
                duration: limit,
            }
            .to_string(),
            ..Self::base(CommandStatus::Timeout, command, elapsed)
        }
    }

    /// Policy refused the command
    pub fn rejected(command: &str, reason: impl std::fmt::Display) -> Self {
        Self {
            exit_code: Some(-1),
            stderr: format!("Security validation failed: {}", reason),
            ..Self::base(CommandStatus::Rejected, command, Duration::ZERO)
        }
    }

    /// The session failed while handling the command
    pub fn failed(command: &str, reason: impl std::fmt::Display, partial: String, elapsed: Duration) -> Self {
        Self {
            exit_code: Some(-1),
            stdout: partial,
            stderr: reason.to_string(),
            ..Self::base(CommandStatus::Error, command, elapsed)
        }
    }

    /// Ran and exited 0
    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success && self.exit_code == Some(0)
    }
}

/// Fractional seconds to a timeout, saturating instead of panicking
pub fn timeout_from_secs(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

/// Serialize `Option<Duration>` as fractional seconds
mod optional_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        Ok(secs.and_then(super::timeout_from_secs))
    }
}
