//! Session State
//!
//! Status of the shared shell as seen by health checks. It lives outside the
//! execution slot behind a short-held lock, so it can be read while a
//! command is running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::pty::LivenessProbe;

/// First backoff delay once the failure threshold is reached
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Longest backoff delay
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Lifecycle state of the shell session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Shell is being spawned
    #[default]
    Starting,
    /// Idle and ready for a command
    Ready,
    /// A command holds the execution slot
    Busy,
    /// Shell exited or failed; replaced on next use
    Dead,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Dead => "dead",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable status shared between callers, the supervisor and health checks
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,

    /// Working directory last reported by the shell
    pub cwd: PathBuf,

    pub last_activity: Instant,
    pub pid: Option<u32>,
    pub spawned_at: Option<DateTime<Utc>>,

    /// Liveness of the current shell, readable without the execution slot
    pub liveness: Option<LivenessProbe>,

    /// Spawn attempts that failed since the last success
    pub consecutive_failures: u32,

    /// No spawn is attempted before this instant
    pub retry_after: Option<Instant>,

    pub commands_executed: u64,
    pub respawns: u64,
}

impl SessionStatus {
    pub fn new(initial_cwd: PathBuf) -> Self {
        Self {
            state: SessionState::Starting,
            cwd: initial_cwd,
            last_activity: Instant::now(),
            pid: None,
            spawned_at: None,
            liveness: None,
            consecutive_failures: 0,
            retry_after: None,
            commands_executed: 0,
            respawns: 0,
        }
    }

    /// Whether the shell process is running right now
    pub fn shell_alive(&self) -> bool {
        self.state != SessionState::Dead
            && self.liveness.as_ref().map(|p| p.is_alive()).unwrap_or(false)
    }

    /// Time since the last command finished
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Record a successful spawn
    pub fn spawned(&mut self, cwd: PathBuf, pid: Option<u32>, liveness: LivenessProbe) {
        if self.spawned_at.is_some() {
            self.respawns += 1;
        }
        self.state = SessionState::Ready;
        self.cwd = cwd;
        self.pid = pid;
        self.spawned_at = Some(Utc::now());
        self.liveness = Some(liveness);
        self.consecutive_failures = 0;
        self.retry_after = None;
        self.touch();
    }

    /// Record a failed spawn and schedule the next attempt
    pub fn spawn_failed(&mut self, threshold: u32) {
        self.mark_dead();
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.retry_after =
            backoff_delay(self.consecutive_failures, threshold).map(|delay| Instant::now() + delay);
    }

    pub fn mark_dead(&mut self) {
        self.state = SessionState::Dead;
        self.pid = None;
        self.liveness = None;
    }

    /// Remaining backoff, if spawning is currently paused
    pub fn backoff_remaining(&self) -> Option<Duration> {
        self.retry_after
            .and_then(|at| at.checked_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }
}

/// Delay before the next spawn after `failures` consecutive failures
///
/// No delay until `threshold` failures, then 1s doubling up to 60s.
pub fn backoff_delay(failures: u32, threshold: u32) -> Option<Duration> {
    if failures < threshold.max(1) {
        return None;
    }
    let exponent = (failures - threshold.max(1)).min(16);
    Some(BACKOFF_BASE.saturating_mul(1 << exponent).min(BACKOFF_CAP))
}

/// Snapshot returned by health checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `healthy` when the shell is running, `degraded` otherwise
    pub status: String,
    pub shell_alive: bool,
    pub security_enabled: bool,
    pub state: SessionState,
    pub queue_depth: usize,
    pub cwd: PathBuf,
    pub pid: Option<u32>,
    pub commands_executed: u64,
    pub respawns: u64,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.shell_alive
    }
}
