//! Security Audit Logging
//!
//! Audit trail for policy decisions and session lifecycle events. Every
//! entry is emitted under the `audit` tracing target so it can be routed
//! separately from debug logs.
//!
//! ## Security Policy
//!
//! - Command text is sanitized before logging (control characters removed,
//!   length capped) to prevent log injection
//! - Use INFO level for accepted commands and lifecycle events, WARN for
//!   rejected commands
//!
//! ## Events Logged
//!
//! - Commands accepted and rejected by policy (reason, command, timestamp)
//! - Session resets and respawns
//! - Configuration loads/errors

use chrono::{DateTime, Utc};

/// Longest command excerpt written to the audit log
const MAX_LOGGED_COMMAND_LEN: usize = 512;

/// Security audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    /// A command passed the security policy
    CommandValidated,
    /// A command was refused by the security policy
    CommandRejected,
    /// The session was explicitly reset by a caller
    SessionReset,
    /// A dead or idle session was replaced with a fresh shell
    SessionRespawned,
    /// Configuration file loaded
    ConfigLoaded,
    /// Configuration file error
    ConfigError,
}

impl SecurityEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> &'static str {
        match self {
            SecurityEvent::CommandValidated => "Command validated",
            SecurityEvent::CommandRejected => "Command rejected by security policy",
            SecurityEvent::SessionReset => "Shell session reset",
            SecurityEvent::SessionRespawned => "Shell session respawned",
            SecurityEvent::ConfigLoaded => "Configuration loaded successfully",
            SecurityEvent::ConfigError => "Configuration loading error",
        }
    }

    /// Check if this event should be logged as a warning
    pub fn is_suspicious(&self) -> bool {
        matches!(self, SecurityEvent::CommandRejected)
    }
}

/// Log a security audit event
///
/// ## Security Note
///
/// Metadata is written verbatim; callers pass sanitized values only.
///
/// # Examples
///
/// ```
/// use persistent_shell::security::audit::{log_security_event, SecurityEvent};
///
/// log_security_event(SecurityEvent::SessionReset, Some("cwd=/workspace"));
/// ```
pub fn log_security_event(event: SecurityEvent, metadata: Option<&str>) {
    let event_desc = event.description();

    let log_message = if let Some(meta) = metadata {
        format!("SECURITY AUDIT: {} | {}", event_desc, meta)
    } else {
        format!("SECURITY AUDIT: {}", event_desc)
    };

    if event.is_suspicious() {
        warn!(target: "audit", "{}", log_message);
    } else {
        info!(target: "audit", "{}", log_message);
    }
}

/// Log a rejected command with its reason and the time of the decision
pub fn log_command_rejected(reason: &str, command: &str, timestamp: DateTime<Utc>) {
    log_security_event(
        SecurityEvent::CommandRejected,
        Some(&format!(
            "reason={} command={:?} timestamp={}",
            reason,
            sanitize_command(command),
            timestamp.to_rfc3339()
        )),
    );
}

/// Log a command the policy let through
pub fn log_command_accepted(command: &str, timestamp: DateTime<Utc>) {
    log_security_event(
        SecurityEvent::CommandValidated,
        Some(&format!(
            "command={:?} timestamp={}",
            sanitize_command(command),
            timestamp.to_rfc3339()
        )),
    );
}

/// Log an explicit session reset
pub fn log_session_reset(cwd: &str) {
    log_security_event(
        SecurityEvent::SessionReset,
        Some(&format!("cwd={}", sanitize_command(cwd))),
    );
}

/// Log a respawn of the shell
pub fn log_session_respawned(cause: &str) {
    log_security_event(SecurityEvent::SessionRespawned, Some(&format!("cause={}", cause)));
}

/// Log configuration events
pub fn log_config_event(is_error: bool, details: Option<&str>) {
    let event = if is_error {
        SecurityEvent::ConfigError
    } else {
        SecurityEvent::ConfigLoaded
    };
    log_security_event(event, details);
}

/// Strip control characters and cap length to prevent log injection
pub fn sanitize_command(command: &str) -> String {
    let cleaned: String = command
        .chars()
        .map(|c| if c.is_control() && c != '\t' { ' ' } else { c })
        .collect();

    if cleaned.len() <= MAX_LOGGED_COMMAND_LEN {
        return cleaned;
    }
    let mut end = MAX_LOGGED_COMMAND_LEN;
    while !cleaned.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &cleaned[..end])
}
