//! Command Security Policy
//!
//! A stateless gate in front of the shell. A command is checked against an
//! executable allowlist (leading token only) and an ordered list of blocked
//! regular expressions (full command text).
//!
//! ## Limitations
//!
//! This is literal string filtering, not a sandbox. Only the first token of
//! the command line is compared with the allowlist, so chained commands
//! (`ls; rm -rf x`), substitutions (`$(...)`, backticks) and aliases can run
//! executables that are not on the list. Blocked patterns are the only check
//! applied to the whole line.

pub mod audit;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error as ThisError;

use crate::error::{Error, Result};

/// Leading token: single-quoted, double-quoted or bare
static LEADING_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:'([^']*)'|"([^"]*)"|(\S+))"#).expect("leading token regex is valid")
});

/// Immutable policy snapshot, built once from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub enabled: bool,

    /// Executables a command may start with; empty means unrestricted
    pub allowed_executables: BTreeSet<String>,

    /// Regular expressions matched against the full command, in order
    pub blocked_patterns: Vec<String>,

    pub max_execution_time: Duration,
    pub max_output_size: usize,

    /// Initial working directory of every fresh shell
    pub workspace_root: PathBuf,

    /// Audit-log every decision
    pub audit_log: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_executables: BTreeSet::new(),
            blocked_patterns: Vec::new(),
            max_execution_time: Duration::from_secs(30),
            max_output_size: 1_048_576,
            workspace_root: PathBuf::from("/workspace"),
            audit_log: true,
        }
    }
}

/// Why a command was refused
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Rejection {
    #[error("Executable '{0}' is not in the allowed list")]
    ExecutableNotAllowed(String),

    #[error("Command matches blocked pattern: {0}")]
    BlockedPattern(String),

    #[error("Command is empty")]
    EmptyCommand,

    #[error("Command contains a NUL character")]
    ControlCharacter,
}

impl Rejection {
    /// Short machine-readable reason for audit entries
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::ExecutableNotAllowed(_) => "executable_not_allowed",
            Rejection::BlockedPattern(_) => "blocked_pattern",
            Rejection::EmptyCommand => "empty_command",
            Rejection::ControlCharacter => "control_character",
        }
    }
}

/// Outcome of evaluating a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Reject(Rejection),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// Policy with its blocked patterns compiled
#[derive(Debug, Clone)]
pub struct SecurityValidator {
    policy: SecurityPolicy,
    patterns: Vec<(String, Regex)>,
}

impl SecurityValidator {
    /// Compile the policy's patterns; fails on the first invalid one
    pub fn new(policy: SecurityPolicy) -> Result<Self> {
        let patterns = policy
            .blocked_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map(|re| (pattern.clone(), re))
                    .map_err(|e| Error::InvalidBlockedPattern {
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Security validator ready: enabled={}, {} allowed executables, {} blocked patterns",
            policy.enabled,
            policy.allowed_executables.len(),
            patterns.len()
        );

        Ok(Self { policy, patterns })
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn is_enabled(&self) -> bool {
        self.policy.enabled
    }

    /// Decide whether `command` may run
    ///
    /// With validation enabled and `audit_log` set, the decision is written
    /// to the audit log either way.
    pub fn evaluate(&self, command: &str) -> Verdict {
        let verdict = match self.check(command) {
            Ok(()) => Verdict::Allow,
            Err(rejection) => Verdict::Reject(rejection),
        };
        if self.policy.enabled && self.policy.audit_log {
            match &verdict {
                Verdict::Allow => audit::log_command_accepted(command, Utc::now()),
                Verdict::Reject(rejection) => {
                    audit::log_command_rejected(&rejection.to_string(), command, Utc::now())
                }
            }
        }
        verdict
    }

    fn check(&self, command: &str) -> std::result::Result<(), Rejection> {
        if !self.policy.enabled {
            return Ok(());
        }

        if command.contains('\0') {
            return Err(Rejection::ControlCharacter);
        }

        let executable = leading_executable(command).ok_or(Rejection::EmptyCommand)?;

        if !self.policy.allowed_executables.is_empty() {
            let basename = executable.rsplit('/').next().unwrap_or(executable);
            let allowed = self.policy.allowed_executables.contains(executable)
                || self.policy.allowed_executables.contains(basename);
            if !allowed {
                return Err(Rejection::ExecutableNotAllowed(executable.to_string()));
            }
        }

        for (pattern, re) in &self.patterns {
            if re.is_match(command) {
                return Err(Rejection::BlockedPattern(pattern.clone()));
            }
        }

        Ok(())
    }
}

/// Evaluate against a policy without keeping the compiled validator
pub fn evaluate(command: &str, policy: &SecurityPolicy) -> Result<Verdict> {
    Ok(SecurityValidator::new(policy.clone())?.evaluate(command))
}

/// First token of the command line, with one layer of simple quoting removed
pub fn leading_executable(command: &str) -> Option<&str> {
    let caps = LEADING_TOKEN.captures(command)?;
    let token = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))?
        .as_str();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
