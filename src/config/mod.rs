//! Configuration management for persistent-shell
//!
//! Typed configuration for the shell process, the session supervisor, the
//! security policy and logging. Values are merged once at startup by
//! [`loader::ConfigLoader`] and handed to the core as plain structs.

pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::security::SecurityPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell process configuration
    pub shell: ShellConfig,

    /// Session lifecycle configuration
    pub session: SessionConfig,

    /// Command security configuration
    pub security: SecurityConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Shell process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Shell executable path
    pub shell_path: PathBuf,

    /// Shell arguments
    pub shell_args: Vec<String>,

    /// Extra environment variables for the shell
    pub env: HashMap<String, String>,

    /// Whether the shell inherits the server's environment
    pub inherit_env: bool,

    /// How long to wait for the shell to answer the startup handshake
    pub handshake_timeout_ms: u64,

    /// How long to wait for a prompt after interrupting a timed-out command
    pub interrupt_grace_ms: u64,

    /// Grace period between SIGTERM and SIGKILL on termination
    pub terminate_grace_ms: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        let mut env = HashMap::new();
        env.insert("TERM".to_string(), "dumb".to_string());
        env.insert("PAGER".to_string(), "cat".to_string());
        env.insert("GIT_PAGER".to_string(), "cat".to_string());

        Self {
            shell_path: PathBuf::from("/bin/bash"),
            // No readline: echo is owned by the line discipline and can be turned off
            shell_args: vec![
                "--noediting".to_string(),
                "--noprofile".to_string(),
                "--norc".to_string(),
                "-i".to_string(),
            ],
            env,
            inherit_env: true,
            handshake_timeout_ms: 5000,
            interrupt_grace_ms: 2000,
            terminate_grace_ms: 1000,
        }
    }
}

impl ShellConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn interrupt_grace(&self) -> Duration {
        Duration::from_millis(self.interrupt_grace_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    /// Environment handed to the shell: inherited variables overlaid with `env`
    pub fn effective_environment(&self) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = if self.inherit_env {
            std::env::vars().collect()
        } else {
            HashMap::new()
        };

        for (key, value) in &self.env {
            env.insert(key.clone(), value.clone());
        }

        env
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Recycle the shell after this many idle seconds (0 disables recycling)
    pub idle_timeout_secs: u64,

    /// Interval of the supervisor's liveness probe in seconds
    pub probe_interval_secs: u64,

    /// Consecutive spawn failures tolerated before respawn backs off
    pub max_spawn_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
            probe_interval_secs: 5,
            max_spawn_failures: 3,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

/// Command security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable security validation
    pub enabled: bool,

    /// Allowlist of executables (empty = no restriction)
    pub allowed_executables: Vec<String>,

    /// Blocklist of regex patterns matched against the full command
    pub blocked_patterns: Vec<String>,

    /// Maximum execution time per command in seconds
    pub max_execution_time: u64,

    /// Maximum retained output per command in bytes
    pub max_output_size: usize,

    /// Working directory the shell starts in
    pub working_directory: PathBuf,

    /// Write accepted and rejected commands to the audit log
    pub audit_log: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_executables: Vec::new(),
            blocked_patterns: Vec::new(),
            max_execution_time: 30,
            max_output_size: 1024 * 1024,
            working_directory: PathBuf::from("/workspace"),
            audit_log: true,
        }
    }
}

impl SecurityConfig {
    /// Snapshot the security section as an immutable policy
    pub fn to_policy(&self) -> SecurityPolicy {
        SecurityPolicy {
            enabled: self.enabled,
            allowed_executables: self.allowed_executables.iter().cloned().collect(),
            blocked_patterns: self.blocked_patterns.clone(),
            max_execution_time: Duration::from_secs(self.max_execution_time),
            max_output_size: self.max_output_size,
            workspace_root: self.working_directory.clone(),
            audit_log: self.audit_log,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Console,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}
