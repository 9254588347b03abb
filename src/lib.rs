//! persistent-shell - a persistent, PTY-backed shell session engine
//!
//! Runs commands for remote callers against one long-lived interactive shell,
//! so working directory, environment variables and shell state (virtualenv
//! activation, functions, aliases) survive between commands.
//!
//! ## Features
//!
//! - **PTY Support:** The shell runs on a real pseudoterminal via `portable-pty`
//! - **Marker Protocol:** Each command is followed by a single-use status marker
//!   that yields its exit code and the shell's new working directory
//! - **Timeouts:** Overdue commands are interrupted and the shell is probed
//!   before it is reused
//! - **Output Limits:** Output is capped and flagged as truncated
//! - **Serialization:** Concurrent callers are queued FIFO onto the one shell
//! - **Supervision:** Dead shells are detected and replaced, idle ones recycled
//! - **Security Policy:** Allowlist and blocked-pattern gate with an audit trail
//!
//! ## Module Organization
//!
//! - [`pty`] - PTY process, I/O streams, signals
//! - [`protocol`] - Marker protocol, output capture, timeout recovery
//! - [`security`] - Command policy and audit logging
//! - [`execution`] - FIFO execution slot
//! - [`session`] - Session manager and supervisor
//! - [`config`] - Configuration loading and validation
//! - [`models`] - Requests and results
//! - [`ansi`] - Control sequence normalization
//! - [`mod@error`] - Error types and Result aliases
//!
//! ## Quick Start
//!
//! ```no_run
//! use persistent_shell::{init, CommandRequest};
//!
//! # async fn run() -> persistent_shell::Result<()> {
//! let manager = init().await?;
//!
//! let result = manager.execute_command(CommandRequest::new("cd /tmp && ls")).await;
//! println!("{} -> {:?}", result.stdout, result.exit_code);
//! println!("cwd: {}", manager.get_working_directory().display());
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **PTY Reader Thread:** Blocking reads from the PTY master, forwarded over
//!   a `tokio::mpsc` channel
//! - **PTY Writer Thread:** Drains a channel into the PTY master
//! - **Callers:** Async tasks queued on the execution slot
//! - **Supervisor:** A tokio task probing liveness and recycling idle shells
//!
//! ## Limitations
//!
//! The security policy filters command strings; it is not a sandbox. See
//! [`security`] for details.

#![allow(unexpected_cfgs)]

#[macro_use]
extern crate tracing;

pub mod ansi;
pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod protocol;
pub mod pty;
pub mod security;
pub mod session;

// Re-exports for core functionality
pub use config::loader::ConfigLoader;
pub use config::Config;
pub use error::{Error, Result};
pub use models::{CommandRequest, CommandResult, CommandStatus};
pub use security::{SecurityPolicy, SecurityValidator, Verdict};
pub use session::{HealthReport, SessionManager, SessionState};

use std::path::Path;
use std::sync::Arc;

// Version information
/// The current version of persistent-shell from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The package name from Cargo.toml
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// The package description from Cargo.toml
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Load configuration from the default locations and start a session
///
/// # Errors
///
/// Fails when the configuration is invalid. A shell that cannot be spawned
/// is logged and retried on the first command rather than failing startup.
pub async fn init() -> Result<Arc<SessionManager>> {
    info!("Initializing {} v{}", NAME, VERSION);
    let config = ConfigLoader::load()?;
    start_session(config).await
}

/// Load configuration from `config_path` (plus environment overrides) and start a session
pub async fn init_with_config(config_path: &Path) -> Result<Arc<SessionManager>> {
    info!(
        "Initializing {} v{} with config: {}",
        NAME,
        VERSION,
        config_path.display()
    );

    if !config_path.is_file() {
        return Err(Error::ConfigLoadFailed {
            path: config_path.to_path_buf(),
            reason: "Configuration file does not exist".to_string(),
        });
    }

    let config = ConfigLoader::with_search_paths(vec![config_path.to_path_buf()])
        .load_with_env(std::env::vars())?;
    start_session(config).await
}

/// Start a session manager from an already validated configuration
pub async fn start_session(config: Config) -> Result<Arc<SessionManager>> {
    let manager = Arc::new(SessionManager::new(&config)?);
    match manager.start().await {
        Ok(cwd) => info!("Session started in {}", cwd.display()),
        Err(e) => warn!("Shell failed to start, will retry on first command: {}", e),
    }
    Ok(manager)
}

/// Human-readable explanation of a startup failure
pub fn handle_startup_error(error: &Error) -> String {
    match error {
        Error::ConfigLoadFailed { path, reason } => {
            format!(
                "Configuration Error: Failed to load config from '{}': {}\n\nTry:\n• Check the path passed with --config\n• Ensure file permissions are correct",
                path.display(),
                reason
            )
        }
        Error::ConfigParseFailed { format, reason } => {
            format!(
                "Configuration Error: Failed to parse {} config: {}\n\nTry:\n• Check configuration file syntax\n• Ensure file is valid {}",
                format, reason, format
            )
        }
        Error::ConfigValidationFailed { field, reason } => {
            format!(
                "Configuration Error: Validation failed for '{}': {}\n\nTry:\n• Check the configuration value\n• Check PERSISTENT_SHELL_* environment overrides",
                field, reason
            )
        }
        Error::InvalidBlockedPattern { pattern, reason } => {
            format!(
                "Security Policy Error: Blocked pattern '{}' is not a valid regular expression: {}",
                pattern, reason
            )
        }
        Error::SpawnFailed { shell, reason } => {
            format!(
                "Shell Error: Could not start '{}': {}\n\nTry:\n• Check shell.shell_path\n• Ensure the working directory exists",
                shell, reason
            )
        }
        _ => {
            format!(
                "Unexpected Error: {}\n\nPlease report this issue with debug logs enabled",
                error
            )
        }
    }
}
