//! Error types and Result aliases for persistent-shell

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for persistent-shell operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for persistent-shell
#[derive(Debug)]
pub enum Error {
    // === PTY-related errors ===
    /// Failed to allocate the pseudoterminal pair
    PtyCreationFailed { shell: String, reason: String },

    /// Failed to spawn the shell on the PTY slave
    SpawnFailed { shell: String, reason: String },

    /// Failed to clone the PTY master reader
    PtyReaderCloneFailed { reason: String },

    /// Failed to take the PTY master writer
    PtyWriterTakeFailed { reason: String },

    /// Failed to hand input to the PTY writer thread
    PtyInputSendFailed { reason: String },

    /// Failed to deliver a signal to the shell
    SignalSendFailed { signal: String, reason: String },

    // === Session errors ===
    /// The shell exited or stopped responding
    SessionDead { reason: String },

    /// Respawn is paused after repeated failures
    RespawnBackoff { failures: u32, retry_in: Duration },

    /// The shell did not answer the startup handshake
    HandshakeFailed { reason: String },

    /// Command wait exceeded its deadline
    CommandTimeout { command: String, duration: Duration },

    // === Configuration errors ===
    /// Failed to load configuration file
    ConfigLoadFailed { path: PathBuf, reason: String },

    /// Failed to parse configuration
    ConfigParseFailed { format: String, reason: String },

    /// Configuration validation failed
    ConfigValidationFailed { field: String, reason: String },

    /// A blocked pattern does not compile as a regular expression
    InvalidBlockedPattern { pattern: String, reason: String },

    // === I/O and serialization errors ===
    /// I/O errors
    Io(std::io::Error),

    /// Serialization errors
    Serde(serde_json::Error),

    /// TOML parsing errors
    Toml(toml::de::Error),

    /// Regex compilation errors
    Regex(regex::Error),

    // === Generic fallback (use sparingly) ===
    Other(String),
}

impl Error {
    /// Whether this error means the shell must be respawned before the next command
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Error::SessionDead { .. }
                | Error::PtyInputSendFailed { .. }
                | Error::HandshakeFailed { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::PtyCreationFailed { shell, reason } => {
                write!(f, "Failed to create PTY for shell '{}': {}", shell, reason)
            }
            Error::SpawnFailed { shell, reason } => {
                write!(f, "Failed to spawn shell '{}': {}", shell, reason)
            }
            Error::PtyReaderCloneFailed { reason } => {
                write!(f, "Failed to clone PTY reader: {}", reason)
            }
            Error::PtyWriterTakeFailed { reason } => {
                write!(f, "Failed to take PTY writer: {}", reason)
            }
            Error::PtyInputSendFailed { reason } => {
                write!(f, "Failed to send input to PTY: {}", reason)
            }
            Error::SignalSendFailed { signal, reason } => {
                write!(f, "Failed to send signal '{}': {}", signal, reason)
            }

            Error::SessionDead { reason } => write!(f, "Shell session is dead: {}", reason),
            Error::RespawnBackoff { failures, retry_in } => write!(
                f,
                "Shell unavailable after {} failed spawn attempts, retrying in {:?}",
                failures, retry_in
            ),
            Error::HandshakeFailed { reason } => {
                write!(f, "Shell did not complete startup handshake: {}", reason)
            }
            Error::CommandTimeout { command, duration } => {
                write!(f, "Command '{}' timed out after {:?}", command, duration)
            }

            Error::ConfigLoadFailed { path, reason } => {
                write!(f, "Failed to load config from '{}': {}", path.display(), reason)
            }
            Error::ConfigParseFailed { format, reason } => {
                write!(f, "Failed to parse {} config: {}", format, reason)
            }
            Error::ConfigValidationFailed { field, reason } => {
                write!(f, "Configuration validation failed for '{}': {}", field, reason)
            }
            Error::InvalidBlockedPattern { pattern, reason } => {
                write!(f, "Invalid blocked pattern '{}': {}", pattern, reason)
            }

            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Serde(err) => write!(f, "Serialization error: {}", err),
            Error::Toml(err) => write!(f, "TOML parsing error: {}", err),
            Error::Regex(err) => write!(f, "Regex compilation error: {}", err),

            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Serde(err) => Some(err),
            Error::Toml(err) => Some(err),
            Error::Regex(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Toml(err)
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Regex(err)
    }
}
