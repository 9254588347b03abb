//! Core data models
//!
//! Requests submitted by callers and the results returned to them.

pub mod command;

// Re-exports for convenience
pub use command::{CommandRequest, CommandResult, CommandStatus};
