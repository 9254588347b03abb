//! PTY Signal Handling
//!
//! Sends hangup and termination signals to the shell process by PID.
//! Interrupts for running commands go through the terminal instead (see
//! [`super::process::PtyProcess::interrupt`]) so that they reach the
//! foreground job rather than the shell itself.

use crate::error::{Error, Result};

/// Signal types that can be sent to the shell process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Termination signal (graceful shutdown)
    Terminate,
    /// Hangup signal (terminal closed); interactive shells exit on it
    Hangup,
}

impl Signal {
    /// Conventional signal name
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Terminate => "SIGTERM",
            Signal::Hangup => "SIGHUP",
        }
    }
}

/// Send a signal to a process by PID
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    use nix::sys::signal::{kill, Signal as NixSignal};
    use nix::unistd::Pid;

    let nix_signal = match signal {
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Hangup => NixSignal::SIGHUP,
    };

    kill(Pid::from_raw(pid as i32), nix_signal).map_err(|e| Error::SignalSendFailed {
        signal: signal.name().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(not(unix))]
pub fn send_signal(_pid: u32, signal: Signal) -> Result<()> {
    Err(Error::SignalSendFailed {
        signal: signal.name().to_string(),
        reason: format!("signals not supported on {}", std::env::consts::OS),
    })
}
