//! PTY Process Spawning
//!
//! Owns one pseudoterminal and the interactive shell attached to its slave
//! end. Output is pumped by a reader thread and input by a writer thread (see
//! [`super::streams`]); liveness can be checked from any task through a
//! cloneable [`LivenessProbe`] without touching the streams.

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::unbounded_channel;
use tokio::time::Instant;

use super::signals::{self, Signal};
use super::streams::{PtyStreams, ReadOutcome, StreamMatcher};
use crate::error::{Error, Result};

/// The terminal interrupt character (Ctrl+C)
const ETX: u8 = 0x03;

type SharedChild = Arc<Mutex<Box<dyn Child + Send + Sync>>>;

/// What to spawn and where
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Shell executable
    pub shell_path: PathBuf,
    /// Shell arguments
    pub args: Vec<String>,
    /// Working directory for the shell
    pub working_directory: PathBuf,
    /// Complete environment of the shell
    pub env: HashMap<String, String>,
    /// Terminal size
    pub size: PtySize,
}

impl SpawnConfig {
    pub fn new(shell_path: impl Into<PathBuf>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            shell_path: shell_path.into(),
            args: Vec::new(),
            working_directory: working_directory.into(),
            env: HashMap::new(),
            size: PtySize {
                rows: 24,
                // Wide enough that long status lines are never wrapped by the shell
                cols: 500,
                pixel_width: 0,
                pixel_height: 0,
            },
        }
    }
}

/// Non-blocking liveness check that can outlive a borrow of the process
#[derive(Clone)]
pub struct LivenessProbe {
    check: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl LivenessProbe {
    pub fn new(check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            check: Arc::new(check),
        }
    }

    /// `true` while the child has not exited
    pub fn is_alive(&self) -> bool {
        (self.check)()
    }
}

impl std::fmt::Debug for LivenessProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessProbe").finish_non_exhaustive()
    }
}

fn child_running(child: &SharedChild) -> bool {
    let mut child = child.lock().unwrap_or_else(|e| {
        warn!("child lock was poisoned, recovering");
        e.into_inner()
    });
    matches!(child.try_wait(), Ok(None))
}

/// A live shell attached to a pseudoterminal
pub struct PtyProcess {
    shell: String,
    pid: Option<u32>,
    child: SharedChild,
    streams: PtyStreams,
    // Held so the master side stays open for the lifetime of the process
    _master: Box<dyn MasterPty + Send>,
    terminated: bool,
}

impl PtyProcess {
    /// Allocate a PTY pair and start the shell on its slave end
    pub fn spawn(config: &SpawnConfig) -> Result<Self> {
        let shell = config.shell_path.to_string_lossy().to_string();

        check_executable(&config.shell_path).map_err(|reason| Error::SpawnFailed {
            shell: shell.clone(),
            reason,
        })?;
        if !config.working_directory.is_dir() {
            return Err(Error::SpawnFailed {
                shell,
                reason: format!(
                    "working directory '{}' does not exist",
                    config.working_directory.display()
                ),
            });
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(config.size)
            .map_err(|e| Error::PtyCreationFailed {
                shell: shell.clone(),
                reason: e.to_string(),
            })?;

        let mut cmd = CommandBuilder::new(&config.shell_path);
        cmd.args(&config.args);
        cmd.env_clear();
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        cmd.cwd(&config.working_directory);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::SpawnFailed {
                shell: shell.clone(),
                reason: e.to_string(),
            })?;
        // Only the child may hold the slave, otherwise EOF never arrives
        drop(pair.slave);

        let pid = child.process_id();
        let streams = create_pty_streams(pair.master.as_ref())?;

        info!(
            "Spawned shell {} (pid {:?}) in {}",
            shell,
            pid,
            config.working_directory.display()
        );

        Ok(Self {
            shell,
            pid,
            child: Arc::new(Mutex::new(child)),
            streams,
            _master: pair.master,
            terminated: false,
        })
    }

    /// Raw write to the master side
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.streams.write(bytes)
    }

    /// Accumulate output into `matcher` until it matches or `deadline` elapses
    pub async fn read_until(
        &mut self,
        matcher: &mut (dyn StreamMatcher + Send),
        deadline: Instant,
    ) -> ReadOutcome {
        self.streams.read_until(matcher, deadline).await
    }

    /// Deliver SIGINT to the foreground job through the line discipline
    pub fn interrupt(&mut self) -> Result<()> {
        debug!("Interrupting foreground job of {}", self.shell);
        self.streams.write(&[ETX])
    }

    /// Discard any output already buffered
    pub fn drain_output(&mut self) -> usize {
        self.streams.drain_output()
    }

    /// Non-blocking liveness check
    pub fn is_alive(&self) -> bool {
        !self.terminated && child_running(&self.child)
    }

    /// Cloneable liveness handle for supervisors and health checks
    pub fn liveness(&self) -> LivenessProbe {
        let child = Arc::clone(&self.child);
        LivenessProbe::new(move || child_running(&child))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Hang up, wait up to `grace`, then kill and reap. Idempotent.
    pub async fn terminate(&mut self, grace: Duration) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;

        if child_running(&self.child) {
            if let Some(pid) = self.pid {
                // Interactive shells ignore SIGTERM but exit on SIGHUP
                for signal in [Signal::Hangup, Signal::Terminate] {
                    if let Err(e) = signals::send_signal(pid, signal) {
                        debug!("{}", e);
                    }
                }
            }

            let deadline = Instant::now() + grace;
            while child_running(&self.child) && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        }

        let child = Arc::clone(&self.child);
        let shell = self.shell.clone();
        tokio::task::spawn_blocking(move || {
            let mut child = child.lock().unwrap_or_else(|e| e.into_inner());
            if matches!(child.try_wait(), Ok(None)) {
                warn!("Shell {} ignored hangup, killing", shell);
                if let Err(e) = child.kill() {
                    debug!("kill failed: {}", e);
                }
            }
            match child.wait() {
                Ok(status) => debug!("Shell {} reaped: {:?}", shell, status),
                Err(e) => debug!("Shell {} reap failed: {}", shell, e),
            }
        })
        .await
        .map_err(|e| Error::Other(format!("reaper task failed: {}", e)))?;

        info!("Terminated shell {} (pid {:?})", self.shell, self.pid);
        Ok(())
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(child.try_wait(), Ok(None)) {
            debug!("Killing shell {} on drop", self.shell);
            let _ = child.kill();
        }
    }
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("shell", &self.shell)
            .field("pid", &self.pid)
            .field("terminated", &self.terminated)
            .finish()
    }
}

/// Reject paths that clearly cannot be executed before asking the PTY to try
fn check_executable(path: &Path) -> std::result::Result<(), String> {
    if path.components().count() > 1 || path.is_absolute() {
        if !path.is_file() {
            return Err(format!("'{}' does not exist", path.display()));
        }
        return Ok(());
    }

    let found = std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(path).is_file()))
        .unwrap_or(false);
    if found {
        Ok(())
    } else {
        Err(format!("'{}' not found in PATH", path.display()))
    }
}

/// Create PTY streams from the master side
fn create_pty_streams(master: &(dyn MasterPty + Send)) -> Result<PtyStreams> {
    let mut master_reader = master
        .try_clone_reader()
        .map_err(|e| Error::PtyReaderCloneFailed {
            reason: e.to_string(),
        })?;
    let mut master_writer = master.take_writer().map_err(|e| Error::PtyWriterTakeFailed {
        reason: e.to_string(),
    })?;

    // Channel: PTY output -> async consumer
    let (tx_async_out, rx_async_out) = unbounded_channel::<Vec<u8>>();
    // Channel: async producer (stdin) -> PTY writer thread
    let (tx_stdin, rx_stdin) = channel::<Vec<u8>>();

    thread::Builder::new()
        .name("pty-reader".to_string())
        .spawn(move || {
            let mut buf = [0u8; 8192];
            let mut consecutive_errors = 0;
            const MAX_CONSECUTIVE_ERRORS: u32 = 5;

            loop {
                match master_reader.read(&mut buf) {
                    Ok(0) => {
                        debug!("PTY read EOF - process terminated");
                        break;
                    }
                    Ok(n) => {
                        consecutive_errors = 0;
                        if tx_async_out.send(buf[..n].to_vec()).is_err() {
                            debug!("PTY read: receiver dropped, stopping reader thread");
                            break;
                        }
                    }
                    Err(e) => {
                        if e.kind() == std::io::ErrorKind::Interrupted {
                            continue;
                        }
                        // Linux reports a hung-up slave as EIO rather than EOF
                        if is_hangup(&e) {
                            debug!("PTY slave hung up");
                            break;
                        }
                        if e.kind() == std::io::ErrorKind::WouldBlock {
                            thread::sleep(Duration::from_millis(10));
                            continue;
                        }

                        consecutive_errors += 1;
                        warn!(
                            "PTY read error ({}): {} (attempt {}/{})",
                            e.kind(),
                            e,
                            consecutive_errors,
                            MAX_CONSECUTIVE_ERRORS
                        );
                        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                            error!("PTY read: too many consecutive errors, stopping reader thread");
                            break;
                        }
                        thread::sleep(Duration::from_millis(50));
                    }
                }
            }
            debug!("PTY reader thread exiting");
        })?;

    thread::Builder::new()
        .name("pty-writer".to_string())
        .spawn(move || {
            while let Ok(data) = rx_stdin.recv() {
                let mut attempts = 0;
                const MAX_ATTEMPTS: u32 = 3;

                loop {
                    match master_writer.write_all(&data) {
                        Ok(()) => {
                            if let Err(e) = master_writer.flush() {
                                debug!("PTY flush error: {}", e);
                            }
                            break;
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                && attempts < MAX_ATTEMPTS =>
                        {
                            attempts += 1;
                            thread::sleep(Duration::from_millis(10));
                        }
                        Err(e) => {
                            // Dropping the receiver makes later writes fail fast
                            error!("PTY write error ({}): {}, stopping writer thread", e.kind(), e);
                            return;
                        }
                    }
                }
            }
            debug!("PTY writer thread exiting");
        })?;

    Ok(PtyStreams::from_channels(rx_async_out, tx_stdin))
}

#[cfg(unix)]
fn is_hangup(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(nix::errno::Errno::EIO as i32)
}

#[cfg(not(unix))]
fn is_hangup(_e: &std::io::Error) -> bool {
    false
}
