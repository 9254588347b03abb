//! Shell Session Management
//!
//! [`SessionManager`] owns the one shared shell. Commands pass the security
//! validator, queue on the execution slot, and run through the protocol
//! engine. The shell is spawned at startup, replaced lazily when it dies,
//! and recycled by the [`supervisor`] after a configurable idle period.
//!
//! Status (state, cwd, liveness) is kept beside the slot under a
//! short-held lock, so health checks and `is_alive` never wait behind a
//! running command.

pub mod state;
pub mod supervisor;

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::config::{Config, SessionConfig, ShellConfig};
use crate::error::{Error, Result};
use crate::execution::{ExecutionSerializer, SlotGuard};
use crate::models::{CommandRequest, CommandResult};
use crate::protocol::{Completion, Execution, ExecutionLimits, ProtocolEngine};
use crate::pty::{LivenessProbe, PtyProcess, ShellTransport, SpawnConfig};
use crate::security::{audit, SecurityValidator, Verdict};

pub use state::{HealthReport, SessionState, SessionStatus};
pub use supervisor::SupervisorHandle;

/// Starts shell processes for the manager
pub trait ShellSpawner: Send + Sync {
    /// Start a shell in `cwd`; the handshake is done by the caller
    fn spawn(&self, cwd: &Path) -> Result<Box<dyn ShellTransport>>;
}

/// Spawns the configured shell on a real pseudoterminal
#[derive(Debug, Clone)]
pub struct PtySpawner {
    config: ShellConfig,
}

impl PtySpawner {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }
}

impl ShellSpawner for PtySpawner {
    fn spawn(&self, cwd: &Path) -> Result<Box<dyn ShellTransport>> {
        let mut spawn = SpawnConfig::new(&self.config.shell_path, cwd);
        spawn.args = self.config.shell_args.clone();
        spawn.env = self.config.effective_environment();
        Ok(Box::new(PtyProcess::spawn(&spawn)?))
    }
}

/// A handshaken shell behind the protocol engine
#[derive(Debug)]
pub struct ShellSession {
    engine: ProtocolEngine,
}

impl ShellSession {
    /// Run the startup handshake; the shell is stopped if it fails
    pub async fn start(
        transport: Box<dyn ShellTransport>,
        cwd: &Path,
        handshake_timeout: Duration,
        terminate_grace: Duration,
    ) -> Result<Self> {
        let mut engine = ProtocolEngine::new(transport, cwd);
        if let Err(e) = engine.handshake(handshake_timeout).await {
            if let Err(term) = engine.terminate(terminate_grace).await {
                debug!("Cleanup after failed handshake: {}", term);
            }
            return Err(e);
        }
        Ok(Self { engine })
    }

    pub fn cwd(&self) -> &Path {
        self.engine.cwd()
    }

    pub fn is_usable(&self) -> bool {
        self.engine.is_usable()
    }

    pub fn liveness(&self) -> LivenessProbe {
        self.engine.liveness()
    }

    pub fn pid(&self) -> Option<u32> {
        self.engine.pid()
    }

    pub async fn execute(&mut self, command: &str, limits: &ExecutionLimits) -> Result<Execution> {
        self.engine.execute(command, limits).await
    }

    /// Interrupt a command nobody is waiting for any more
    pub fn abandon(&mut self) {
        self.engine.abandon()
    }

    pub async fn terminate(&mut self, grace: Duration) -> Result<()> {
        self.engine.terminate(grace).await
    }
}

/// The slot held by one `execute_command` call
///
/// If the call is dropped before it completes, the running command is
/// interrupted and the session leaves `Busy`.
struct CommandSlot<'a> {
    manager: &'a SessionManager,
    slot: SlotGuard<'a, Option<ShellSession>>,
    completed: bool,
}

impl Deref for CommandSlot<'_> {
    type Target = Option<ShellSession>;

    fn deref(&self) -> &Self::Target {
        &self.slot
    }
}

impl DerefMut for CommandSlot<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.slot
    }
}

impl Drop for CommandSlot<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.manager.abandon(&mut self.slot);
        }
    }
}

/// Owner of the shared shell session
pub struct SessionManager {
    shell: ShellConfig,
    session: SessionConfig,
    validator: SecurityValidator,
    spawner: Arc<dyn ShellSpawner>,
    slot: ExecutionSerializer<Option<ShellSession>>,
    status: RwLock<SessionStatus>,
    initial_cwd: PathBuf,
    supervisor: Mutex<Option<SupervisorHandle>>,
    shutting_down: AtomicBool,
}

impl SessionManager {
    /// Build a manager that spawns the configured shell on a PTY
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_spawner(config, Arc::new(PtySpawner::new(config.shell.clone())))
    }

    /// Build a manager with a custom shell spawner
    pub fn with_spawner(config: &Config, spawner: Arc<dyn ShellSpawner>) -> Result<Self> {
        let validator = SecurityValidator::new(config.security.to_policy())?;
        let initial_cwd = initial_working_directory(&config.security.working_directory);

        Ok(Self {
            shell: config.shell.clone(),
            session: config.session.clone(),
            validator,
            spawner,
            slot: ExecutionSerializer::new(None),
            status: RwLock::new(SessionStatus::new(initial_cwd.clone())),
            initial_cwd,
            supervisor: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Spawn the shell and start the supervisor
    ///
    /// A spawn failure is returned but the supervisor still runs, and the
    /// next command retries the spawn.
    pub async fn start(self: &Arc<Self>) -> Result<PathBuf> {
        let result = {
            let mut slot = self.slot.acquire().await;
            self.ensure_session(&mut slot).await
        };
        self.start_supervisor();
        result.map(|()| self.get_working_directory())
    }

    fn start_supervisor(self: &Arc<Self>) {
        let mut supervisor = self.supervisor.lock().unwrap_or_else(|e| e.into_inner());
        if supervisor.is_none() {
            *supervisor = Some(supervisor::spawn(
                Arc::downgrade(self),
                self.session.probe_interval(),
                self.session.idle_timeout(),
            ));
        }
    }

    /// Validate, queue and run one command
    ///
    /// Always produces exactly one result; failures are reported in it.
    pub async fn execute_command(&self, request: CommandRequest) -> CommandResult {
        let command = request.command.as_str();

        if self.shutting_down.load(Ordering::SeqCst) {
            return CommandResult::failed(
                command,
                "Session manager is shutting down",
                String::new(),
                Duration::ZERO,
            );
        }

        if let Verdict::Reject(rejection) = self.validator.evaluate(command) {
            return CommandResult::rejected(command, rejection);
        }

        let started = std::time::Instant::now();
        let limits = ExecutionLimits {
            timeout: request.effective_timeout(self.validator.policy().max_execution_time),
            max_output_size: self.validator.policy().max_output_size,
            interrupt_grace: self.shell.interrupt_grace(),
        };

        debug!("Queued command {} ({} waiting)", request.id, self.slot.queue_depth());
        let mut slot = CommandSlot {
            manager: self,
            slot: self.slot.acquire().await,
            completed: false,
        };
        let result = self.run_in_slot(&mut slot, &request, &limits, started).await;
        slot.completed = true;
        result
    }

    async fn run_in_slot(
        &self,
        slot: &mut Option<ShellSession>,
        request: &CommandRequest,
        limits: &ExecutionLimits,
        started: std::time::Instant,
    ) -> CommandResult {
        let command = request.command.as_str();
        let mut retried = false;

        loop {
            if let Err(e) = self.ensure_session(slot).await {
                return CommandResult::failed(command, e, String::new(), started.elapsed());
            }
            let Some(session) = slot.as_mut() else {
                return CommandResult::failed(
                    command,
                    "No shell session available",
                    String::new(),
                    started.elapsed(),
                );
            };

            self.status_mut().state = SessionState::Busy;
            debug!("Executing command {}: {}", request.id, command);

            match session.execute(command, limits).await {
                Ok(execution) => {
                    return self.finish(slot, command, limits, execution);
                }
                Err(e) if e.is_session_fatal() && !retried => {
                    // Nothing reached the shell, so running it on a fresh one is safe
                    warn!("Shell unusable before command {} was sent ({}), respawning", request.id, e);
                    retried = true;
                    self.retire(slot);
                }
                Err(e) => {
                    error!("Command {} failed: {}", request.id, e);
                    self.retire(slot);
                    return CommandResult::failed(command, e, String::new(), started.elapsed());
                }
            }
        }
    }

    fn finish(
        &self,
        slot: &mut Option<ShellSession>,
        command: &str,
        limits: &ExecutionLimits,
        execution: Execution,
    ) -> CommandResult {
        let cwd = slot.as_ref().map(|s| s.cwd().to_path_buf());
        {
            let mut status = self.status_mut();
            status.commands_executed += 1;
            status.touch();
            if let Some(cwd) = cwd {
                status.cwd = cwd;
            }
        }

        let Execution {
            completion,
            output,
            truncated,
            elapsed,
        } = execution;

        match completion {
            Completion::Exited(code) => {
                self.status_mut().state = SessionState::Ready;
                CommandResult::completed(command, code, output, truncated, elapsed)
            }
            Completion::TimedOut { recovered } => {
                if recovered {
                    self.status_mut().state = SessionState::Ready;
                } else {
                    warn!("Shell did not recover from timeout, it will be replaced");
                    self.retire(slot);
                }
                CommandResult::timed_out(command, output, truncated, limits.timeout, elapsed)
            }
            Completion::Closed => {
                self.retire(slot);
                CommandResult::failed(
                    command,
                    Error::SessionDead {
                        reason: "shell exited while running the command".to_string(),
                    },
                    output,
                    elapsed,
                )
            }
        }
    }

    /// Make sure a usable session occupies the slot
    async fn ensure_session(&self, slot: &mut Option<ShellSession>) -> Result<()> {
        if slot.as_ref().map(|s| s.is_usable()).unwrap_or(false) {
            return Ok(());
        }
        self.check_running()?;

        let cause = if slot.is_some() { "dead" } else { "missing" };
        self.retire(slot);

        {
            let status = self.status_read();
            if let Some(retry_in) = status.backoff_remaining() {
                return Err(Error::RespawnBackoff {
                    failures: status.consecutive_failures,
                    retry_in,
                });
            }
        }

        self.spawn_into(slot, cause).await.map(|_| ())
    }

    /// Spawn and handshake a new shell in the initial directory
    async fn spawn_into(&self, slot: &mut Option<ShellSession>, cause: &str) -> Result<PathBuf> {
        let was_started = {
            let mut status = self.status_mut();
            status.state = SessionState::Starting;
            status.spawned_at.is_some()
        };

        let started = match self.spawner.spawn(&self.initial_cwd) {
            Ok(transport) => {
                ShellSession::start(
                    transport,
                    &self.initial_cwd,
                    self.shell.handshake_timeout(),
                    self.shell.terminate_grace(),
                )
                .await
            }
            Err(e) => Err(e),
        };

        match started {
            Ok(session) => {
                let cwd = session.cwd().to_path_buf();
                self.status_mut()
                    .spawned(cwd.clone(), session.pid(), session.liveness());
                info!("Shell session ready (pid {:?}) in {}", session.pid(), cwd.display());
                if was_started {
                    audit::log_session_respawned(cause);
                }
                *slot = Some(session);
                Ok(cwd)
            }
            Err(e) => {
                let mut status = self.status_mut();
                status.spawn_failed(self.session.max_spawn_failures);
                error!(
                    "Failed to start shell ({} consecutive failures): {}",
                    status.consecutive_failures, e
                );
                Err(e)
            }
        }
    }

    /// No shell may be spawned once shutdown has begun
    fn check_running(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::SessionDead {
                reason: "session manager is shut down".to_string(),
            });
        }
        Ok(())
    }

    /// Clean up after an `execute_command` call dropped mid-flight
    fn abandon(&self, slot: &mut Option<ShellSession>) {
        match slot.as_mut() {
            Some(session) => {
                warn!("Caller stopped waiting for its command, interrupting the shell");
                session.abandon();
                let mut status = self.status_mut();
                if status.state == SessionState::Busy {
                    status.state = SessionState::Ready;
                }
            }
            None => self.status_mut().mark_dead(),
        }
    }

    /// Take the session out of the slot and stop it in the background
    fn retire(&self, slot: &mut Option<ShellSession>) {
        if let Some(mut session) = slot.take() {
            let grace = self.shell.terminate_grace();
            tokio::spawn(async move {
                if let Err(e) = session.terminate(grace).await {
                    debug!("Terminating retired shell: {}", e);
                }
            });
        }
        self.status_mut().mark_dead();
    }

    /// Tracked working directory of the shell; never waits for the slot
    pub fn get_working_directory(&self) -> PathBuf {
        self.status_read().cwd.clone()
    }

    /// Resolve `path` against the shell's working directory
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.get_working_directory().join(path)
        }
    }

    /// Replace the shell with a fresh one in the initial directory
    ///
    /// Waits for the running command, if any. Spawn backoff does not apply.
    pub async fn reset_session(&self) -> Result<PathBuf> {
        self.check_running()?;
        let mut slot = self.slot.acquire().await;
        self.check_running()?;
        if let Some(mut session) = slot.take() {
            if let Err(e) = session.terminate(self.shell.terminate_grace()).await {
                warn!("Terminating shell for reset: {}", e);
            }
        }
        {
            let mut status = self.status_mut();
            status.mark_dead();
            status.retry_after = None;
        }

        let cwd = self.spawn_into(&mut slot, "reset").await?;
        audit::log_session_reset(&cwd.to_string_lossy());
        Ok(cwd)
    }

    /// Health snapshot; never waits for the slot
    pub fn health(&self) -> HealthReport {
        let status = self.status_read();
        let shell_alive = status.shell_alive();
        HealthReport {
            status: if shell_alive { "healthy" } else { "degraded" }.to_string(),
            shell_alive,
            security_enabled: self.validator.is_enabled(),
            state: status.state,
            queue_depth: self.slot.queue_depth(),
            cwd: status.cwd.clone(),
            pid: status.pid,
            commands_executed: status.commands_executed,
            respawns: status.respawns,
        }
    }

    /// Whether the shell process is running; never waits for the slot
    pub fn is_alive(&self) -> bool {
        self.status_read().shell_alive()
    }

    /// Copy of the current session status
    pub fn status(&self) -> SessionStatus {
        self.status_read().clone()
    }

    /// Directory every fresh shell starts in
    pub fn initial_cwd(&self) -> &Path {
        &self.initial_cwd
    }

    pub fn validator(&self) -> &SecurityValidator {
        &self.validator
    }

    /// Mark the session dead if its process has exited
    ///
    /// Returns whether the shell is alive.
    pub fn probe_liveness(&self) -> bool {
        let mut status = self.status_mut();
        if status.state == SessionState::Dead || status.state == SessionState::Starting {
            return false;
        }
        let alive = status.liveness.as_ref().map(|p| p.is_alive()).unwrap_or(false);
        if !alive {
            warn!("Shell process (pid {:?}) exited, marking session dead", status.pid);
            status.mark_dead();
        }
        alive
    }

    /// Replace a shell that has been idle longer than `idle_timeout`
    ///
    /// Does nothing while a command holds or waits for the slot.
    pub async fn recycle_if_idle(&self, idle_timeout: Duration) -> bool {
        {
            let status = self.status_read();
            if status.state != SessionState::Ready || status.idle_for() < idle_timeout {
                return false;
            }
        }
        if self.slot.queue_depth() > 0 {
            return false;
        }
        let Some(mut slot) = self.slot.try_acquire() else {
            return false;
        };

        info!("Recycling shell after {:?} idle", self.status_read().idle_for());
        if let Some(mut session) = slot.take() {
            if let Err(e) = session.terminate(self.shell.terminate_grace()).await {
                debug!("Terminating idle shell: {}", e);
            }
        }
        self.status_mut().mark_dead();

        match self.spawn_into(&mut slot, "idle").await {
            Ok(_) => true,
            Err(e) => {
                warn!("Respawn after idle recycle failed: {}", e);
                false
            }
        }
    }

    /// Stop the supervisor and the shell
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down session manager");

        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.stop().await;
        }

        let mut slot = self.slot.acquire().await;
        if let Some(mut session) = slot.take() {
            if let Err(e) = session.terminate(self.shell.terminate_grace()).await {
                warn!("Terminating shell on shutdown: {}", e);
            }
        }
        self.status_mut().mark_dead();
    }

    fn status_read(&self) -> RwLockReadGuard<'_, SessionStatus> {
        self.status.read().unwrap_or_else(|e| {
            warn!("session status lock was poisoned, recovering");
            e.into_inner()
        })
    }

    fn status_mut(&self) -> RwLockWriteGuard<'_, SessionStatus> {
        self.status.write().unwrap_or_else(|e| {
            warn!("session status lock was poisoned, recovering");
            e.into_inner()
        })
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("initial_cwd", &self.initial_cwd)
            .field("status", &*self.status_read())
            .field("queue_depth", &self.slot.queue_depth())
            .finish()
    }
}

/// Configured workspace, or the process cwd when it does not exist
fn initial_working_directory(configured: &Path) -> PathBuf {
    if configured.is_dir() {
        return configured.to_path_buf();
    }
    let fallback = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    warn!(
        "Working directory {} does not exist, using {}",
        configured.display(),
        fallback.display()
    );
    fallback
}
