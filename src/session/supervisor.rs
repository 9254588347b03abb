//! Session Supervisor
//!
//! Background task that periodically probes the shell's liveness and
//! recycles it after an idle period. It holds only a weak reference to the
//! manager and exits on its own once the manager is dropped.

use std::sync::Weak;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::SessionManager;

/// Handle to a running supervisor task
#[derive(Debug)]
pub struct SupervisorHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Signal the task and wait for it to finish
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            if !e.is_cancelled() {
                warn!("Session supervisor task failed: {}", e);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some() {
            self.task.abort();
        }
    }
}

/// Start supervising `manager`
pub fn spawn(
    manager: Weak<SessionManager>,
    probe_interval: Duration,
    idle_timeout: Option<Duration>,
) -> SupervisorHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        info!(
            "Session supervisor started (probe every {:?}, idle timeout {:?})",
            probe_interval, idle_timeout
        );
        let mut ticker = tokio::time::interval(probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    let Some(manager) = manager.upgrade() else {
                        break;
                    };
                    manager.probe_liveness();
                    if let Some(idle) = idle_timeout {
                        manager.recycle_if_idle(idle).await;
                    }
                }
            }
        }
        debug!("Session supervisor stopped");
    });

    SupervisorHandle {
        shutdown_tx: Some(shutdown_tx),
        task,
    }
}
