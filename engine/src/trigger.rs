//! Decides when reconciliation runs.
//!
//! A [`TriggerCoordinator`] owns one background task per owner. It runs the
//! engine on startup (when online), on every Offline to Online transition, on
//! each interval tick while online, on explicit requests, and on a backoff
//! schedule after a failed run. Offline ticks are skipped, not queued.
//!
//! The policy itself lives in [`TriggerState`], which has no I/O and is
//! tested on its own.

use crate::config::{RetryPolicy, TriggerConfig};
use crate::network::ConnectivityReceiver;
use crate::reconcile::{SyncEngine, SyncResult};
use crate::remote::RemoteClient;
use crate::store::LocalStore;
use crate::{error::Result, Error, OwnerId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Cache-table key holding the most recent triggered run's result.
pub const LAST_SYNC_RESULT_KEY: &str = "last_sync_result";

/// Why the coordinator woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    WentOnline,
    WentOffline,
    Tick,
    Retry,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Run,
    Skip,
}

/// Trigger policy: connectivity as last observed plus the failure streak.
#[derive(Debug, Clone)]
pub struct TriggerState {
    online: bool,
    failures: u32,
    retry: Option<RetryPolicy>,
}

impl TriggerState {
    pub fn new(online: bool, retry: Option<RetryPolicy>) -> Self {
        Self {
            online,
            failures: 0,
            retry,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Consecutive failed runs since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn decide(&mut self, trigger: Trigger) -> Decision {
        let run = match trigger {
            Trigger::WentOnline => {
                let was_online = std::mem::replace(&mut self.online, true);
                !was_online
            }
            Trigger::WentOffline => {
                self.online = false;
                self.failures = 0;
                false
            }
            Trigger::Startup | Trigger::Tick | Trigger::Retry => self.online,
            Trigger::Manual => true,
        };
        if run {
            Decision::Run
        } else {
            Decision::Skip
        }
    }

    /// Feed back a run's result. Returns the delay before a retry, if one
    /// should be scheduled.
    pub fn record_outcome(&mut self, result: &SyncResult) -> Option<Duration> {
        if result.success {
            self.failures = 0;
            return None;
        }
        if result.is_busy() || result.is_offline() || !self.online {
            return None;
        }
        let policy = self.retry?;
        self.failures = self.failures.saturating_add(1);
        Some(policy.delay(self.failures))
    }
}

enum Command {
    Sync(oneshot::Sender<SyncResult>),
    Shutdown,
}

/// Handle to a running coordinator task.
pub struct TriggerHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl TriggerHandle {
    /// Run reconciliation now, regardless of connectivity, and wait for its
    /// result. The engine's own guards still apply.
    pub async fn request_sync(&self) -> Result<SyncResult> {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(Command::Sync(reply))
            .await
            .map_err(|_| Error::CoordinatorStopped)?;
        result.await.map_err(|_| Error::CoordinatorStopped)
    }

    /// Stop the coordinator and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "sync coordinator task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Background task scheduling sync runs for one owner.
pub struct TriggerCoordinator<S: ?Sized, R: ?Sized> {
    engine: Arc<SyncEngine<S, R>>,
    owner: OwnerId,
    connectivity: ConnectivityReceiver,
    config: TriggerConfig,
    retry_at: Option<Instant>,
}

impl<S, R> TriggerCoordinator<S, R>
where
    S: LocalStore + ?Sized + 'static,
    R: RemoteClient + ?Sized + 'static,
{
    /// Start the coordinator on the current tokio runtime.
    pub fn spawn(
        engine: Arc<SyncEngine<S, R>>,
        owner: impl Into<OwnerId>,
        connectivity: ConnectivityReceiver,
        config: TriggerConfig,
    ) -> TriggerHandle {
        let (commands, rx) = mpsc::channel(16);
        let coordinator = Self {
            engine,
            owner: owner.into(),
            connectivity,
            config,
            retry_at: None,
        };
        let task = tokio::spawn(coordinator.run(rx));
        TriggerHandle { commands, task }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let online = self.connectivity.borrow_and_update().is_online();
        let mut state = TriggerState::new(online, self.config.retry);

        let period = self.config.interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watching = true;

        tracing::info!(owner = %self.owner, online, interval_secs = period.as_secs(), "sync coordinator started");
        self.fire(Trigger::Startup, &mut state).await;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Sync(reply)) => {
                        if let Some(result) = self.fire(Trigger::Manual, &mut state).await {
                            let _ = reply.send(result);
                        }
                    }
                    Some(Command::Shutdown) | None => break,
                },
                changed = self.connectivity.changed(), if watching => {
                    if changed.is_err() {
                        tracing::warn!(owner = %self.owner, "connectivity signal closed");
                        watching = false;
                        continue;
                    }
                    let now = *self.connectivity.borrow_and_update();
                    let trigger = if now.is_online() {
                        Trigger::WentOnline
                    } else {
                        self.retry_at = None;
                        Trigger::WentOffline
                    };
                    self.fire(trigger, &mut state).await;
                }
                _ = ticker.tick() => {
                    self.fire(Trigger::Tick, &mut state).await;
                }
                _ = sleep_until(self.retry_at), if self.retry_at.is_some() => {
                    self.retry_at = None;
                    self.fire(Trigger::Retry, &mut state).await;
                }
            }
        }

        tracing::info!(owner = %self.owner, "sync coordinator stopped");
    }

    /// Apply the policy to `trigger` and run the engine if it says so.
    async fn fire(&mut self, trigger: Trigger, state: &mut TriggerState) -> Option<SyncResult> {
        if state.decide(trigger) == Decision::Skip {
            tracing::trace!(owner = %self.owner, ?trigger, "trigger skipped");
            return None;
        }

        tracing::debug!(owner = %self.owner, ?trigger, "running sync");
        let result = self.engine.sync(&self.owner).await;
        self.persist(&result).await;

        match state.record_outcome(&result) {
            Some(delay) => {
                tracing::info!(
                    owner = %self.owner,
                    attempt = state.failures(),
                    delay_secs = delay.as_secs(),
                    "sync failed, retry scheduled"
                );
                self.retry_at = Some(Instant::now() + delay);
            }
            None if !result.is_busy() => self.retry_at = None,
            None => {}
        }
        Some(result)
    }

    async fn persist(&self, result: &SyncResult) {
        let value = match serde_json::to_value(result) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode sync result");
                return;
            }
        };
        if let Err(e) = self
            .engine
            .store()
            .put_cache_entry(LAST_SYNC_RESULT_KEY, value, self.config.result_ttl)
            .await
        {
            tracing::warn!(owner = %self.owner, error = %e, "failed to store sync result");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The last persisted triggered-run result, if still live.
pub async fn last_sync_result<S: LocalStore + ?Sized>(store: &S) -> Result<Option<SyncResult>> {
    match store.get_cache_entry(LAST_SYNC_RESULT_KEY).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}
