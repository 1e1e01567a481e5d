//! Notification-to-broadcast pipeline.
//!
//! `DispatchLoop` drains one subscription and broadcasts every notification it
//! yields. `Dispatcher` keeps a loop running as a supervised background task:
//! when the subscription fails or ends it re-subscribes with exponential
//! backoff, and it publishes its current state so the web layer can report it.

use crate::error::Error;
use crate::message::Event;
use crate::registry::{BroadcastReport, ConnectionRegistry};
use events::{Notification, NotificationSource, Subscription};
use log::*;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

/// Drains a subscription into `ConnectionRegistry::broadcast`.
pub struct DispatchLoop {
    registry: Arc<ConnectionRegistry>,
    delivered: AtomicU64,
}

impl DispatchLoop {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            delivered: AtomicU64::new(0),
        }
    }

    /// Total notifications broadcast by this loop since it was created.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    /// Serialize one notification and broadcast it to every registered session.
    ///
    /// Returns once the whole fanout pass has completed.
    pub async fn dispatch(&self, notification: Notification) -> Result<BroadcastReport, Error> {
        info!(
            "Database notification on channel {}: {}",
            notification.channel, notification.payload
        );

        let message = Event::from(notification).to_message()?;
        let report = self.registry.broadcast(&message).await;
        self.delivered.fetch_add(1, Ordering::AcqRel);
        Ok(report)
    }

    /// Process notifications in arrival order until the subscription ends or fails.
    ///
    /// `Ok(())` means the subscription ended cleanly; `Err` carries the failure.
    /// Either way the loop is terminated when this returns.
    pub async fn run(&self, subscription: &mut dyn Subscription) -> Result<(), Error> {
        loop {
            match subscription.next().await {
                Ok(Some(notification)) => {
                    if let Err(e) = self.dispatch(notification).await {
                        // A notification that cannot be serialized is skipped, not fatal
                        error!("Failed to dispatch notification: {e}");
                    }
                }
                Ok(None) => {
                    warn!("Notification subscription ended");
                    return Ok(());
                }
                Err(e) => {
                    let e = Error::from(e);
                    error!("Notification subscription failed: {e}");
                    return Err(e);
                }
            }
        }
    }
}

/// Smallest delay allowed between re-subscription attempts.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Exponential backoff between re-subscription attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Consecutive failed attempts allowed before giving up; 0 retries forever.
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }

    /// `base_delay` is clamped to at least `MIN_RETRY_DELAY`.
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay.max(MIN_RETRY_DELAY);
        self.max_delay = max_delay.max(self.base_delay);
        self
    }

    pub fn should_retry(&self, n_past_retries: u32) -> bool {
        self.max_retries == 0 || n_past_retries < self.max_retries
    }

    /// Delay before retry number `n_past_retries + 1`.
    pub fn delay(&self, n_past_retries: u32) -> Duration {
        let exponent = n_past_retries.min(31) as i32;
        let delay = self.base_delay.as_secs_f64() * 2_f64.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Run state of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DispatchState {
    Starting,
    Draining,
    Reconnecting { attempt: u32 },
    Terminated,
}

/// Read-only view of a running dispatcher's state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DispatchStatus(watch::Receiver<DispatchState>);

impl DispatchStatus {
    pub fn current(&self) -> DispatchState {
        *self.0.borrow()
    }

    /// Wait until the dispatcher reaches `state`.
    pub async fn wait_for(&mut self, state: DispatchState) -> DispatchState {
        match self.0.wait_for(|current| *current == state).await {
            Ok(current) => *current,
            // Sender dropped: the supervisor has exited
            Err(_) => DispatchState::Terminated,
        }
    }
}

impl From<watch::Receiver<DispatchState>> for DispatchStatus {
    fn from(receiver: watch::Receiver<DispatchState>) -> Self {
        Self(receiver)
    }
}

/// Handle to a spawned dispatcher.
pub struct DispatchHandle {
    status: DispatchStatus,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DispatchHandle {
    pub fn state(&self) -> DispatchState {
        self.status.current()
    }

    pub fn status(&self) -> DispatchStatus {
        self.status.clone()
    }

    /// Cancel the dispatcher and wait for it to stop.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Dispatcher task failed to shut down cleanly: {e}");
        }
    }
}

/// Supervises a `DispatchLoop` for one notification channel.
pub struct Dispatcher {
    source: Arc<dyn NotificationSource>,
    dispatch: DispatchLoop,
    channel: String,
    policy: RetryPolicy,
    state: watch::Sender<DispatchState>,
}

impl Dispatcher {
    pub fn new(
        source: Arc<dyn NotificationSource>,
        registry: Arc<ConnectionRegistry>,
        channel: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        let (state, _) = watch::channel(DispatchState::Starting);
        Self {
            source,
            dispatch: DispatchLoop::new(registry),
            channel: channel.into(),
            policy,
            state,
        }
    }

    /// Start the dispatcher on the current Tokio runtime.
    ///
    /// The task stops when `cancel` is cancelled or the retry policy is exhausted.
    pub fn spawn(self, cancel: CancellationToken) -> DispatchHandle {
        let status = DispatchStatus(self.state.subscribe());
        let task = tokio::spawn(self.supervise(cancel.clone()));
        DispatchHandle {
            status,
            cancel,
            task,
        }
    }

    async fn supervise(self, cancel: CancellationToken) {
        info!(
            "Starting database notification dispatcher on channel {}",
            self.channel
        );
        let mut attempt: u32 = 0;

        loop {
            let delivered_before = self.dispatch.delivered();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.subscribe_and_drain() => outcome,
            };

            // A subscription that delivered anything counts as a recovery
            if self.dispatch.delivered() > delivered_before {
                attempt = 0;
            }

            match outcome {
                Ok(()) => warn!("Subscription to channel {} ended", self.channel),
                Err(e) => error!("Subscription to channel {} failed: {e}", self.channel),
            }

            if !self.policy.should_retry(attempt) {
                error!(
                    "Giving up on channel {} after {attempt} consecutive failed attempts",
                    self.channel
                );
                break;
            }

            let delay = self.policy.delay(attempt);
            attempt += 1;
            self.state
                .send_replace(DispatchState::Reconnecting { attempt });
            info!(
                "Re-subscribing to channel {} in {:?} (attempt {attempt})",
                self.channel, delay
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_replace(DispatchState::Terminated);
        info!(
            "Database notification dispatcher on channel {} terminated",
            self.channel
        );
    }

    async fn subscribe_and_drain(&self) -> Result<(), Error> {
        let mut subscription = self.source.subscribe(&self.channel).await?;
        info!("Listening for notifications on channel {}", self.channel);
        self.state.send_replace(DispatchState::Draining);

        self.dispatch.run(subscription.as_mut()).await
    }
}
