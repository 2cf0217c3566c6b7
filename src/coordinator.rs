//! Delivery coordinator: submits taps and drains the pending queue.
//!
//! The coordinator owns the pending queue, the id generator and one
//! reentrancy flag. The flag is held by whichever delivery is in flight,
//! either a drain pass or an immediate submission, so at most one request is
//! outstanding and events reach the endpoint in creation order:
//!
//! - a tap is sent immediately only when online, nothing is pending and the
//!   flag is free; otherwise it is appended to the queue tail;
//! - if an immediate send fails with a retryable error, the event goes back
//!   to the queue *front*, ahead of anything queued while it was in flight;
//! - a drain pass submits the head, pops it on acknowledgement and stops at
//!   the first failure without skipping ahead.
//!
//! Queue access happens under a mutex that is released before every await.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{watch, Notify};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::{ClientError, FeedbackTransport, PublicSummary, ServerId, SubmitResponse};
use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::event::{FeedbackEvent, SatisfactionGrade};
use crate::ident::NumericIdGenerator;
use crate::queue::{PendingQueue, PopOutcome};
use crate::storage::SlotStore;

/// Base delay for backing off periodic drains after a failed pass (in milliseconds).
const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Maximum delay between timer-driven drain attempts (in milliseconds).
const MAX_RETRY_DELAY_MS: u64 = 300_000;

/// Timings and switches for a coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Deadline for one submission; expiry counts as a transport fault
    pub request_timeout: Duration,

    /// Taps closer together than this are ignored
    pub tap_cooldown: Duration,

    /// Fetch the public summary after a pass that delivered something
    pub refresh_summary_on_delivery: bool,

    /// Interval between periodic drains in [`DeliveryCoordinator::run`]
    pub flush_interval: Duration,

    /// Interval between summary refreshes in [`DeliveryCoordinator::run`]
    pub summary_interval: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for CoordinatorSettings {
    fn from(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout,
            tap_cooldown: config.tap_cooldown,
            refresh_summary_on_delivery: config.refresh_summary_on_delivery,
            flush_interval: config.flush_interval,
            summary_interval: config.summary_interval,
        }
    }
}

/// What happened to a tap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Acknowledged by the endpoint right away
    Delivered {
        local_id: Option<u64>,
        server_id: Option<ServerId>,
        message: Option<String>,
    },

    /// Stored in the pending queue for later delivery
    Queued { pending: usize },

    /// Refused by the endpoint; not queued
    Rejected { message: String },

    /// Ignored because it came within the tap cooldown
    Throttled,
}

/// Why a drain pass stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue is empty
    Completed,

    /// Connectivity is down
    Offline,

    /// A submission failed; the event stays at the head
    Halted { error: String },

    /// Another delivery already held the flag; nothing was done
    AlreadyDraining,
}

/// Result of one drain pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub remaining: usize,
    pub outcome: DrainOutcome,
}

impl DrainReport {
    pub fn is_halted(&self) -> bool {
        matches!(self.outcome, DrainOutcome::Halted { .. })
    }
}

/// Snapshot for the kiosk's status indicator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStatus {
    pub pending: usize,
    pub online: bool,
    pub draining: bool,
    pub last_error: Option<String>,
}

/// Coordinates immediate submissions and queue drains.
pub struct DeliveryCoordinator {
    transport: Arc<dyn FeedbackTransport>,
    queue: Mutex<PendingQueue>,
    pending_rx: watch::Receiver<usize>,
    ids: NumericIdGenerator,
    connectivity: Connectivity,
    settings: CoordinatorSettings,

    /// Reentrancy flag: set while a delivery is in flight
    delivering: AtomicBool,

    /// Wakes the background loop after an event was queued
    wake: Notify,

    /// Asks the background loop for a summary refresh
    summary_due: Notify,

    last_tap: Mutex<Option<Instant>>,
    status_tx: watch::Sender<DeliveryStatus>,
    summary_tx: watch::Sender<Option<PublicSummary>>,
}

/// Holds the reentrancy flag; releases it on drop, whatever the exit path.
struct DeliveryGuard<'a> {
    owner: &'a DeliveryCoordinator,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.owner.delivering.store(false, Ordering::Release);
        self.owner.publish_status();
    }
}

impl DeliveryCoordinator {
    /// Build a coordinator over `store`. Events pending from a previous run
    /// are picked up from the store.
    pub fn new(
        transport: Arc<dyn FeedbackTransport>,
        store: Arc<dyn SlotStore>,
        connectivity: Connectivity,
        settings: CoordinatorSettings,
    ) -> Self {
        let queue = PendingQueue::new(store.clone());
        let pending_rx = queue.subscribe();
        let (status_tx, _) = watch::channel(DeliveryStatus::default());
        let (summary_tx, _) = watch::channel(None);

        let coordinator = Self {
            transport,
            queue: Mutex::new(queue),
            pending_rx,
            ids: NumericIdGenerator::new(store),
            connectivity,
            settings,
            delivering: AtomicBool::new(false),
            wake: Notify::new(),
            summary_due: Notify::new(),
            last_tap: Mutex::new(None),
            status_tx,
            summary_tx,
        };
        coordinator.publish_status();
        coordinator
    }

    /// Record a tap: deliver it now if possible, otherwise queue it.
    ///
    /// Never fails: the caller always gets an outcome to show.
    pub async fn submit(&self, grade: SatisfactionGrade) -> SubmitOutcome {
        if !self.accept_tap() {
            debug!(grade = %grade, "Tap ignored during cooldown");
            return SubmitOutcome::Throttled;
        }

        let now = Utc::now();
        let event = FeedbackEvent::at(grade, now).with_local_id(self.ids.next_id(now));

        if !self.connectivity.is_online() {
            return self.defer(event, "offline");
        }

        let guard = match self.try_begin() {
            Some(guard) => guard,
            None => return self.defer(event, "delivery in progress"),
        };

        let has_pending = !self.queue().is_empty();
        if has_pending {
            drop(guard);
            return self.defer(event, "earlier feedback pending");
        }

        let result = self.send(&event).await;
        match result {
            Ok(response) => {
                drop(guard);
                self.clear_error();
                if self.pending() > 0 {
                    // Taps deferred while this one was in flight.
                    self.wake.notify_one();
                }
                info!(
                    grade = %grade,
                    local_id = ?event.local_id,
                    server_id = ?response.id,
                    "Feedback delivered"
                );
                if self.settings.refresh_summary_on_delivery {
                    self.summary_due.notify_one();
                }
                SubmitOutcome::Delivered {
                    local_id: event.local_id,
                    server_id: response.id,
                    message: response.message,
                }
            }
            Err(e) if e.is_retryable() => {
                let pending = self.queue().push_front(event);
                self.record_error(&e);
                drop(guard);
                warn!(error = %e, pending = pending, "Feedback submission failed, queued for retry");
                self.wake.notify_one();
                SubmitOutcome::Queued { pending }
            }
            Err(e) => {
                drop(guard);
                self.record_error(&e);
                warn!(error = %e, grade = %grade, "Feedback rejected by server");
                let message = match e {
                    ClientError::Status { message, .. } => message,
                    other => other.to_string(),
                };
                SubmitOutcome::Rejected { message }
            }
        }
    }

    /// Deliver queued events in order until the queue is empty, the kiosk
    /// goes offline, or a submission fails.
    ///
    /// Returns immediately with [`DrainOutcome::AlreadyDraining`] when
    /// another delivery is in flight.
    pub async fn drain(&self) -> DrainReport {
        let Some(guard) = self.try_begin() else {
            debug!("Drain skipped, delivery already in progress");
            return DrainReport {
                delivered: 0,
                remaining: self.pending(),
                outcome: DrainOutcome::AlreadyDraining,
            };
        };

        let mut delivered = 0;
        let outcome = loop {
            if !self.connectivity.is_online() {
                break DrainOutcome::Offline;
            }

            let head = self.queue().peek();
            let Some(event) = head else {
                break DrainOutcome::Completed;
            };

            let result = self.send(&event).await;
            match result {
                Ok(response) => {
                    let popped = self.queue().pop_front_if(&event);
                    match popped {
                        PopOutcome::Removed => {
                            delivered += 1;
                            debug!(
                                grade = %event.grade,
                                local_id = ?event.local_id,
                                server_id = ?response.id,
                                "Queued feedback delivered"
                            );
                            self.publish_status();
                        }
                        PopOutcome::HeadChanged => {
                            let error = "Queue head changed during delivery".to_string();
                            warn!(local_id = ?event.local_id, "{}", error);
                            self.record_message(error.clone());
                            break DrainOutcome::Halted { error };
                        }
                        PopOutcome::PersistFailed => {
                            // Acknowledged, but still stored: the next pass sends it again.
                            delivered += 1;
                            let error = "Failed to remove delivered feedback from the queue"
                                .to_string();
                            warn!(
                                local_id = ?event.local_id,
                                server_id = ?response.id,
                                "{}", error
                            );
                            self.record_message(error.clone());
                            break DrainOutcome::Halted { error };
                        }
                    }
                }
                Err(e) => {
                    self.record_error(&e);
                    warn!(
                        error = %e,
                        grade = %event.grade,
                        delivered = delivered,
                        "Drain halted"
                    );
                    break DrainOutcome::Halted {
                        error: e.to_string(),
                    };
                }
            }
        };

        if outcome == DrainOutcome::Completed && delivered > 0 {
            self.clear_error();
        }

        let remaining = self.pending();
        if delivered > 0 {
            info!(delivered = delivered, remaining = remaining, "Drained pending feedback");
        }

        drop(guard);
        if delivered > 0 && self.settings.refresh_summary_on_delivery {
            self.refresh_summary().await;
        }

        DrainReport {
            delivered,
            remaining,
            outcome,
        }
    }

    /// Explicit flush request from the host.
    pub async fn flush(&self) -> DrainReport {
        self.drain().await
    }

    /// Fetch the public summary and publish it. Failures keep the previous
    /// value.
    pub async fn refresh_summary(&self) -> Option<PublicSummary> {
        match timeout(self.settings.request_timeout, self.transport.summary()).await {
            Ok(Ok(summary)) => {
                self.summary_tx.send_replace(Some(summary.clone()));
                Some(summary)
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Summary refresh failed");
                None
            }
            Err(_) => {
                debug!("Summary refresh timed out");
                None
            }
        }
    }

    /// Background loop: drains on the periodic timer, after a queued tap and
    /// when connectivity comes back; refreshes the summary on its own timer
    /// and after immediate deliveries.
    /// Stops when `shutdown` changes.
    ///
    /// Failed timer-driven passes back off exponentially; an online
    /// transition or a fresh tap retries right away.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut flush_ticker = interval(self.settings.flush_interval);
        flush_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick; startup drains explicitly below.
        flush_ticker.tick().await;

        let mut summary_ticker = interval(self.settings.summary_interval);
        summary_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut online_rx = self.connectivity.subscribe();
        let mut backoff = Backoff::default();

        info!(pending = self.pending(), "Delivery coordinator started");
        let report = self.drain().await;
        backoff.record(&report);

        loop {
            tokio::select! {
                _ = flush_ticker.tick() => {
                    if backoff.ready(Instant::now()) {
                        let report = self.drain().await;
                        backoff.record(&report);
                    } else {
                        debug!(failures = backoff.failures, "Periodic drain backing off");
                    }
                }

                _ = self.wake.notified() => {
                    let report = self.drain().await;
                    backoff.record(&report);
                }

                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    self.publish_status();
                    if online {
                        backoff.reset();
                        let report = self.drain().await;
                        backoff.record(&report);
                    }
                }

                _ = summary_ticker.tick() => {
                    self.refresh_summary().await;
                }

                _ = self.summary_due.notified() => {
                    self.refresh_summary().await;
                }

                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        info!(pending = self.pending(), "Delivery coordinator stopped");
    }

    /// Number of events waiting in the queue.
    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    /// Snapshot of the queued events, oldest first.
    pub fn pending_events(&self) -> Vec<FeedbackEvent> {
        self.queue().load()
    }

    pub fn status(&self) -> DeliveryStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<DeliveryStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_summary(&self) -> watch::Receiver<Option<PublicSummary>> {
        self.summary_tx.subscribe()
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    fn queue(&self) -> MutexGuard<'_, PendingQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_begin(&self) -> Option<DeliveryGuard<'_>> {
        self.delivering
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.publish_status();
        Some(DeliveryGuard { owner: self })
    }

    /// Submit under the configured deadline.
    async fn send(&self, event: &FeedbackEvent) -> Result<SubmitResponse, ClientError> {
        match timeout(self.settings.request_timeout, self.transport.submit(event)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Append to the queue tail and wake the drainer.
    fn defer(&self, event: FeedbackEvent, reason: &'static str) -> SubmitOutcome {
        let grade = event.grade;
        let pending = self.queue().push(event);
        self.publish_status();
        info!(grade = %grade, pending = pending, reason = reason, "Feedback queued");
        if self.connectivity.is_online() {
            self.wake.notify_one();
        }
        SubmitOutcome::Queued { pending }
    }

    fn accept_tap(&self) -> bool {
        let cooldown = self.settings.tap_cooldown;
        if cooldown.is_zero() {
            return true;
        }

        let mut last = self.last_tap.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match *last {
            Some(previous) if now.duration_since(previous) < cooldown => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    fn publish_status(&self) {
        let pending = *self.pending_rx.borrow();
        let online = self.connectivity.is_online();
        let draining = self.delivering.load(Ordering::Acquire);
        self.status_tx.send_if_modified(|status| {
            let changed =
                status.pending != pending || status.online != online || status.draining != draining;
            status.pending = pending;
            status.online = online;
            status.draining = draining;
            changed
        });
    }

    fn record_error(&self, error: &ClientError) {
        self.record_message(error.to_string());
    }

    fn record_message(&self, message: String) {
        self.status_tx.send_modify(|status| status.last_error = Some(message));
        self.publish_status();
    }

    fn clear_error(&self) {
        self.status_tx.send_if_modified(|status| status.last_error.take().is_some());
        self.publish_status();
    }
}

/// Exponential backoff for timer-driven drains.
#[derive(Debug, Default)]
struct Backoff {
    failures: u32,
    retry_at: Option<Instant>,
}

impl Backoff {
    fn record(&mut self, report: &DrainReport) {
        match report.outcome {
            DrainOutcome::Halted { .. } => {
                self.failures = self.failures.saturating_add(1);
                let delay = retry_delay(self.failures);
                debug!(
                    failures = self.failures,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling next periodic drain"
                );
                self.retry_at = Some(Instant::now() + delay);
            }
            DrainOutcome::Completed => self.reset(),
            DrainOutcome::Offline | DrainOutcome::AlreadyDraining => {}
        }
    }

    fn ready(&self, now: Instant) -> bool {
        self.retry_at.map_or(true, |at| now >= at)
    }

    fn reset(&mut self) {
        self.failures = 0;
        self.retry_at = None;
    }
}

/// Delay before the next periodic drain after `failures` failed passes.
///
/// Uses exponential backoff with jitter:
/// delay = min(base_delay * 2^(failures - 1) + jitter, max_delay)
fn retry_delay(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    let exponential_delay = DEFAULT_BASE_DELAY_MS.saturating_mul(1 << exponent);

    // Add jitter (up to 25% of the delay)
    let jitter = rand::random::<u64>() % (exponential_delay / 4 + 1);

    Duration::from_millis(exponential_delay.saturating_add(jitter).min(MAX_RETRY_DELAY_MS))
}
