//! Online/offline signal shared by the coordinator and its triggers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::FeedbackTransport;

/// Handle to the current connectivity state. Clones share the same state.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record the current state. Returns `true` when this was a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                info!("Connectivity restored");
            } else {
                warn!("Connectivity lost");
            }
        }
        changed
    }

    /// Receiver notified on every transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Probe the API health endpoint every `every` and publish the result.
///
/// Transport faults mean offline. A reachable server answering with an error
/// status is still online: the queue decides what to do with rejections.
pub async fn probe_task(
    transport: Arc<dyn FeedbackTransport>,
    connectivity: Connectivity,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let online = match transport.health().await {
                    Ok(()) => true,
                    Err(e) if e.is_transport_fault() => {
                        debug!(error = %e, "Health probe failed");
                        false
                    }
                    Err(e) => {
                        debug!(error = %e, "Health probe answered with an error");
                        true
                    }
                };
                connectivity.set_online(online);
            }
            _ = shutdown.changed() => {
                debug!("Connectivity probe stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, PublicSummary, SubmitResponse};
    use crate::event::FeedbackEvent;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ToggleHealth {
        up: AtomicBool,
    }

    #[async_trait]
    impl FeedbackTransport for ToggleHealth {
        async fn submit(&self, _event: &FeedbackEvent) -> Result<SubmitResponse, ClientError> {
            Ok(SubmitResponse::default())
        }

        async fn summary(&self) -> Result<PublicSummary, ClientError> {
            Ok(PublicSummary::default())
        }

        async fn health(&self) -> Result<(), ClientError> {
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ClientError::Timeout)
            }
        }
    }

    #[test]
    fn test_transitions_are_reported_once() {
        let connectivity = Connectivity::new(false);
        assert!(!connectivity.is_online());

        assert!(connectivity.set_online(true));
        assert!(!connectivity.set_online(true));
        assert!(connectivity.is_online());
        assert!(connectivity.set_online(false));
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let connectivity = Connectivity::new(false);
        let mut rx = connectivity.subscribe();

        connectivity.clone().set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn test_probe_follows_health() {
        let transport = Arc::new(ToggleHealth {
            up: AtomicBool::new(false),
        });
        let connectivity = Connectivity::new(true);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(probe_task(
            transport.clone(),
            connectivity.clone(),
            Duration::from_millis(10),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!connectivity.is_online());

        transport.up.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(connectivity.is_online());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
