//! Background maintenance: message expiry and idle-session eviction.
//!
//! Each sweep runs on its own task, sleeps for its period, runs to completion
//! over the whole registry, then re-arms. A sweep therefore never overlaps with
//! itself. Cancelling the shared token stops both.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use super::events::{ConnectionEvent, EventHub};
use super::registry::SessionRegistry;

/// Periods and thresholds for both sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    pub gc_interval: Duration,
    pub message_expiry: Duration,
    pub disconnect_interval: Duration,
    pub disconnect_timeout: Duration,
}

/// Drop expired messages from every session buffer.
pub fn collect_garbage(
    registry: &SessionRegistry,
    now: Instant,
    message_expiry: Duration,
) -> usize {
    let removed = registry.expire_messages(now, message_expiry);
    if removed > 0 {
        tracing::debug!(removed, "expired buffered messages");
    }
    removed
}

/// Evict idle sessions, firing one `disconnect` per evicted id.
pub fn disconnect_idle(
    registry: &SessionRegistry,
    events: &EventHub,
    now: Instant,
    timeout: Duration,
) -> Vec<String> {
    let removed = registry.remove_idle(now, timeout);
    for client_id in &removed {
        tracing::info!(client_id = %client_id, "session timed out");
        events.emit(ConnectionEvent::Disconnected {
            client_id: client_id.clone(),
        });
    }
    removed
}

/// A self-rearming background task stopped by a cancellation token.
struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    fn spawn<F>(name: &'static str, period: Duration, token: CancellationToken, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = time::sleep(period) => tick(),
                    () = token.cancelled() => {
                        tracing::debug!(task = name, "stopping sweep");
                        break;
                    }
                }
            }
        });
        Self { name, handle }
    }
}

/// Owner of the two sweep tasks.
pub struct SweepScheduler {
    token: CancellationToken,
    tasks: Vec<PeriodicTask>,
}

impl SweepScheduler {
    /// Spawn both sweeps on the current tokio runtime.
    pub fn start(
        registry: Arc<SessionRegistry>,
        events: Arc<EventHub>,
        settings: SweepSettings,
    ) -> Self {
        let token = CancellationToken::new();

        let gc_registry = registry.clone();
        let gc = PeriodicTask::spawn("message_gc", settings.gc_interval, token.clone(), move || {
            collect_garbage(&gc_registry, Instant::now(), settings.message_expiry);
        });

        let monitor = PeriodicTask::spawn(
            "disconnection_monitor",
            settings.disconnect_interval,
            token.clone(),
            move || {
                disconnect_idle(&registry, &events, Instant::now(), settings.disconnect_timeout);
            },
        );

        tracing::debug!(
            gc_interval = ?settings.gc_interval,
            disconnect_interval = ?settings.disconnect_interval,
            "sweeps started"
        );

        Self {
            token,
            tasks: vec![gc, monitor],
        }
    }

    /// Cancel both sweeps and wait for them to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(err) = task.handle.await {
                tracing::warn!(task = task.name, ?err, "sweep task ended abnormally");
            }
        }
    }
}
