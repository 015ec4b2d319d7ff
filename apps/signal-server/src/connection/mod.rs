//! Long-poll persistent connection: session lifecycle, buffered delivery,
//! dispatch, and background sweeps.

pub mod events;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod sweep;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use parking_lot::Mutex;
use serde_json::Value;
use signal_common::{IdGenerator, UlidGenerator};
use tokio::sync::broadcast;
use tokio::time::Instant;

use events::{ConnectionEvent, ConnectionHandler, EventHub};
use registry::{SessionInfo, SessionRegistry};
use session::Backoff;
use sweep::{SweepScheduler, SweepSettings};

/// Connection name used when none is configured.
pub const DEFAULT_NAME: &str = "signalr";

/// Tunables for one persistent connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Path prefix the endpoints live under (`/{name}/...`).
    pub name: String,
    pub message_expiry: Duration,
    pub gc_interval: Duration,
    pub disconnect_timeout: Duration,
    pub disconnect_interval: Duration,
    pub poll_delay_step: Duration,
    pub max_poll_delay: Duration,
    /// Upper bound on receiving a full request body.
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            message_expiry: Duration::from_secs(15),
            gc_interval: Duration::from_secs(15),
            disconnect_timeout: Duration::from_secs(60),
            disconnect_interval: Duration::from_secs(60),
            poll_delay_step: Duration::from_millis(1000),
            max_poll_delay: Duration::from_millis(5000),
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 64 * 1024,
        }
    }
}

impl ConnectionOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// `/{name}`
    pub fn base_path(&self) -> String {
        format!("/{}", self.name)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            step: self.poll_delay_step,
            max: self.max_poll_delay,
        }
    }

    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings {
            gc_interval: self.gc_interval,
            message_expiry: self.message_expiry,
            disconnect_interval: self.disconnect_interval,
            disconnect_timeout: self.disconnect_timeout,
        }
    }
}

/// A named long-poll endpoint and everything it owns.
///
/// Created once at server start; [`init`](Self::init) starts the sweeps and
/// hands back the router to mount, [`shutdown`](Self::shutdown) stops them.
pub struct PersistentConnection {
    options: ConnectionOptions,
    registry: Arc<SessionRegistry>,
    events: Arc<EventHub>,
    ids: Arc<dyn IdGenerator>,
    sweeps: Mutex<Option<SweepScheduler>>,
}

impl PersistentConnection {
    pub fn new(options: ConnectionOptions) -> Self {
        Self::with_id_generator(options, Arc::new(UlidGenerator::default()))
    }

    pub fn with_id_generator(options: ConnectionOptions, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            options,
            registry: Arc::new(SessionRegistry::new()),
            events: Arc::new(EventHub::new()),
            ids,
            sweeps: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub(crate) fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub(crate) fn events(&self) -> &EventHub {
        &self.events
    }

    pub(crate) fn ids(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start both sweeps (once) and return the router serving this
    /// connection's endpoints.
    pub fn init(self: &Arc<Self>) -> Router {
        let mut sweeps = self.sweeps.lock();
        if sweeps.is_none() {
            *sweeps = Some(SweepScheduler::start(
                self.registry.clone(),
                self.events.clone(),
                self.options.sweep_settings(),
            ));
            tracing::info!(name = %self.options.name, "persistent connection started");
        } else {
            tracing::warn!(name = %self.options.name, "persistent connection already started");
        }
        drop(sweeps);
        self.router()
    }

    /// The router alone, without starting sweeps.
    pub fn router(self: &Arc<Self>) -> Router {
        server::router(self.clone())
    }

    pub fn is_running(&self) -> bool {
        self.sweeps.lock().is_some()
    }

    /// Stop the sweeps and wait for them. Sessions stay in memory.
    pub async fn shutdown(&self) {
        let sweeps = self.sweeps.lock().take();
        if let Some(sweeps) = sweeps {
            sweeps.shutdown().await;
            tracing::info!(name = %self.options.name, "persistent connection stopped");
        }
    }

    // -----------------------------------------------------------------------
    // Sessions & events
    // -----------------------------------------------------------------------

    pub fn sessions_count(&self) -> usize {
        self.registry.count()
    }

    pub fn session(&self, client_id: &str) -> Option<SessionInfo> {
        self.registry.resolve(client_id)
    }

    /// Register a synchronous event handler.
    pub fn on(&self, handler: Arc<dyn ConnectionHandler>) {
        self.events.register(handler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ConnectionEvent>> {
        self.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Queue `payload` for one client. Unknown clients are silently ignored;
    /// the return value only says whether anything was queued.
    pub fn send(&self, client_id: &str, payload: impl Into<Value>) -> bool {
        match self.registry.append(client_id, payload.into(), Instant::now()) {
            Some(message_id) => {
                tracing::trace!(client_id = %client_id, message_id, "queued message");
                true
            }
            None => false,
        }
    }

    /// Queue `payload` for every live client, one message id each. Returns the
    /// number of sessions reached.
    pub fn broadcast(&self, payload: impl Into<Value>) -> usize {
        let payload = payload.into();
        let mut reached = 0;
        for client_id in self.registry.client_ids() {
            if self.send(&client_id, payload.clone()) {
                reached += 1;
            }
        }
        reached
    }

    // -----------------------------------------------------------------------
    // Sweeps
    // -----------------------------------------------------------------------

    /// One Message GC pass as of `now`.
    pub fn collect_garbage(&self, now: Instant) -> usize {
        sweep::collect_garbage(&self.registry, now, self.options.message_expiry)
    }

    /// One Disconnection Monitor pass as of `now`.
    pub fn disconnect_idle(&self, now: Instant) -> Vec<String> {
        sweep::disconnect_idle(&self.registry, &self.events, now, self.options.disconnect_timeout)
    }
}
