use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use parking_lot::Mutex;
use serde_json::Value;

use signal_common::IdGenerator;
use signal_server::config::Config;
use signal_server::connection::events::ConnectionHandler;
use signal_server::connection::PersistentConnection;
use signal_server::AppState;

/// Connection name every test app is served under.
pub const NAME: &str = "time";

/// Deterministic client ids: `cli_0`, `cli_1`, ...
#[derive(Default)]
pub struct SequentialIds(AtomicUsize);

impl IdGenerator for SequentialIds {
    fn new_id(&self) -> String {
        format!("cli_{}", self.0.fetch_add(1, Ordering::SeqCst))
    }
}

/// Records every event as a short string, in emission order.
#[derive(Default)]
pub struct EventLog(Mutex<Vec<String>>);

impl EventLog {
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

impl ConnectionHandler for EventLog {
    fn on_connect(&self, client_id: &str) {
        self.0.lock().push(format!("connect:{client_id}"));
    }

    fn on_disconnect(&self, client_id: &str) {
        self.0.lock().push(format!("disconnect:{client_id}"));
    }

    fn on_received(&self, client_id: &str, data: &str) {
        self.0.lock().push(format!("received:{client_id}:{data}"));
    }

    fn on_sending(&self, client_id: &str, messages: &[Value]) {
        self.0.lock().push(format!("sending:{client_id}:{}", messages.len()));
    }
}

/// Configuration with the standard protocol timings.
pub fn test_config() -> Config {
    Config {
        port: 0,
        connection_name: NAME.to_string(),
        message_expiry: Duration::from_secs(15),
        gc_interval: Duration::from_secs(15),
        disconnect_timeout: Duration::from_secs(60),
        disconnect_interval: Duration::from_secs(60),
        poll_delay_step: Duration::from_millis(1000),
        max_poll_delay: Duration::from_millis(5000),
        request_timeout: Duration::from_secs(5),
        max_body_bytes: 64 * 1024,
        broadcast_interval: Duration::from_millis(1000),
    }
}

/// Build the full application router with sequential ids and an event log.
///
/// Sweeps are not started; tests drive them explicitly with a chosen `now`.
pub fn test_app() -> (Router, AppState, Arc<EventLog>) {
    let config = test_config();
    let connection = Arc::new(PersistentConnection::with_id_generator(
        config.connection_options(),
        Arc::new(SequentialIds::default()),
    ));
    let log = Arc::new(EventLog::default());
    connection.on(log.clone());

    let state = AppState {
        config: Arc::new(config),
        connection: connection.clone(),
    };
    let app = signal_server::routes::router(state.clone(), connection.router());
    (app, state, log)
}

/// POST a `connect` and return the parsed body.
pub async fn connect(server: &axum_test::TestServer, fields: &[(&str, &str)]) -> Value {
    let resp = server.post(&format!("/{NAME}/connect")).form(fields).await;
    resp.assert_status_ok();
    resp.json::<Value>()
}
