use std::str::FromStr;
use std::time::Duration;

use crate::connection::ConnectionOptions;

/// Demo host configuration, loaded from environment variables.
///
/// Every variable is optional; defaults match the long-poll protocol's
/// standard timings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Connection name; endpoints are served under `/{name}`.
    pub connection_name: String,
    /// Buffered messages older than this are dropped.
    pub message_expiry: Duration,
    pub gc_interval: Duration,
    /// Sessions without a `connect`/`send` for this long are evicted.
    pub disconnect_timeout: Duration,
    pub disconnect_interval: Duration,
    pub poll_delay_step: Duration,
    pub max_poll_delay: Duration,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
    /// How often the demo broadcasts the current time.
    pub broadcast_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            port: var_or("PORT", 8080),
            connection_name: std::env::var("CONNECTION_NAME")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "time".to_string()),
            message_expiry: Duration::from_secs(var_or("MESSAGE_EXPIRY_SECS", 15)),
            gc_interval: Duration::from_secs(var_or("GC_INTERVAL_SECS", 15)),
            disconnect_timeout: Duration::from_secs(var_or("DISCONNECT_TIMEOUT_SECS", 60)),
            disconnect_interval: Duration::from_secs(var_or("DISCONNECT_INTERVAL_SECS", 60)),
            poll_delay_step: Duration::from_millis(var_or("POLL_DELAY_STEP_MS", 1000)),
            max_poll_delay: Duration::from_millis(var_or("MAX_POLL_DELAY_MS", 5000)),
            request_timeout: Duration::from_secs(var_or("REQUEST_TIMEOUT_SECS", 30)),
            max_body_bytes: var_or("MAX_BODY_BYTES", 64 * 1024),
            broadcast_interval: Duration::from_millis(var_or("BROADCAST_INTERVAL_MS", 1000)),
        }
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            name: self.connection_name.clone(),
            message_expiry: self.message_expiry,
            gc_interval: self.gc_interval,
            disconnect_timeout: self.disconnect_timeout,
            disconnect_interval: self.disconnect_interval,
            poll_delay_step: self.poll_delay_step,
            max_poll_delay: self.max_poll_delay,
            request_timeout: self.request_timeout,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

fn var_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
