pub mod config;
pub mod connection;
pub mod error;
pub mod routes;

use std::sync::Arc;

use config::Config;
use connection::PersistentConnection;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub connection: Arc<PersistentConnection>,
}
