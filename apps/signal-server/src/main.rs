use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Weak};

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use signal_server::config::Config;
use signal_server::connection::events::ConnectionHandler;
use signal_server::connection::PersistentConnection;
use signal_server::AppState;

/// Logs session lifecycle with the live session count.
struct LifecycleLogger {
    connection: Weak<PersistentConnection>,
}

impl LifecycleLogger {
    fn sessions(&self) -> usize {
        self.connection
            .upgrade()
            .map_or(0, |connection| connection.sessions_count())
    }
}

impl ConnectionHandler for LifecycleLogger {
    fn on_connect(&self, client_id: &str) {
        tracing::info!(%client_id, total = self.sessions(), "new connection");
    }

    fn on_disconnect(&self, client_id: &str) {
        tracing::info!(%client_id, total = self.sessions(), "closed connection");
    }

    fn on_received(&self, client_id: &str, data: &str) {
        tracing::info!(%client_id, %data, "received");
    }
}

#[tokio::main]
async fn main() {
    // Load .env file; a missing file is fine when vars are set externally
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;
    let broadcast_interval = config.broadcast_interval;

    let connection = Arc::new(PersistentConnection::new(config.connection_options()));
    connection.on(Arc::new(LifecycleLogger {
        connection: Arc::downgrade(&connection),
    }));

    tracing::info!(name = %connection.name(), "signal-server configured");

    let state = AppState {
        config: Arc::new(config),
        connection: connection.clone(),
    };

    // Push the current time to every client, like a ticking clock.
    let ticker = connection.clone();
    let clock = tokio::spawn(async move {
        let mut interval = tokio::time::interval(broadcast_interval);
        loop {
            interval.tick().await;
            ticker.broadcast(chrono::Utc::now().to_rfc2822());
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(signal_server::routes::router(state, connection.init()))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "signal-server listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    clock.abort();
    connection.shutdown().await;
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
