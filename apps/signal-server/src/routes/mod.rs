pub mod health;

use axum::Router;
use utoipa::OpenApi;

use crate::connection::{protocol, server};
use crate::AppState;

/// Host routes plus the connection's own router (from
/// `PersistentConnection::init` or `::router`).
pub fn router(state: AppState, connection: Router) -> Router {
    Router::new()
        .merge(health::router())
        .with_state(state)
        .merge(connection)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        server::negotiate,
        server::connect,
        server::send,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            health::HealthResponse,
            protocol::NegotiateResponse,
            protocol::ConnectRequest,
            protocol::ConnectResponse,
            protocol::TransportData,
            protocol::SendRequest,
            protocol::SendResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Connection", description = "Long-poll persistent connection"),
    )
)]
pub struct ApiDoc;
