//! HTTP binding for a persistent connection: routes, body extraction, and
//! the catch-all for unknown paths under the connection prefix.

use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::{DefaultBodyLimit, FromRequest, Request, State};
use axum::routing::any;
use axum::{Form, Json, Router};
use tokio::time;

use crate::error::{ApiError, ApiErrorBody};

use super::handler::{handle_connect, handle_negotiate, handle_send};
use super::protocol::{
    ConnectRequest, ConnectResponse, FormFields, FromFields, NegotiateResponse, SendRequest,
    SendResponse,
};
use super::PersistentConnection;

/// Routes for `/{name}`, `/{name}/connect`, `/{name}/negotiate`,
/// `/{name}/send`, plus a 404 for anything else under the prefix.
pub fn router(conn: Arc<PersistentConnection>) -> Router {
    let base = conn.options().base_path();
    let max_body_bytes = conn.options().max_body_bytes;

    Router::new()
        .route(&base, any(connect))
        .route(&format!("{base}/connect"), any(connect))
        .route(&format!("{base}/negotiate"), any(negotiate))
        .route(&format!("{base}/send"), any(send))
        .route(&format!("{base}/{{*rest}}"), any(unroutable))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(conn)
}

/// Read URL-encoded fields from the body (or the query string on GET/HEAD).
///
/// The whole body must arrive within the configured request timeout and fit
/// the size limit; otherwise the request fails. Fields are read as raw pairs
/// and picked one by one, so a missing or unusable field only defaults itself.
/// A body that isn't URL-encoded at all yields all defaults.
async fn read_form<T: FromFields>(
    conn: &PersistentConnection,
    request: Request,
) -> Result<T, ApiError> {
    let limit = conn.options().request_timeout;
    match time::timeout(limit, Form::<FormFields>::from_request(request, &())).await {
        Err(_elapsed) => {
            tracing::warn!(timeout = ?limit, "request body not received in time");
            Err(ApiError::request_timeout("Request body not received in time"))
        }
        Ok(Ok(Form(fields))) => Ok(T::from_fields(fields)),
        Ok(Err(FormRejection::BytesRejection(rejection))) => Err(rejection.into()),
        Ok(Err(rejection)) => {
            tracing::debug!(%rejection, "unreadable form fields, using defaults");
            Ok(T::default())
        }
    }
}

// ---------------------------------------------------------------------------
// /{name}/negotiate
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/{name}/negotiate",
    tag = "Connection",
    params(("name" = String, Path, description = "Connection name")),
    responses(
        (status = 200, description = "Fresh client id and protocol info", body = NegotiateResponse),
    ),
)]
pub async fn negotiate(State(conn): State<Arc<PersistentConnection>>) -> Json<NegotiateResponse> {
    Json(handle_negotiate(&conn))
}

// ---------------------------------------------------------------------------
// /{name} and /{name}/connect
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/{name}/connect",
    tag = "Connection",
    params(("name" = String, Path, description = "Connection name")),
    request_body(content = ConnectRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Messages from the cursor on", body = ConnectResponse),
        (status = 408, description = "Body not received in time", body = ApiErrorBody),
        (status = 413, description = "Body too large", body = ApiErrorBody),
    ),
)]
pub async fn connect(
    State(conn): State<Arc<PersistentConnection>>,
    request: Request,
) -> Result<Json<ConnectResponse>, ApiError> {
    let fields: ConnectRequest = read_form(&conn, request).await?;
    Ok(Json(handle_connect(&conn, fields)))
}

// ---------------------------------------------------------------------------
// /{name}/send
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/{name}/send",
    tag = "Connection",
    params(("name" = String, Path, description = "Connection name")),
    request_body(content = SendRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Always empty", body = SendResponse),
        (status = 408, description = "Body not received in time", body = ApiErrorBody),
        (status = 413, description = "Body too large", body = ApiErrorBody),
    ),
)]
pub async fn send(
    State(conn): State<Arc<PersistentConnection>>,
    request: Request,
) -> Result<Json<SendResponse>, ApiError> {
    let fields: SendRequest = read_form(&conn, request).await?;
    Ok(Json(handle_send(&conn, fields)))
}

// ---------------------------------------------------------------------------
// Anything else under the prefix
// ---------------------------------------------------------------------------

async fn unroutable(State(conn): State<Arc<PersistentConnection>>, request: Request) -> ApiError {
    tracing::debug!(name = %conn.name(), path = %request.uri().path(), "unroutable request");
    ApiError::not_found("Unknown endpoint")
}
