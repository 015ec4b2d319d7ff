//! Wire-format request and response shapes for the long-poll endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::session::SessionMetadata;

pub const PROTOCOL_VERSION: &str = "1.0";

/// Raw URL-encoded pairs in arrival order. Keys may repeat.
pub type FormFields = Vec<(String, String)>;

/// Request types built field by field from [`FormFields`].
///
/// Each field is picked on its own, so one unusable field never discards the
/// others. Repeated scalar keys keep their first value.
pub trait FromFields: Default {
    fn from_fields(fields: FormFields) -> Self;
}

fn first(slot: &mut Option<String>, value: String) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

// ---------------------------------------------------------------------------
// negotiate
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct NegotiateResponse {
    /// Base URL of the connection, e.g. `/time`.
    pub url: String,
    /// Freshly generated id for the client to use on `connect`.
    pub client_id: String,
    pub try_web_sockets: bool,
    pub web_socket_server_url: Option<String>,
    pub protocol_version: String,
}

// ---------------------------------------------------------------------------
// connect
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    #[serde(default)]
    pub client_id: Option<String>,
    /// Last message id the client has seen, or the literal `"null"`.
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub connection_data: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl FromFields for ConnectRequest {
    fn from_fields(fields: FormFields) -> Self {
        let mut request = Self::default();
        for (key, value) in fields {
            match key.as_str() {
                "clientId" => first(&mut request.client_id, value),
                "messageId" => first(&mut request.message_id, value),
                "transport" => first(&mut request.transport, value),
                "connectionData" => first(&mut request.connection_data, value),
                "groups" => request.groups.push(value),
                _ => {}
            }
        }
        request
    }
}

impl ConnectRequest {
    /// The cursor the client asked for. `None` means "start from now".
    pub fn cursor(&self) -> Option<u64> {
        self.message_id
            .as_deref()
            .map(str::trim)
            .filter(|id| *id != "null")
            .and_then(|id| id.parse().ok())
    }

    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            transport: self.transport.clone(),
            connection_data: self.connection_data.clone(),
            groups: self.groups.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct TransportData {
    /// Recommended delay before the next poll, in milliseconds.
    pub long_poll_delay: u64,
    pub groups: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectResponse {
    pub message_id: u64,
    pub transport_data: TransportData,
    #[schema(value_type = Vec<Object>)]
    pub messages: Vec<Value>,
}

// ---------------------------------------------------------------------------
// send
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

impl FromFields for SendRequest {
    fn from_fields(fields: FormFields) -> Self {
        let mut request = Self::default();
        for (key, value) in fields {
            match key.as_str() {
                "clientId" => first(&mut request.client_id, value),
                "data" => first(&mut request.data, value),
                _ => {}
            }
        }
        request
    }
}

impl SendRequest {
    /// Both fields, if both are present and non-empty.
    pub fn parts(&self) -> Option<(&str, &str)> {
        let client_id = self.client_id.as_deref().filter(|s| !s.is_empty())?;
        let data = self.data.as_deref().filter(|s| !s.is_empty())?;
        Some((client_id, data))
    }
}

/// Always-empty acknowledgement for `send`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SendResponse {}
