//! Protocol operations: negotiate, connect (poll), and send.

use tokio::time::Instant;

use super::events::ConnectionEvent;
use super::protocol::{
    ConnectRequest, ConnectResponse, NegotiateResponse, SendRequest, SendResponse, TransportData,
    PROTOCOL_VERSION,
};
use super::session::Delivery;
use super::PersistentConnection;

/// Hand out a fresh client id. Stateless: no session is created until the
/// client connects.
pub fn handle_negotiate(conn: &PersistentConnection) -> NegotiateResponse {
    NegotiateResponse {
        url: conn.options().base_path(),
        client_id: conn.ids().new_id(),
        try_web_sockets: false,
        web_socket_server_url: None,
        protocol_version: PROTOCOL_VERSION.to_string(),
    }
}

/// Process one poll: resolve or create the session, collect everything from
/// the cursor on, and update the recommended poll delay.
pub fn handle_connect(conn: &PersistentConnection, request: ConnectRequest) -> ConnectResponse {
    let now = Instant::now();
    let registry = conn.registry();

    let touched = registry.create_or_touch(
        request.client_id.as_deref(),
        request.metadata(),
        conn.ids(),
        now,
    );
    if touched.created {
        tracing::info!(
            client_id = %touched.client_id,
            sessions = registry.count(),
            "session connected"
        );
        conn.events().emit(ConnectionEvent::Connected {
            client_id: touched.client_id.clone(),
        });
    }

    let cursor = request
        .cursor()
        .unwrap_or_else(|| registry.current_message_id());
    let backoff = conn.options().backoff();

    // The session was touched a moment ago, so only a concurrent shutdown of
    // the registry could make it vanish; answer as an empty poll then.
    let delivery = registry
        .deliver(&touched.client_id, cursor, &backoff)
        .unwrap_or_else(|| Delivery {
            last_delivered_id: cursor,
            messages: Vec::new(),
            poll_delay: backoff.step,
            groups: request.groups.clone(),
        });

    tracing::debug!(
        client_id = %touched.client_id,
        cursor,
        delivered = delivery.messages.len(),
        last_message_id = delivery.last_delivered_id,
        poll_delay = ?delivery.poll_delay,
        "poll answered"
    );

    conn.events().emit(ConnectionEvent::Sending {
        client_id: touched.client_id,
        messages: delivery.messages.clone(),
    });

    ConnectResponse {
        message_id: delivery.last_delivered_id,
        transport_data: TransportData {
            long_poll_delay: u64::try_from(delivery.poll_delay.as_millis()).unwrap_or(u64::MAX),
            groups: delivery.groups,
        },
        messages: delivery.messages,
    }
}

/// Accept data pushed by a client. Never enqueues anything; unknown clients
/// still get their `received` event but no session is touched.
pub fn handle_send(conn: &PersistentConnection, request: SendRequest) -> SendResponse {
    if let Some((client_id, data)) = request.parts() {
        conn.events().emit(ConnectionEvent::Received {
            client_id: client_id.to_string(),
            data: data.to_string(),
        });

        if !conn.registry().touch(client_id, Instant::now()) {
            tracing::debug!(client_id = %client_id, "send from unknown client");
        }
    }
    SendResponse {}
}
