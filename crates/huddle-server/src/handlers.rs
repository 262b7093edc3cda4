//! Connection handlers for Huddle server.
//!
//! This module owns the server lifecycle and the per-connection WebSocket
//! loop. Each connection runs a reader (this task) and a writer task that
//! drains the connection's outbound queue onto the socket.

use crate::api::{self, ApiError};
use crate::auth::JwtVerifier;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use huddle_core::clock::now_millis;
use huddle_core::{
    outbound_channel, Collaborators, DispatchError, Dispatcher, MemoryStore, Outbound,
    OutboundReceiver, SessionState,
};
use huddle_protocol::{
    ClientEvent, ConnectionId, Encoded, EventCodec, ProtocolError, RoomSummary, WireFormat,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub config: Config,
}

impl AppState {
    /// Create app state over a store, verifying tokens with the configured secret.
    #[must_use]
    pub fn new(config: Config, store: Arc<MemoryStore>) -> Self {
        let verifier = Arc::new(JwtVerifier::new(&config.auth));
        Self {
            dispatcher: Dispatcher::new(Collaborators::from_store(verifier, store)),
            config,
        }
    }
}

/// Build the in-memory store with the configured rooms.
#[must_use]
pub fn seed_store(config: &Config) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let created_at = now_millis();
    for room in &config.rooms {
        store.insert_room(RoomSummary {
            id: room.id.clone(),
            name: room.name.clone(),
            kind: room.kind,
            created_at,
        });
        for member in &room.members {
            store.seed_member(member, &room.id);
        }
        debug!(room = %room.id, members = room.members.len(), "Seeded room");
    }
    store
}

/// Build the HTTP/WebSocket router.
pub fn build_app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .merge(api::routes())
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let store = seed_store(&config);
    let state = Arc::new(AppState::new(config.clone(), store));
    let app = build_app(Arc::clone(&state));

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Huddle server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    info!("Huddle server stopped");
    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    state.dispatcher.shutdown();
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Query parameters of the WebSocket upgrade.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
    #[serde(default)]
    pub format: WireFormat,
}

/// WebSocket upgrade handler.
///
/// The credential is verified before upgrading; a rejected credential gets a
/// plain 401 and no connection state is created.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let open = state.dispatcher.registry().stats().connection_count;
    if open >= state.config.limits.max_connections {
        warn!(open, "Connection limit reached");
        metrics::record_error("capacity");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }

    let session = match state.dispatcher.authenticate(params.token.as_deref()).await {
        Ok(session) => session,
        Err(e) => {
            debug!(error = %e, "WebSocket upgrade refused");
            metrics::record_error(e.kind());
            return ApiError::Unauthorized(e.to_string()).into_response();
        }
    };

    let codec = EventCodec::new(params.format, state.config.limits.max_event_size);
    ws.on_upgrade(move |socket| handle_websocket(socket, state, session, codec))
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    session: SessionState,
    codec: EventCodec,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let (mut sink, mut stream) = socket.split();
    let (tx, rx) = outbound_channel();

    let mut session = match state.dispatcher.attach(session, tx).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Failed to attach connection");
            metrics::record_error(e.kind());
            let close = CloseFrame {
                code: 1011,
                reason: "Internal error".into(),
            };
            let _ = sink.send(Message::Close(Some(close))).await;
            return;
        }
    };
    metrics::set_online_users(state.dispatcher.registry().online_count());

    let connection_id = session.connection_id().cloned().unwrap_or_default();
    debug!(connection = %connection_id, format = ?codec.format(), "WebSocket connected");

    let mut writer = tokio::spawn(write_loop(sink, rx, codec, connection_id.clone()));

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let decoded = codec.decode_text(&text);
                        handle_inbound(&state, &session, decoded, text.len()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let decoded = codec.decode_binary(&data);
                        handle_inbound(&state, &session, decoded, data.len()).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // axum answers pings itself
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            // The writer stops on a close instruction or a dead socket.
            _ = &mut writer => {
                debug!(connection = %connection_id, "Writer finished");
                break;
            }
        }
    }

    state.dispatcher.disconnect(&mut session).await;
    writer.abort();
    metrics::set_online_users(state.dispatcher.registry().online_count());

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Drain the outbound queue onto the socket.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: OutboundReceiver,
    codec: EventCodec,
    connection_id: ConnectionId,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Event(event) => {
                let encoded = match codec.encode(event.as_ref()) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        error!(connection = %connection_id, event = event.name(), error = %e, "Encode failed");
                        metrics::record_error("encode");
                        continue;
                    }
                };
                metrics::record_event(event.name(), encoded.len(), "outbound");

                let message = match encoded {
                    Encoded::Text(text) => Message::Text(text),
                    Encoded::Binary(data) => Message::Binary(data.to_vec()),
                };
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            Outbound::Close(reason) => {
                debug!(connection = %connection_id, reason = reason.as_str(), "Closing connection");
                let close = CloseFrame {
                    code: reason.code(),
                    reason: reason.as_str().into(),
                };
                let _ = sink.send(Message::Close(Some(close))).await;
                break;
            }
        }
    }
}

/// Dispatch one decoded inbound frame.
async fn handle_inbound(
    state: &AppState,
    session: &SessionState,
    decoded: Result<ClientEvent, ProtocolError>,
    size: usize,
) {
    let event = match decoded {
        Ok(event) => event,
        Err(e) => {
            let err = DispatchError::from(e);
            warn!(connection = ?session.connection_id(), error = %err, "Undecodable event");
            metrics::record_error(err.kind());
            state.dispatcher.report(session, &err);
            return;
        }
    };

    let name = event.name();
    metrics::record_event(name, size, "inbound");
    let sent_to = match &event {
        ClientEvent::SendMessage { chatroom_id, .. } => Some(chatroom_id.clone()),
        _ => None,
    };

    let start = Instant::now();
    match state.dispatcher.dispatch(session, event).await {
        Ok(()) => {
            if let Some(room) = sent_to {
                metrics::record_message(state.dispatcher.registry().room_connections(&room).len());
            }
        }
        Err(e) => metrics::record_error(e.kind()),
    }
    metrics::record_dispatch(name, start.elapsed().as_secs_f64());
}
