//! Connection handlers for the Huddle server.
//!
//! Authenticates the WebSocket upgrade, then runs one loop per connection
//! that forwards engine events to the socket and decoded client events to the
//! engine.

use crate::auth::{bearer_token, StaticTokenVerifier};
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use huddle_core::{
    ChatEngine, ConnectionHandle, Identity, IdentityVerifier, InMemoryStore, Session, Store,
};
use huddle_protocol::{codec, ClientEvent, Encoding, ServerEvent, Version, PROTOCOL_VERSION};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    pub engine: ChatEngine,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub config: Config,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn Store>, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self {
            engine: ChatEngine::new(store, config.engine()),
            verifier,
            config,
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let verifier = Arc::new(StaticTokenVerifier::new(&config.auth.tokens));
    if verifier.len() == 0 {
        warn!("No auth tokens configured, every connection will be rejected");
    }
    let state = Arc::new(AppState::new(config.clone(), store, verifier));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!(error = %e, "Failed to start metrics server");
        }
    }

    let sweeper = Arc::clone(state.engine.sweeper())
        .spawn(|report| metrics::record_purged(report.purged));

    let app = app(state);
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Huddle server listening");
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    let served = axum::serve(listener, app).await;
    sweeper.abort();
    served?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION.to_string(),
        "online": state.engine.online_count(),
    }))
}

/// Upgrade query parameters.
#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    token: Option<String>,
    /// Protocol version spoken by the client.
    v: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    if let Some(v) = params.v.as_deref() {
        if let Err(e) = Version::negotiate(v) {
            debug!(error = %e, "Rejected protocol version");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    }

    let Some(token) = params.token.or_else(|| bearer_token(&headers)) else {
        return (StatusCode::UNAUTHORIZED, "Authentication token required").into_response();
    };
    let identity = match state.verifier.verify(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "Rejected connection");
            metrics::record_error("auth");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    // A reconnecting user replaces their own entry and does not add to the count.
    let registry = state.engine.registry();
    if registry.len() >= state.config.limits.max_connections && !registry.is_online(&identity.id) {
        warn!(user = %identity.id, "Connection limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, identity))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, identity: Identity) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (handle, mut events) = ConnectionHandle::channel();
    let session = state.engine.connect(identity, handle).await;
    let connection_id = session.handle.id().clone();
    debug!(connection = %connection_id, user = %session.user_id(), "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Replies follow the encoding of the client's latest frame.
    let mut encoding = Encoding::Text;
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            _ = session.handle.closed() => {
                debug!(connection = %connection_id, "Replaced by a newer connection");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            event = events.recv() => {
                let Some(event) = event else { break };
                if send_event(&mut sender, &event, encoding).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        encoding = Encoding::Text;
                        metrics::record_event(text.len(), "inbound");
                        match codec::decode_text::<ClientEvent>(&text) {
                            Ok(event) => process(&state, &session, event).await,
                            Err(e) => reject_frame(&session, &e),
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        encoding = Encoding::Packed;
                        metrics::record_event(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_packed_from::<ClientEvent>(&mut read_buffer) {
                                Ok(Some(event)) => process(&state, &session, event).await,
                                Ok(None) => break,
                                Err(e) => {
                                    reject_frame(&session, &e);
                                    read_buffer.clear();
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
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
        }
    }

    state.engine.disconnect(&session).await;
    metrics::set_rooms_subscribed(state.engine.hub().stats().channel_count);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Dispatch one decoded event to the engine.
async fn process(state: &AppState, session: &Session, event: ClientEvent) {
    let start = Instant::now();
    if let Err(e) = state.engine.dispatch(session, event).await {
        metrics::record_error(e.kind());
    }
    metrics::record_latency(start.elapsed().as_secs_f64());
    metrics::set_rooms_subscribed(state.engine.hub().stats().channel_count);
}

fn reject_frame(session: &Session, error: &huddle_protocol::ProtocolError) {
    warn!(connection = %session.handle.id(), error = %error, "Undecodable frame");
    metrics::record_error("decode");
    session.reply(ServerEvent::error("Invalid event"));
}

/// Encode and send one event.
///
/// Encoding failures are logged and skipped; only socket failures are returned.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
    encoding: Encoding,
) -> Result<(), axum::Error> {
    let encoded = match encoding {
        Encoding::Text => codec::encode_text(event).map(Message::Text),
        Encoding::Packed => codec::encode_packed(event).map(|b| Message::Binary(b.to_vec())),
    };
    let message = match encoded {
        Ok(message) => message,
        Err(e) => {
            error!(event = event.name(), error = %e, "Failed to encode event");
            metrics::record_error("encode");
            return Ok(());
        }
    };

    let bytes = match &message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };
    metrics::record_event(bytes, "outbound");
    sender.send(message).await
}
