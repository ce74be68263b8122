//! Connection handlers for the pointhub server.
//!
//! This module wires the HTTP routes and runs the per-connection WebSocket
//! loop: commands from the client go to the subscription registry, and
//! updates queued by the fan-out are written back out.

use crate::api;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use pointhub_core::{
    ConnectionId, ConnectionState, Delivery, Hub, LoopbackDriver, RegistryError,
};
use pointhub_protocol::{codec, ClientCommand, ServerEvent, PONG};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Store, subscriptions and control.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Build the hub and register the configured drivers and points.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if two drivers share a name.
    pub fn new(config: Config) -> Result<Self> {
        let hub = Hub::start(config.hub_config());

        for driver in &config.drivers {
            let loopback = LoopbackDriver::new(driver.name.clone())
                .with_write_delay(Duration::from_millis(driver.write_delay_ms));
            loopback.set_reject(driver.reject_writes);
            hub.register_driver(Arc::new(loopback))
                .with_context(|| format!("Failed to register driver {}", driver.name))?;
        }

        for point in &config.points {
            if !hub.register_point(point.clone()) {
                warn!(point = %point.id, "Duplicate point definition ignored");
            }
        }
        info!(
            drivers = config.drivers.len(),
            points = hub.store().len(),
            "Hub initialized"
        );
        metrics::set_points(hub.store().len());

        Ok(Self { hub, config })
    }
}

/// Build the HTTP and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(api::health))
        .route("/api/v1/points", get(api::list_points))
        .route("/api/v1/points/batch", post(api::batch_points))
        .route("/api/v1/control", post(api::control))
        .route("/api/v1/drivers/:driver/reports", post(api::driver_reports))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config)?);
    let ws_path = state.config.transport.websocket_path.clone();
    let app = build_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("pointhub server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, ws_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("pointhub server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection_id = ConnectionId::generate();
    let mut conn_state = ConnectionState::Connecting;
    let registry = state.hub.registry();

    let (mut sender, mut receiver) = socket.split();

    let mut outbound = match registry.open(connection_id.clone()) {
        Ok(rx) => rx,
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "Connection refused");
            metrics::record_error("connection_refused");
            let _ = send_event(&mut sender, &ServerEvent::error(e.to_string())).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    conn_state = transition(&connection_id, conn_state, ConnectionState::Open);

    loop {
        tokio::select! {
            biased;

            // Updates queued by the fan-out
            delivery = outbound.recv() => {
                match delivery {
                    Some(Delivery::Message(text)) => {
                        metrics::record_message(text.len(), "outbound");
                        if sender.send(Message::Text(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Delivery::Lagged(dropped)) => {
                        warn!(connection = %connection_id, dropped, "Client lagging, oldest updates dropped");
                        metrics::record_dropped(dropped);
                    }
                    None => break,
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_message(text.len(), "inbound");
                        if let Some(reply) = handle_command(&text, &connection_id, &state) {
                            metrics::record_message(reply.len(), "outbound");
                            if sender.send(Message::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let event = ServerEvent::error("Binary frames are not supported");
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
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
        }
    }

    let removed = registry.on_connection_closed(&connection_id);
    transition(&connection_id, conn_state, ConnectionState::Closed);
    debug!(connection = %connection_id, subscriptions = removed, "WebSocket disconnected");
}

fn transition(
    connection_id: &ConnectionId,
    from: ConnectionState,
    to: ConnectionState,
) -> ConnectionState {
    debug!(connection = %connection_id, %from, %to, "Connection state");
    to
}

/// Handle one text command. Returns the text to send back, if any.
fn handle_command(text: &str, connection_id: &ConnectionId, state: &AppState) -> Option<String> {
    let command = match codec::decode_command(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(connection = %connection_id, error = %e, "Bad command");
            return encode_reply(&ServerEvent::error(e.to_string()));
        }
    };
    let registry = state.hub.registry();

    match command {
        ClientCommand::Subscribe { prefix } => match registry.subscribe(connection_id, &prefix) {
            Ok(added) => {
                if added {
                    metrics::record_subscription();
                }
                None
            }
            Err(e @ RegistryError::ConnectionClosed(_)) => {
                error!(connection = %connection_id, error = %e, "Subscribe on closed connection");
                None
            }
            Err(e) => {
                warn!(connection = %connection_id, prefix = %prefix, error = %e, "Subscribe failed");
                encode_reply(&ServerEvent::error(e.to_string()))
            }
        },
        ClientCommand::Unsubscribe { prefix } => {
            registry.unsubscribe(connection_id, &prefix);
            None
        }
        ClientCommand::Ping => Some(PONG.to_string()),
    }
}

fn encode_reply(event: &ServerEvent) -> Option<String> {
    match codec::encode(event) {
        Ok(text) => Some(text),
        Err(e) => {
            error!(error = %e, "Failed to encode reply");
            None
        }
    }
}

/// Send an event to the WebSocket.
async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &ServerEvent) -> Result<()> {
    let text = codec::encode(event)?;
    metrics::record_message(text.len(), "outbound");
    sender.send(Message::Text(text)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointhub_protocol::decode;

    #[tokio::test]
    async fn test_handle_command_flow() {
        let state = AppState::new(Config::default()).unwrap();
        let conn = ConnectionId::new("c1");
        let _rx = state.hub.registry().open(conn.clone()).unwrap();

        assert_eq!(handle_command("SUBSCRIBE a.", &conn, &state), None);
        assert!(state.hub.registry().is_subscribed(&conn, "a."));

        assert_eq!(handle_command("PING", &conn, &state), Some(PONG.to_string()));

        assert_eq!(handle_command("UNSUBSCRIBE a.", &conn, &state), None);
        assert!(!state.hub.registry().is_subscribed(&conn, "a."));

        let reply = handle_command("PUBLISH a.", &conn, &state).unwrap();
        assert!(matches!(decode(&reply).unwrap(), ServerEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_app_state_registers_config() {
        let config: Config = toml::from_str(
            r#"
            [[drivers]]
            name = "sim"

            [[points]]
            id = "a.b"
            type = "int"
            writable = true
            driver = "sim"
            initial = 1
            "#,
        )
        .unwrap();

        let state = AppState::new(config).unwrap();
        assert!(state.hub.drivers().contains("sim"));
        assert!(state.hub.store().get("a.b").unwrap().writable);
    }

    #[tokio::test]
    async fn test_duplicate_driver_names_rejected() {
        let config: Config = toml::from_str(
            r#"
            [[drivers]]
            name = "sim"

            [[drivers]]
            name = "sim"
            "#,
        )
        .unwrap();

        assert!(AppState::new(config).is_err());
    }
}
