//! End-to-end WebSocket tests against a server bound to an ephemeral port.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use futures_util::{SinkExt, StreamExt};
use pointhub_core::PointDefinition;
use pointhub_protocol::{decode, PointValue, ServerEvent, ValueType, PONG};
use pointhub_server::{build_router, AppState, Config};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(config: Config) -> (SocketAddr, Arc<AppState>) {
    let state = Arc::new(AppState::new(config).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn sim_config() -> Config {
    toml::from_str(
        r#"
        [[drivers]]
        name = "sim"
        "#,
    )
    .unwrap()
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("Failed to connect");
    client
}

async fn recv_text(client: &mut Client) -> String {
    let msg = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("Timed out waiting for a message")
        .expect("Stream ended")
        .expect("Failed to read message");
    match msg {
        Message::Text(text) => text,
        other => panic!("Expected text message, got {other:?}"),
    }
}

/// Send a command and wait until the server has processed it.
///
/// Commands are handled in order, so the `PONG` answering a trailing `PING`
/// proves everything before it took effect.
async fn command(client: &mut Client, text: &str) {
    client.send(Message::Text(text.to_string())).await.unwrap();
    client.send(Message::Text("PING".to_string())).await.unwrap();
    assert_eq!(recv_text(client).await, PONG);
}

async fn expect_update(client: &mut Client) -> (String, PointValue) {
    match decode(&recv_text(client).await).unwrap() {
        ServerEvent::PointUpdate { id, value, .. } => (id, value),
        other => panic!("Expected POINT_UPDATE, got {other:?}"),
    }
}

async fn wait_for_events(state: &AppState, count: u64) {
    for _ in 0..200 {
        if state.hub.fanout_stats().events() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("Fan-out did not process {count} events");
}

async fn no_message(client: &mut Client) {
    let next = tokio::time::timeout(Duration::from_millis(150), client.next()).await;
    assert!(next.is_err(), "Unexpected message: {next:?}");
}

#[tokio::test]
async fn test_query_control_and_push_scenario() {
    let (addr, state) = start_server(sim_config()).await;
    state.hub.register_point(
        PointDefinition::new("a.b", ValueType::Int)
            .writable()
            .owned_by("sim")
            .with_initial(1i64),
    );
    wait_for_events(&state, 1).await;

    let mut client = connect(addr).await;
    command(&mut client, "SUBSCRIBE a.").await;

    let app = build_router(Arc::clone(&state));
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/points?prefix=a.")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["points"][0]["id"], "a.b");
    assert_eq!(body["points"][0]["value"], 1);

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/control")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"pointId":"a.b","value":"2"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(
        expect_update(&mut client).await,
        ("a.b".to_string(), PointValue::Int(2))
    );
}

#[tokio::test]
async fn test_prefix_filtering_and_unsubscribe() {
    let (addr, state) = start_server(sim_config()).await;
    let mut client = connect(addr).await;
    command(&mut client, "SUBSCRIBE test.").await;

    let report = |id: &str, value: i64| {
        state
            .hub
            .report("sim", vec![pointhub_protocol::api::ValueReport::new(id, value)])
            .unwrap();
    };

    report("other.point1", 1);
    report("test.point1", 1);
    assert_eq!(
        expect_update(&mut client).await,
        ("test.point1".to_string(), PointValue::Int(1))
    );
    no_message(&mut client).await;

    command(&mut client, "UNSUBSCRIBE test.").await;
    report("test.point1", 2);
    no_message(&mut client).await;
}

#[tokio::test]
async fn test_duplicate_subscribe_then_single_unsubscribe() {
    let (addr, state) = start_server(sim_config()).await;
    let mut client = connect(addr).await;

    command(&mut client, "SUBSCRIBE a.").await;
    command(&mut client, "SUBSCRIBE a.").await;
    command(&mut client, "UNSUBSCRIBE a.").await;

    state
        .hub
        .report("sim", vec![pointhub_protocol::api::ValueReport::new("a.x", 1i64)])
        .unwrap();
    no_message(&mut client).await;
}

#[tokio::test]
async fn test_close_removes_subscriptions() {
    let (addr, state) = start_server(sim_config()).await;
    let mut client = connect(addr).await;
    command(&mut client, "SUBSCRIBE a.").await;
    command(&mut client, "SUBSCRIBE b.").await;
    assert_eq!(state.hub.registry().stats().total_subscriptions, 2);

    client.close(None).await.unwrap();
    drop(client);

    for _ in 0..200 {
        if state.hub.registry().stats().connection_count == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let stats = state.hub.registry().stats();
    assert_eq!(stats.connection_count, 0);
    assert_eq!(stats.distinct_prefixes, 0);
    assert!(state.hub.registry().subscribers_for("a.x").is_empty());
}

#[tokio::test]
async fn test_unknown_command_gets_error_event() {
    let (addr, _state) = start_server(Config::default()).await;
    let mut client = connect(addr).await;

    client
        .send(Message::Text("PUBLISH a.b 1".to_string()))
        .await
        .unwrap();
    assert!(matches!(
        decode(&recv_text(&mut client).await).unwrap(),
        ServerEvent::Error { .. }
    ));

    // The connection stays usable.
    command(&mut client, "SUBSCRIBE a.").await;
}
