//! End-to-end over a real WebSocket server on loopback.

use std::sync::Arc;
use std::time::Duration;

use basset_engine::{ConnectionState, Engine, EngineConfig, WsConnector};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;

const DEADLINE: Duration = Duration::from_secs(10);

type ServerStream = WebSocketStream<tokio::net::TcpStream>;

async fn next_json(ws: &mut ServerStream) -> Option<Value> {
    while let Some(msg) = ws.next().await {
        match msg.ok()? {
            Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

async fn next_response(ws: &mut ServerStream) -> Option<Value> {
    loop {
        let value = next_json(ws).await?;
        if value.get("command_id").is_some() {
            return Some(value);
        }
    }
}

fn config_for(url: String) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.endpoint_url = url;
    config.connect_timeout = Duration::from_secs(5);
    config.heartbeat_interval = Duration::from_millis(100);
    config
}

fn engine(config: EngineConfig) -> Engine {
    let connector = Arc::new(WsConnector::new(config.connect_timeout));
    let mut engine = Engine::new(config, connector);
    engine.register_builtins();
    engine
}

#[tokio::test]
async fn command_round_trip_then_server_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/browser", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let announce = next_json(&mut ws).await.unwrap();
        let ping = json!({"command_id": "cmd-1", "type": "ping", "params": {"echo": 7}});
        ws.send(Message::Text(ping.to_string().into())).await.unwrap();
        let response = next_response(&mut ws).await.unwrap();
        let heartbeat = loop {
            let frame = next_json(&mut ws).await.unwrap();
            if frame["type"] == "heartbeat" {
                break frame;
            }
        };

        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "done".into(),
        }))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
        (announce, response, heartbeat)
    });

    let handle = engine(config_for(url)).spawn(CancellationToken::new());
    let (announce, response, heartbeat) = tokio::time::timeout(DEADLINE, server)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(announce["type"], "connected");
    assert_eq!(response["command_id"], "cmd-1");
    assert_eq!(response["success"], true);
    assert_eq!(response["result"]["echo"], 7);
    assert!(heartbeat["timestamp"].as_i64().unwrap() > 0);

    let snapshot = tokio::time::timeout(DEADLINE, handle.wait_for_state(ConnectionState::Closed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.connection.last_close_code, Some(1000));
    assert!(!snapshot.reconnect_pending);
    assert!(handle.shutdown().await);
}

#[tokio::test]
async fn agent_close_reaches_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/browser", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(msg) = ws.next().await {
            if let Ok(Message::Close(frame)) = msg {
                return frame.map(|f| (u16::from(f.code), f.reason.as_str().to_owned()));
            }
        }
        None
    });

    let handle = engine(config_for(url)).spawn(CancellationToken::new());
    let _ = tokio::time::timeout(DEADLINE, handle.wait_for_state(ConnectionState::Open))
        .await
        .unwrap()
        .unwrap();
    assert!(handle.close(1000, "bye").await);

    let close = tokio::time::timeout(DEADLINE, server).await.unwrap().unwrap();
    assert_eq!(close, Some((1000, "bye".to_owned())));

    let snapshot = tokio::time::timeout(DEADLINE, handle.wait_for_state(ConnectionState::Closed))
        .await
        .unwrap()
        .unwrap();
    assert!(!snapshot.reconnect_pending);
    assert!(handle.shutdown().await);
}

#[tokio::test]
async fn unreachable_controller_schedules_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/browser", listener.local_addr().unwrap());
    drop(listener);

    let mut config = config_for(url);
    config.reconnect.initial_delay_ms = 60_000;
    let handle = engine(config).spawn(CancellationToken::new());

    let snapshot = tokio::time::timeout(DEADLINE, handle.wait_for(|s| s.reconnect_pending))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.state(), ConnectionState::Closed);
    assert_eq!(snapshot.connection.reconnect_attempt, 1);
    assert!(snapshot.connection.last_error.is_some());
    assert!(handle.shutdown().await);
}
