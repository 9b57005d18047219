//! Relay behind a real WebSocket listener.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use signal_relay::auth::{AuthError, IdentityProvider, ProviderClaims};
use signal_relay::config::{Config, Secret};
use signal_relay::http::build_router;
use signal_relay::server::SignalRelay;
use signal_types::{Frame, FrameType};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct StubProvider;

#[async_trait]
impl IdentityProvider for StubProvider {
    async fn introspect(&self, credential: &str) -> Result<ProviderClaims, AuthError> {
        Ok(ProviderClaims {
            email: credential.trim_start_matches("id:").to_string(),
            audience: "test-client".to_string(),
        })
    }
}

async fn start_relay() -> (Arc<SignalRelay>, SocketAddr) {
    let mut config = Config::default();
    config.auth.allowed_audiences = vec!["test-client".to_string()];
    config.auth.session_secret_seed = Secret::new("ws-seed");
    config.turn.secret = Secret::new("turn-secret");
    let relay = Arc::new(SignalRelay::new(config, Arc::new(StubProvider), None));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(relay.clone()).into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (relay, addr)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}/", addr))
        .await
        .unwrap();
    client
}

async fn send(client: &mut Client, json: &str) {
    client.send(Message::Text(json.to_string())).await.unwrap();
}

/// Next frame of the wanted type, skipping anything else (e.g. pings).
async fn next_of(client: &mut Client, frame_type: FrameType) -> Frame {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame = Frame::from_json(&text).unwrap();
                    if frame.frame_type == frame_type {
                        return frame;
                    }
                }
                Some(Ok(_)) => {}
                other => panic!("socket ended while waiting: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

#[tokio::test]
async fn messages_flow_between_sockets() {
    let (relay, addr) = start_relay().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    send(&mut alice, r#"{"t":"AUTH","data":{"token":"id:alice@example.com"}}"#).await;
    next_of(&mut alice, FrameType::AuthSuccess).await;
    send(&mut bob, r#"{"t":"AUTH","data":{"token":"id:bob@example.com"}}"#).await;
    next_of(&mut bob, FrameType::AuthSuccess).await;

    send(&mut alice, r#"{"t":"REATTACH","sid":"room"}"#).await;
    send(&mut bob, r#"{"t":"REATTACH","sid":"room"}"#).await;
    next_of(&mut alice, FrameType::PeerOnline).await;
    next_of(&mut bob, FrameType::PeerOnline).await;

    send(
        &mut bob,
        r#"{"t":"MSG","sid":"room","c":true,"data":{"payload":"sealed"}}"#,
    )
    .await;
    let msg = next_of(&mut alice, FrameType::Message).await;
    assert_eq!(msg.data.unwrap()["payload"], "sealed");
    next_of(&mut bob, FrameType::Delivered).await;

    assert_eq!(relay.total_identities(), 2);

    // Dropping a socket triggers PEER_OFFLINE for the other member
    bob.close(None).await.unwrap();
    let offline = next_of(&mut alice, FrameType::PeerOffline).await;
    assert_eq!(offline.session_id.as_str(), "room");
}

#[tokio::test]
async fn health_is_served_next_to_the_socket() {
    let (_relay, addr) = start_relay().await;

    let response = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}
