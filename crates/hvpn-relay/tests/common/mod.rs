#![allow(dead_code)]

use axum::routing::post;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use hvpn_common::config::{RateLimits, ServeConfig};
use hvpn_common::types::{RegisterRequest, RegisterResponse};
use hvpn_relay::config::RelayConfig;
use hvpn_relay::egress::Egress;
use hvpn_relay::handshake::OriginPolicy;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn test_config(listen: SocketAddr) -> RelayConfig {
    RelayConfig {
        serve: ServeConfig::plain(listen),
        limits: RateLimits::default(),
        origins: OriginPolicy::default(),
        egress: Egress::Echo,
        registry_url: None,
        relay_id: "test-relay".to_string(),
        location: "us".to_string(),
        public_url: None,
        cloudflared_api: None,
        register_token: None,
        reregister_interval: Duration::ZERO,
    }
}

pub async fn start_relay() -> (SocketAddr, watch::Sender<bool>) {
    start_relay_with(|_| {}).await
}

pub async fn start_relay_with(
    tweak: impl FnOnce(&mut RelayConfig),
) -> (SocketAddr, watch::Sender<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = test_config(addr);
    tweak(&mut config);
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = hvpn_relay::run_with_shutdown(listener, &config, rx).await {
            eprintln!("relay error in test: {e}");
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, tx)
}

/// Opens a tunnel with the given `Origin` and subprotocol headers.
pub async fn connect(
    addr: &SocketAddr,
    origin: Option<&str>,
    protocol: Option<&str>,
) -> Result<Ws, tokio_tungstenite::tungstenite::Error> {
    let mut req = format!("ws://{addr}/ws").into_client_request().unwrap();
    if let Some(origin) = origin {
        req.headers_mut().insert("Origin", origin.parse().unwrap());
    }
    if let Some(protocol) = protocol {
        req.headers_mut()
            .insert("Sec-WebSocket-Protocol", protocol.parse().unwrap());
    }
    tokio_tungstenite::connect_async(req).await.map(|(ws, _)| ws)
}

pub async fn connect_ok(addr: &SocketAddr) -> Ws {
    connect(addr, Some("http://localhost"), Some("vpn-protocol"))
        .await
        .unwrap()
}

/// Collects payload bytes until `len` have arrived.
pub async fn read_bytes(ws: &mut Ws, len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    while out.len() < len {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for tunnel data")
            .unwrap()
            .unwrap();
        match msg {
            Message::Binary(data) => out.extend_from_slice(&data),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("expected binary frame, got {other:?}"),
        }
    }
    out
}

pub async fn send_bytes(ws: &mut Ws, data: &[u8]) {
    ws.send(Message::Binary(data.to_vec())).await.unwrap();
}

pub type Registrations = Arc<Mutex<Vec<RegisterRequest>>>;

/// A registry stand-in that records registrations and answers with
/// `assigned_id` when set.
pub async fn start_fake_registry(assigned_id: Option<&str>) -> (SocketAddr, Registrations) {
    let seen: Registrations = Arc::default();
    let recorded = Arc::clone(&seen);
    let assigned = assigned_id.map(str::to_string);
    let app = Router::new().route(
        "/register",
        post(move |Json(req): Json<RegisterRequest>| {
            let recorded = Arc::clone(&recorded);
            let assigned = assigned.clone();
            async move {
                let server_id = assigned.unwrap_or_else(|| req.id.clone());
                recorded.lock().unwrap().push(req);
                Json(RegisterResponse {
                    status: "registered".to_string(),
                    server_id,
                })
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, seen)
}

pub async fn wait_for<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..150 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
