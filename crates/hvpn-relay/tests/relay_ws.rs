mod common;

use common::*;
use futures_util::StreamExt;
use hvpn_relay::egress::Egress;
use hvpn_relay::handshake::OriginPolicy;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

fn rejected_status(result: Result<Ws, WsError>) -> u16 {
    match result {
        Err(WsError::Http(resp)) => resp.status().as_u16(),
        Err(other) => panic!("expected http rejection, got {other:?}"),
        Ok(_) => panic!("upgrade unexpectedly succeeded"),
    }
}

#[tokio::test]
async fn echo_tunnel_returns_bytes_in_order() {
    let (addr, _stop) = start_relay().await;
    let mut ws = connect_ok(&addr).await;

    let payload: Vec<u8> = (0..12_000u32).map(|i| (i % 241) as u8).collect();
    for chunk in payload.chunks(3000) {
        send_bytes(&mut ws, chunk).await;
    }
    assert_eq!(read_bytes(&mut ws, payload.len()).await, payload);
}

#[tokio::test]
async fn upgrade_selects_tunnel_subprotocol() {
    let (addr, _stop) = start_relay().await;
    let mut req = tokio_tungstenite::tungstenite::client::IntoClientRequest::into_client_request(
        format!("ws://{addr}/ws"),
    )
    .unwrap();
    req.headers_mut()
        .insert("Origin", "http://127.0.0.1".parse().unwrap());
    req.headers_mut()
        .insert("Sec-WebSocket-Protocol", "vpn-protocol".parse().unwrap());
    let (_ws, resp) = tokio_tungstenite::connect_async(req).await.unwrap();
    assert_eq!(
        resp.headers().get("sec-websocket-protocol").unwrap(),
        "vpn-protocol"
    );
}

#[tokio::test]
async fn untrusted_origin_is_refused() {
    let (addr, _stop) = start_relay().await;
    let status = rejected_status(connect(&addr, Some("https://evil.example"), Some("vpn-protocol")).await);
    assert_eq!(status, 403);
}

#[tokio::test]
async fn missing_origin_is_refused() {
    let (addr, _stop) = start_relay().await;
    let status = rejected_status(connect(&addr, None, Some("vpn-protocol")).await);
    assert_eq!(status, 403);
}

#[tokio::test]
async fn missing_subprotocol_is_refused() {
    let (addr, _stop) = start_relay().await;
    let status = rejected_status(connect(&addr, Some("http://localhost"), None).await);
    assert_eq!(status, 400);
}

#[tokio::test]
async fn allow_all_accepts_missing_origin() {
    let (addr, _stop) = start_relay_with(|cfg| cfg.origins = OriginPolicy::AllowAll).await;
    let mut ws = connect(&addr, None, Some("vpn-protocol")).await.unwrap();
    send_bytes(&mut ws, b"hi").await;
    assert_eq!(read_bytes(&mut ws, 2).await, b"hi");
}

#[tokio::test]
async fn configured_origin_is_trusted() {
    let (addr, _stop) = start_relay_with(|cfg| {
        cfg.origins = OriginPolicy::with_trusted(["https://app.example"]);
    })
    .await;
    assert!(connect(&addr, Some("https://app.example"), Some("vpn-protocol"))
        .await
        .is_ok());
}

#[tokio::test]
async fn health_returns_ok() {
    let (addr, _stop) = start_relay().await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn tcp_egress_bridges_both_ways_and_closes_together() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    let (addr, _stop) =
        start_relay_with(|cfg| cfg.egress = Egress::Tcp(upstream_addr.to_string())).await;

    let mut ws = connect_ok(&addr).await;
    let (mut sock, _) = upstream.accept().await.unwrap();

    send_bytes(&mut ws, b"request").await;
    let mut buf = [0u8; 7];
    sock.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"request");

    sock.write_all(b"response").await.unwrap();
    assert_eq!(read_bytes(&mut ws, 8).await, b"response");

    ws.close(None).await.unwrap();
    let mut rest = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), sock.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn egress_close_closes_client() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    let (addr, _stop) =
        start_relay_with(|cfg| cfg.egress = Egress::Tcp(upstream_addr.to_string())).await;

    let mut ws = connect_ok(&addr).await;
    let (sock, _) = upstream.accept().await.unwrap();
    drop(sock);

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return true,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .unwrap();
    assert!(closed);
}

#[tokio::test]
async fn unreachable_egress_drops_the_session() {
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);
    let (addr, _stop) =
        start_relay_with(|cfg| cfg.egress = Egress::Tcp(dead_addr.to_string())).await;

    let mut ws = connect_ok(&addr).await;
    let ended = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap();
    assert!(matches!(ended, None | Some(Err(_)) | Some(Ok(Message::Close(_)))));
}

#[tokio::test]
async fn chained_relays_forward_through_next_hop() {
    let (hop, _stop_hop) = start_relay_with(|cfg| cfg.origins = OriginPolicy::AllowAll).await;
    let (entry, _stop_entry) = start_relay_with(|cfg| {
        cfg.egress = format!("ws://{hop}/ws").parse().unwrap();
    })
    .await;

    let mut ws = connect_ok(&entry).await;
    send_bytes(&mut ws, b"through two relays").await;
    assert_eq!(read_bytes(&mut ws, 18).await, b"through two relays");
}

#[tokio::test]
async fn relay_registers_itself() {
    let (registry, seen) = start_fake_registry(None).await;
    let (addr, _stop) = start_relay_with(|cfg| {
        cfg.registry_url = Some(format!("http://{registry}").parse().unwrap());
    })
    .await;

    assert!(wait_for(|| !seen.lock().unwrap().is_empty()).await);
    let first = seen.lock().unwrap()[0].clone();
    assert_eq!(first.id, "test-relay");
    assert_eq!(first.location, "us");
    assert_eq!(first.url, format!("ws://localhost:{}/ws", addr.port()));
}

#[tokio::test]
async fn relay_adopts_assigned_id_on_reregistration() {
    let (registry, seen) = start_fake_registry(Some("minted-id-from-registry")).await;
    let (_addr, _stop) = start_relay_with(|cfg| {
        cfg.registry_url = Some(format!("http://{registry}").parse().unwrap());
        cfg.public_url = Some("wss://relay.example/ws".into());
        cfg.reregister_interval = Duration::from_millis(100);
    })
    .await;

    assert!(wait_for(|| seen.lock().unwrap().len() >= 2).await);
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].id, "test-relay");
    assert_eq!(seen[1].id, "minted-id-from-registry");
    assert_eq!(seen[1].url, "wss://relay.example/ws");
}

#[tokio::test]
async fn open_tunnels_count_against_connection_limit() {
    let (addr, _stop) = start_relay_with(|cfg| cfg.serve.max_conns = 1).await;

    let mut first = connect_ok(&addr).await;
    send_bytes(&mut first, b"one").await;
    assert_eq!(read_bytes(&mut first, 3).await, b"one");

    let refused = tokio::time::timeout(
        Duration::from_secs(5),
        connect(&addr, Some("http://localhost"), Some("vpn-protocol")),
    )
    .await
    .unwrap();
    assert!(refused.is_err(), "second tunnel admitted past the limit");

    first.close(None).await.unwrap();
    drop(first);

    let mut admitted = None;
    for _ in 0..100 {
        if let Ok(ws) = connect(&addr, Some("http://localhost"), Some("vpn-protocol")).await {
            admitted = Some(ws);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let mut second = admitted.expect("slot not released after the tunnel closed");
    send_bytes(&mut second, b"two").await;
    assert_eq!(read_bytes(&mut second, 3).await, b"two");
}
