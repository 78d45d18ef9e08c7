#![allow(dead_code)]

use hvpn_common::config::{RateLimits, ServeConfig};
use hvpn_router::config::RouterConfig;
use hvpn_router::table::RouteTable;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

pub const PUSH_TOKEN: &str = "push-secret";

pub fn test_config(listen: SocketAddr) -> RouterConfig {
    RouterConfig {
        serve: ServeConfig::plain(listen),
        limits: RateLimits::default(),
        registry_url: None,
        push_token: Some(PUSH_TOKEN.to_string()),
        fallback_relay: None,
        route_ttl: Duration::from_secs(3600),
        resync_interval: Duration::ZERO,
    }
}

pub struct TestRouter {
    pub addr: SocketAddr,
    pub table: Arc<RouteTable>,
    pub shutdown: watch::Sender<bool>,
}

impl TestRouter {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn route(&self, client: &reqwest::Client, location: &str) -> reqwest::Response {
        client
            .post(self.url("/route"))
            .json(&serde_json::json!({ "location": location }))
            .send()
            .await
            .unwrap()
    }
}

pub async fn start_router() -> TestRouter {
    start_router_with(|_| {}).await
}

pub async fn start_router_with(tweak: impl FnOnce(&mut RouterConfig)) -> TestRouter {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = test_config(addr);
    tweak(&mut config);
    let table = hvpn_router::route_table(&config);
    let (shutdown, rx) = watch::channel(false);

    let table_clone = Arc::clone(&table);
    tokio::spawn(async move {
        if let Err(e) = hvpn_router::run_with_shutdown(listener, table_clone, &config, rx).await {
            eprintln!("router error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    TestRouter {
        addr,
        table,
        shutdown,
    }
}

pub async fn wait_for<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
