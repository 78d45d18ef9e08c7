#![allow(dead_code)]

use axum::routing::{get, post};
use axum::{Json, Router};
use hvpn_common::config::{RateLimits, ServeConfig};
use hvpn_common::types::{RelayEntry, UpdateResponse};
use hvpn_registry::config::RegistryConfig;
use hvpn_registry::store::{IdPolicy, Registry};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

pub const ROUTER_TOKEN: &str = "push-secret";

pub fn test_config(listen: SocketAddr) -> RegistryConfig {
    RegistryConfig {
        serve: ServeConfig::plain(listen),
        limits: RateLimits::default(),
        data_dir: PathBuf::from("unused"),
        router_url: None,
        router_token: None,
        register_token: None,
        sweep_interval: Duration::from_secs(3600),
        probe_timeout: Duration::from_secs(1),
        id_policy: IdPolicy::default(),
    }
}

pub struct TestRegistry {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
    pub shutdown: watch::Sender<bool>,
}

impl TestRegistry {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub async fn start_registry() -> TestRegistry {
    start_registry_with(|_| {}).await
}

pub async fn start_registry_with(tweak: impl FnOnce(&mut RegistryConfig)) -> TestRegistry {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = test_config(addr);
    tweak(&mut config);
    let registry = Arc::new(Registry::temporary(config.id_policy).unwrap());
    let (shutdown, rx) = watch::channel(false);

    let registry_clone = Arc::clone(&registry);
    tokio::spawn(async move {
        if let Err(e) = hvpn_registry::run_with_shutdown(listener, registry_clone, &config, rx).await
        {
            eprintln!("registry error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    TestRegistry {
        addr,
        registry,
        shutdown,
    }
}

/// A relay stand-in that only answers `/health`.
pub async fn start_healthy_relay() -> SocketAddr {
    let app = Router::new().route("/health", get(|| async { "OK" }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub type Pushes = Arc<Mutex<Vec<Vec<RelayEntry>>>>;

/// A router stand-in that records every authorized push.
pub async fn start_fake_router() -> (SocketAddr, Pushes) {
    let pushes: Pushes = Arc::default();
    let recorded = Arc::clone(&pushes);
    let app = Router::new().route(
        "/update-servers",
        post(
            move |headers: axum::http::HeaderMap, Json(entries): Json<Vec<RelayEntry>>| {
                let recorded = Arc::clone(&recorded);
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    if auth != format!("Bearer {ROUTER_TOKEN}") {
                        return Err(axum::http::StatusCode::FORBIDDEN);
                    }
                    let count = entries.len();
                    recorded.lock().unwrap().push(entries);
                    Ok(Json(UpdateResponse {
                        status: "updated".to_string(),
                        server_count: count,
                    }))
                }
            },
        ),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, pushes)
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
