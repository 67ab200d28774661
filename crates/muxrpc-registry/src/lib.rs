//! muxrpc Registry Service
//!
//! A small HTTP registry keeping servers discoverable: a server announces
//! itself with periodic heartbeats, and clients fetch the alive set. An
//! entry is alive while its last heartbeat is younger than the configured
//! TTL; reads evict whatever has expired.
//!
//! # HTTP Interface
//!
//! On the registry path (default `/_rpc_/registry`):
//!
//! - `GET` answers 200 with the alive servers in the `X-rpc-Servers`
//!   response header, comma-separated.
//! - `POST` with the `X-rpc-Server` request header renews that address's
//!   heartbeat; a missing header is answered 500.
//! - Any other method is answered 405.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use muxrpc_common::protocol::{X_RPC_SERVER, X_RPC_SERVERS};
use muxrpc_common::{Result, RpcError};

/// Default path the registry is mounted on.
pub const DEFAULT_REGISTRY_PATH: &str = "/_rpc_/registry";

/// Default TTL: a server disappears five minutes after its last heartbeat.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// The registry state: server address to last-heartbeat time.
pub struct Registry {
    timeout: Duration,
    servers: Mutex<HashMap<String, Instant>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Registry {
    /// Creates a registry with the given TTL. A zero TTL keeps entries
    /// alive forever.
    pub fn new(timeout: Duration) -> Self {
        Registry {
            timeout,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Records a heartbeat for `addr`, adding it if unknown.
    pub fn put_server(&self, addr: &str) {
        let mut servers = self.servers.lock().unwrap();
        servers.insert(addr.to_string(), Instant::now());
    }

    /// The alive servers in sorted order. Expired entries are evicted as a
    /// side effect.
    pub fn alive_servers(&self) -> Vec<String> {
        let mut servers = self.servers.lock().unwrap();
        let now = Instant::now();
        servers.retain(|_, heartbeat| self.timeout.is_zero() || *heartbeat + self.timeout > now);

        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort();
        alive
    }

    /// The axum router serving this registry on `path`.
    pub fn router_at(self: Arc<Self>, path: &str) -> Router {
        Router::new()
            .route(path, get(list_servers).post(heartbeat))
            .with_state(self)
    }

    /// Serves the registry on the default path until the listener dies.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        tracing::info!(
            "rpc registry: listening on {:?} at {}",
            listener.local_addr(),
            DEFAULT_REGISTRY_PATH
        );
        let app = Arc::new(self).router_at(DEFAULT_REGISTRY_PATH);
        axum::serve(listener, app).await.map_err(RpcError::from)
    }
}

async fn list_servers(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let alive = registry.alive_servers().join(",");
    (StatusCode::OK, [(X_RPC_SERVERS, alive)])
}

async fn heartbeat(State(registry): State<Arc<Registry>>, headers: HeaderMap) -> StatusCode {
    let addr = headers
        .get(X_RPC_SERVER)
        .and_then(|v| v.to_str().ok())
        .filter(|addr| !addr.is_empty());
    match addr {
        Some(addr) => {
            tracing::debug!("rpc registry: heartbeat from {}", addr);
            registry.put_server(addr);
            StatusCode::OK
        }
        None => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Announces `addr` to the registry and keeps it alive.
///
/// The first beat is sent before returning, so a startup failure surfaces
/// to the caller. After that a background task beats every `period`; a zero
/// period defaults to a minute less than the default TTL, leaving enough
/// slack to beat again before expiring. The task stops on the first failed
/// beat.
///
/// # Arguments
/// * `registry_url` - Full registry endpoint (e.g., "http://host/_rpc_/registry")
/// * `addr` - The server address to announce
/// * `period` - Beat interval; zero picks the default
pub async fn start_heartbeat(
    registry_url: impl Into<String>,
    addr: impl Into<String>,
    period: Duration,
) -> Result<JoinHandle<()>> {
    let registry_url = registry_url.into();
    let addr = addr.into();
    let period = if period.is_zero() {
        DEFAULT_TIMEOUT - Duration::from_secs(60)
    } else {
        period
    };

    let http = reqwest::Client::new();
    send_heartbeat(&http, &registry_url, &addr).await?;

    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately and the startup beat already
        // went out; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = send_heartbeat(&http, &registry_url, &addr).await {
                tracing::warn!("rpc server: heartbeat failed: {}", e);
                break;
            }
        }
    }))
}

async fn send_heartbeat(http: &reqwest::Client, registry_url: &str, addr: &str) -> Result<()> {
    tracing::debug!("{} sending heartbeat to registry {}", addr, registry_url);
    let response = http
        .post(registry_url)
        .header(X_RPC_SERVER, addr)
        .send()
        .await
        .map_err(|e| RpcError::Registry(e.to_string()))?;
    if !response.status().is_success() {
        return Err(RpcError::Registry(format!(
            "heartbeat rejected: {}",
            response.status()
        )));
    }
    Ok(())
}
