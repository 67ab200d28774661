//! Server discovery: who are the candidate replicas for a call.
//!
//! The static variant holds an explicit address list; the registry-backed
//! variant wraps it and refreshes the list from a registry endpoint when it
//! has gone stale. Selection is either uniformly random or round-robin with
//! a randomized starting cursor so freshly started clients do not all pile
//! onto the first address.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use muxrpc_common::protocol::X_RPC_SERVERS;
use muxrpc_common::{Result, RpcError};

/// How the next replica is picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    Random,
    RoundRobin,
}

/// Default staleness bound for registry-backed discovery.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

struct StaticState {
    rng: StdRng,
    servers: Vec<String>,
    index: usize,
}

/// Discovery over a fixed, caller-provided address list.
pub struct MultiServerDiscovery {
    state: Mutex<StaticState>,
}

impl MultiServerDiscovery {
    pub fn new(servers: Vec<String>) -> Self {
        Self::with_rng(servers, StdRng::from_entropy())
    }

    /// Deterministic variant for tests: selection and the initial
    /// round-robin cursor both derive from `seed`.
    pub fn with_seed(servers: Vec<String>, seed: u64) -> Self {
        Self::with_rng(servers, StdRng::seed_from_u64(seed))
    }

    fn with_rng(servers: Vec<String>, mut rng: StdRng) -> Self {
        let index = rng.gen::<u32>() as usize;
        MultiServerDiscovery {
            state: Mutex::new(StaticState {
                rng,
                servers,
                index,
            }),
        }
    }

    /// Picks one address according to `mode`.
    pub fn get(&self, mode: SelectMode) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let n = state.servers.len();
        if n == 0 {
            return Err(RpcError::NoAvailableServers);
        }
        match mode {
            SelectMode::Random => {
                let i = state.rng.gen_range(0..n);
                Ok(state.servers[i].clone())
            }
            SelectMode::RoundRobin => {
                let picked = state.servers[state.index % n].clone();
                state.index = state.index.wrapping_add(1);
                Ok(picked)
            }
        }
    }

    /// All known addresses.
    pub fn get_all(&self) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.servers.clone())
    }

    /// Replaces the address list.
    pub fn update(&self, servers: Vec<String>) {
        let mut state = self.state.lock().unwrap();
        state.servers = servers;
    }
}

/// Discovery backed by a registry endpoint.
///
/// Every access refreshes the inner list first when the last refresh is
/// older than the refresh timeout. Refresh failures propagate to the
/// caller. The refresh timestamp and the address list live behind separate
/// locks taken in sequence, never nested.
pub struct RegistryDiscovery {
    inner: MultiServerDiscovery,
    registry: String,
    refresh_timeout: Duration,
    last_refresh: Mutex<Option<Instant>>,
    http: reqwest::Client,
}

impl RegistryDiscovery {
    pub fn new(registry: impl Into<String>) -> Self {
        RegistryDiscovery {
            inner: MultiServerDiscovery::new(Vec::new()),
            registry: registry.into(),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            last_refresh: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }

    /// Sets how stale the address list may get before an access refreshes
    /// it.
    pub fn with_refresh_timeout(mut self, refresh_timeout: Duration) -> Self {
        self.refresh_timeout = refresh_timeout;
        self
    }

    /// Fetches the alive servers from the registry if the list is stale.
    pub async fn refresh(&self) -> Result<()> {
        {
            let last = self.last_refresh.lock().unwrap();
            if let Some(at) = *last {
                if at.elapsed() < self.refresh_timeout {
                    return Ok(());
                }
            }
        }

        tracing::info!("rpc discovery: refreshing servers from {}", self.registry);
        let response = self
            .http
            .get(&self.registry)
            .send()
            .await
            .map_err(|e| RpcError::Registry(e.to_string()))?;
        let raw = response
            .headers()
            .get(X_RPC_SERVERS)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let servers: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        self.inner.update(servers);
        *self.last_refresh.lock().unwrap() = Some(Instant::now());
        Ok(())
    }

    pub async fn get(&self, mode: SelectMode) -> Result<String> {
        self.refresh().await?;
        self.inner.get(mode)
    }

    pub async fn get_all(&self) -> Result<Vec<String>> {
        self.refresh().await?;
        self.inner.get_all()
    }

    /// Replaces the list by hand; the list counts as freshly refreshed.
    pub fn update(&self, servers: Vec<String>) {
        self.inner.update(servers);
        *self.last_refresh.lock().unwrap() = Some(Instant::now());
    }
}

/// Either discovery flavor, so callers hold one concrete type.
pub enum Discovery {
    Static(MultiServerDiscovery),
    Registry(RegistryDiscovery),
}

impl Discovery {
    pub async fn get(&self, mode: SelectMode) -> Result<String> {
        match self {
            Discovery::Static(d) => d.get(mode),
            Discovery::Registry(d) => d.get(mode).await,
        }
    }

    pub async fn get_all(&self) -> Result<Vec<String>> {
        match self {
            Discovery::Static(d) => d.get_all(),
            Discovery::Registry(d) => d.get_all().await,
        }
    }

    pub fn update(&self, servers: Vec<String>) {
        match self {
            Discovery::Static(d) => d.update(servers),
            Discovery::Registry(d) => d.update(servers),
        }
    }
}

impl From<MultiServerDiscovery> for Discovery {
    fn from(d: MultiServerDiscovery) -> Self {
        Discovery::Static(d)
    }
}

impl From<RegistryDiscovery> for Discovery {
    fn from(d: RegistryDiscovery) -> Self {
        Discovery::Registry(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn addrs(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("127.0.0.1:{}", 9000 + i)).collect()
    }

    #[test]
    fn test_empty_list_has_no_available_servers() {
        let discovery = MultiServerDiscovery::new(Vec::new());
        assert!(matches!(
            discovery.get(SelectMode::Random),
            Err(RpcError::NoAvailableServers)
        ));
        assert!(matches!(
            discovery.get(SelectMode::RoundRobin),
            Err(RpcError::NoAvailableServers)
        ));
    }

    #[test]
    fn test_round_robin_is_fair() {
        let k = 3;
        let n = 10;
        let discovery = MultiServerDiscovery::with_seed(addrs(k), 42);

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..n {
            *counts
                .entry(discovery.get(SelectMode::RoundRobin).unwrap())
                .or_default() += 1;
        }

        // Each address is picked either ceil(n/k) or floor(n/k) times.
        assert_eq!(counts.len(), k);
        for (_, count) in counts {
            assert!(count == n / k || count == n / k + 1);
        }
    }

    #[test]
    fn test_random_selection_is_seed_reproducible() {
        let first = MultiServerDiscovery::with_seed(addrs(5), 7);
        let second = MultiServerDiscovery::with_seed(addrs(5), 7);

        for _ in 0..20 {
            assert_eq!(
                first.get(SelectMode::Random).unwrap(),
                second.get(SelectMode::Random).unwrap()
            );
        }
    }

    #[test]
    fn test_update_replaces_servers() {
        let discovery = MultiServerDiscovery::with_seed(addrs(2), 1);
        discovery.update(vec!["127.0.0.1:1".to_string()]);

        assert_eq!(discovery.get_all().unwrap(), vec!["127.0.0.1:1"]);
        assert_eq!(
            discovery.get(SelectMode::Random).unwrap(),
            "127.0.0.1:1".to_string()
        );
    }
}
