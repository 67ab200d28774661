//! XClient scenarios: selection over replicas, broadcast fan-out, and
//! registry-backed discovery refresh.

mod support;

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

use muxrpc_client::{MultiServerDiscovery, RegistryDiscovery, SelectMode, XClient};
use muxrpc_common::Options;
use muxrpc_registry::{start_heartbeat, Registry, DEFAULT_REGISTRY_PATH};
use muxrpc_server::Service;
use support::{Empty, Reply};

#[tokio::test]
async fn test_round_robin_splits_calls_evenly() {
    let a = support::start_arith(1).await;
    let b = support::start_arith(2).await;

    let discovery = MultiServerDiscovery::with_seed(vec![a, b], 11);
    let xclient = XClient::new(discovery, SelectMode::RoundRobin, Options::default());

    let mut counts: HashMap<i32, usize> = HashMap::new();
    for _ in 0..10 {
        let reply: Reply = xclient.call("Arith.Which", &Empty {}).await.unwrap();
        *counts.entry(reply.val).or_default() += 1;
    }

    assert_eq!(counts.get(&1), Some(&5));
    assert_eq!(counts.get(&2), Some(&5));
    xclient.close().await;
}

#[tokio::test]
async fn test_random_selection_reaches_replicas() {
    let a = support::start_arith(1).await;
    let b = support::start_arith(2).await;

    let discovery = MultiServerDiscovery::with_seed(vec![a, b], 5);
    let xclient = XClient::new(discovery, SelectMode::Random, Options::default());

    for _ in 0..10 {
        let reply: Reply = xclient.call("Arith.Which", &Empty {}).await.unwrap();
        assert!(reply.val == 1 || reply.val == 2);
    }
    xclient.close().await;
}

#[tokio::test]
async fn test_empty_discovery_has_no_available_servers() {
    let discovery = MultiServerDiscovery::new(Vec::new());
    let xclient = XClient::new(discovery, SelectMode::Random, Options::default());

    let result: Result<Reply, _> = xclient.call("Arith.Which", &Empty {}).await;
    assert!(matches!(
        result,
        Err(muxrpc_common::RpcError::NoAvailableServers)
    ));
}

/// A probe service whose replicas disagree: one fails slowly, one answers.
struct Probe {
    outcome: Result<i32, String>,
    delay: Duration,
}

impl Probe {
    fn get(&self, _args: Empty, reply: &mut Reply) -> Result<(), String> {
        std::thread::sleep(self.delay);
        match &self.outcome {
            Ok(val) => {
                reply.val = *val;
                Ok(())
            }
            Err(message) => Err(message.clone()),
        }
    }
}

async fn start_probe(outcome: Result<i32, String>, delay: Duration) -> String {
    support::start_server_with(
        Service::build("Probe", Probe { outcome, delay })
            .method("Get", Probe::get)
            .finish(),
    )
    .await
}

#[tokio::test]
async fn test_broadcast_first_success_wins() {
    // One replica errors, but slowly; the healthy one answers first.
    let slow_failure = start_probe(Err("replica down".to_string()), Duration::from_millis(400)).await;
    let healthy = start_probe(Ok(9), Duration::ZERO).await;

    let discovery = MultiServerDiscovery::with_seed(vec![slow_failure, healthy], 3);
    let xclient = XClient::new(discovery, SelectMode::RoundRobin, Options::default());

    let reply: Option<Reply> = xclient.broadcast("Probe.Get", &Empty {}).await.unwrap();
    assert_eq!(reply, Some(Reply { val: 9 }));
    xclient.close().await;
}

#[tokio::test]
async fn test_broadcast_hanging_siblings_are_cancelled() {
    let hanging = start_probe(Ok(1), Duration::from_millis(1500)).await;
    let healthy = start_probe(Ok(9), Duration::ZERO).await;

    let discovery = MultiServerDiscovery::with_seed(vec![hanging, healthy], 3);
    let xclient = XClient::new(discovery, SelectMode::RoundRobin, Options::default());

    let started = Instant::now();
    let reply: Option<Reply> = xclient.broadcast("Probe.Get", &Empty {}).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(reply, Some(Reply { val: 9 }));
    assert!(
        elapsed < Duration::from_millis(1000),
        "broadcast waited for the hanging sibling: {elapsed:?}"
    );
    xclient.close().await;
}

#[tokio::test]
async fn test_broadcast_all_failures_returns_first_error() {
    let a = start_probe(Err("a down".to_string()), Duration::ZERO).await;
    let b = start_probe(Err("b down".to_string()), Duration::ZERO).await;

    let discovery = MultiServerDiscovery::with_seed(vec![a, b], 3);
    let xclient = XClient::new(discovery, SelectMode::RoundRobin, Options::default());

    let result: Result<Option<Reply>, _> = xclient.broadcast("Probe.Get", &Empty {}).await;
    match result {
        Err(muxrpc_common::RpcError::Remote(message)) => {
            assert!(message == "a down" || message == "b down");
        }
        other => panic!("expected a remote error, got {other:?}"),
    }
    xclient.close().await;
}

#[tokio::test]
async fn test_broadcast_over_empty_discovery() {
    let discovery = MultiServerDiscovery::new(Vec::new());
    let xclient = XClient::new(discovery, SelectMode::RoundRobin, Options::default());

    let reply: Option<Reply> = xclient.broadcast("Probe.Get", &Empty {}).await.unwrap();
    assert_eq!(reply, None);
}

#[tokio::test]
async fn test_registry_refresh_routes_around_dead_server() {
    // Registry with a short TTL so expiry is observable.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let registry_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        Registry::new(Duration::from_millis(400))
            .serve(listener)
            .await
            .unwrap();
    });
    let registry_url = format!("http://{registry_addr}{DEFAULT_REGISTRY_PATH}");

    let a = support::start_arith(1).await;
    let b = support::start_arith(2).await;

    // Server A beats once and goes quiet; server B keeps beating.
    let a_beat = start_heartbeat(&registry_url, &a, Duration::from_millis(100))
        .await
        .unwrap();
    a_beat.abort();
    let _b_beat = start_heartbeat(&registry_url, &b, Duration::from_millis(100))
        .await
        .unwrap();

    let discovery =
        RegistryDiscovery::new(&registry_url).with_refresh_timeout(Duration::from_millis(100));
    let xclient = XClient::new(discovery, SelectMode::RoundRobin, Options::default());

    // Both replicas are routable right after the initial heartbeats.
    let mut seen = std::collections::HashSet::new();
    for _ in 0..4 {
        let reply: Reply = xclient.call("Arith.Which", &Empty {}).await.unwrap();
        seen.insert(reply.val);
    }
    assert_eq!(seen, [1, 2].into_iter().collect());

    // Past the TTL, A has expired and the refreshed list routes only to B.
    tokio::time::sleep(Duration::from_millis(700)).await;
    for _ in 0..4 {
        let reply: Reply = xclient.call("Arith.Which", &Empty {}).await.unwrap();
        assert_eq!(reply.val, 2);
    }
    xclient.close().await;
}
