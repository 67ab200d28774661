//! The replica-aware client.
//!
//! An [`XClient`] keeps one [`Client`] per server address, lazily dialed
//! and reused across calls. `call` picks one replica through the discovery
//! layer; `broadcast` fans a call out to every replica with a shared cancel
//! signal: the first recorded outcome (a reply, or a failure before any
//! reply) wins and aborts the in-flight siblings.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;

use muxrpc_common::{Options, Result, RpcError};

use crate::client::Client;
use crate::discovery::{Discovery, SelectMode};

type ClientCache = Arc<Mutex<HashMap<String, Client>>>;

pub struct XClient {
    discovery: Discovery,
    mode: SelectMode,
    opt: Options,
    clients: ClientCache,
}

#[derive(Default)]
struct BroadcastOutcome {
    done: bool,
    reply: Option<Value>,
    error: Option<RpcError>,
}

impl XClient {
    pub fn new(discovery: impl Into<Discovery>, mode: SelectMode, opt: Options) -> Self {
        XClient {
            discovery: discovery.into(),
            mode,
            opt,
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Picks a replica and invokes the named method on it.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let addr = self.discovery.get(self.mode).await?;
        let client = cached_client(&self.clients, &self.opt, &addr).await?;
        client.call(service_method, args).await
    }

    /// Like [`call`](XClient::call) with a per-call deadline.
    pub async fn call_timeout<A, R>(
        &self,
        service_method: &str,
        args: &A,
        deadline: Duration,
    ) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let addr = self.discovery.get(self.mode).await?;
        let client = cached_client(&self.clients, &self.opt, &addr).await?;
        client.call_timeout(service_method, args, deadline).await
    }

    /// Invokes the named method on every known replica concurrently.
    ///
    /// The first reply wins: it is recorded, the siblings are cancelled and
    /// `Ok(Some(reply))` comes back. A failure observed before any reply is
    /// recorded the same way and becomes the returned error. An empty
    /// replica list yields `Ok(None)`.
    pub async fn broadcast<A, R>(&self, service_method: &str, args: &A) -> Result<Option<R>>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let servers = self.discovery.get_all().await?;
        let args_value = serde_json::to_value(args)?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);
        let outcome = Arc::new(StdMutex::new(BroadcastOutcome::default()));

        let mut branches = JoinSet::new();
        for addr in servers {
            let clients = Arc::clone(&self.clients);
            let opt = self.opt.clone();
            let service_method = service_method.to_string();
            let args_value = args_value.clone();
            let mut cancel = cancel_rx.clone();
            let cancel_tx = Arc::clone(&cancel_tx);
            let outcome = Arc::clone(&outcome);

            branches.spawn(async move {
                let result: Result<Value> = tokio::select! {
                    // Cancelled by a sibling's recorded outcome; record
                    // nothing ourselves.
                    _ = cancel.changed() => return,
                    result = branch_call(&clients, &opt, &addr, &service_method, &args_value) => result,
                };

                let mut outcome = outcome.lock().unwrap();
                if outcome.done {
                    return;
                }
                outcome.done = true;
                match result {
                    Ok(reply) => outcome.reply = Some(reply),
                    Err(e) => outcome.error = Some(e),
                }
                let _ = cancel_tx.send(true);
            });
        }
        while branches.join_next().await.is_some() {}

        let mut outcome = outcome.lock().unwrap();
        if let Some(e) = outcome.error.take() {
            return Err(e);
        }
        match outcome.reply.take() {
            Some(reply) => Ok(Some(serde_json::from_value(reply)?)),
            None => Ok(None),
        }
    }

    /// Closes and evicts every cached client.
    pub async fn close(&self) {
        let drained: Vec<Client> = {
            let mut clients = self.clients.lock().await;
            clients.drain().map(|(_, client)| client).collect()
        };
        for client in drained {
            let _ = client.close().await;
        }
    }
}

async fn branch_call(
    clients: &ClientCache,
    opt: &Options,
    addr: &str,
    service_method: &str,
    args: &Value,
) -> Result<Value> {
    let client = cached_client(clients, opt, addr).await?;
    client.call(service_method, args).await
}

/// Returns the cached client for `addr`, evicting one that has gone
/// unavailable, and dialing outside the cache lock on a miss.
async fn cached_client(clients: &ClientCache, opt: &Options, addr: &str) -> Result<Client> {
    let stale = {
        let mut cache = clients.lock().await;
        match cache.get(addr) {
            Some(client) if client.is_available() => return Ok(client.clone()),
            Some(_) => cache.remove(addr),
            None => None,
        }
    };
    if let Some(client) = stale {
        let _ = client.close().await;
    }

    let dialed = Client::dial(addr, opt.clone()).await?;

    let mut cache = clients.lock().await;
    match cache.get(addr) {
        // Another task won the dial race; keep its client and drop ours.
        Some(client) if client.is_available() => {
            let winner = client.clone();
            drop(cache);
            let _ = dialed.close().await;
            Ok(winner)
        }
        _ => {
            cache.insert(addr.to_string(), dialed.clone());
            Ok(dialed)
        }
    }
}
