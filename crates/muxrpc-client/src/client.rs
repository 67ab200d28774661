//! The client multiplexer.
//!
//! One [`Client`] owns one connection and any number of concurrent calls.
//! A call is assigned the next sequence number and parked in the pending
//! table under the same lock, so the sequence on the wire is always present
//! in the table at the moment of transmission. A single receiver task reads
//! replies and completes pending calls by sequence number; every fatal error
//! funnels through one terminate path that marks the client shut down and
//! fails whatever is still pending, exactly once per call.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};

use muxrpc_common::codec::{CodecReader, CodecWriter};
use muxrpc_common::protocol::{CONNECTED_STATUS, DEFAULT_RPC_PATH};
use muxrpc_common::{Header, Options, Result, RpcError};

use crate::call::{Call, CallResult};

struct State {
    seq: u64,
    pending: HashMap<u64, oneshot::Sender<CallResult>>,
    closing: bool,
    shutdown: bool,
}

struct Inner {
    /// The sending lock: held for the duration of one header+body write.
    writer: Mutex<CodecWriter>,
    /// Protects seq, the pending table and the lifecycle flags. When both
    /// locks are needed, the state lock nests inside the sending lock.
    state: StdMutex<State>,
    close_signal: StdMutex<Option<oneshot::Sender<()>>>,
}

/// An RPC client. Cheap to clone; all clones share the connection and may
/// issue calls concurrently.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Connects to `addr` and performs the session handshake.
    ///
    /// A non-zero `connect_timeout` in the options bounds the dial; when it
    /// fires no connection was established, so there is nothing to tear
    /// down.
    ///
    /// # Arguments
    /// * `addr` - The server address (e.g., "127.0.0.1:9999")
    /// * `opt` - Session options, sent as the connection preamble
    pub async fn dial(addr: &str, opt: Options) -> Result<Client> {
        let stream = Self::connect(addr, &opt).await?;
        let (read_half, write_half) = stream.into_split();
        Self::with_parts(BufReader::new(read_half), write_half, opt).await
    }

    /// Connects through the HTTP CONNECT bridge on the default RPC path.
    pub async fn dial_http(addr: &str, opt: Options) -> Result<Client> {
        Self::dial_http_path(addr, DEFAULT_RPC_PATH, opt).await
    }

    /// Connects through the HTTP CONNECT bridge on `path`. The stream only
    /// becomes an RPC session if the server answers the CONNECT with the
    /// agreed `200 Connected to RPC` status.
    pub async fn dial_http_path(addr: &str, path: &str, opt: Options) -> Result<Client> {
        let stream = Self::connect(addr, &opt).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let connect = format!("CONNECT {path} HTTP/1.0\r\n\r\n");
        write_half.write_all(connect.as_bytes()).await?;

        let mut status = String::new();
        if reader.read_line(&mut status).await? == 0 {
            return Err(RpcError::Connection(
                "server closed during HTTP handshake".to_string(),
            ));
        }
        let status = status.trim_end();
        let accepted = status
            .split_once(' ')
            .is_some_and(|(_, phrase)| phrase == CONNECTED_STATUS);
        if !accepted {
            return Err(RpcError::Connection(format!(
                "unexpected HTTP response: {status}"
            )));
        }
        // Drain the rest of the response head.
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Err(RpcError::Connection(
                    "server closed during HTTP handshake".to_string(),
                ));
            }
            if line.trim_end().is_empty() {
                break;
            }
        }

        Self::with_parts(reader, write_half, opt).await
    }

    async fn connect(addr: &str, opt: &Options) -> Result<TcpStream> {
        if opt.connect_timeout.is_zero() {
            return Ok(TcpStream::connect(addr).await?);
        }
        match tokio::time::timeout(opt.connect_timeout, TcpStream::connect(addr)).await {
            Ok(connected) => Ok(connected?),
            Err(_) => Err(RpcError::ConnectTimeout),
        }
    }

    /// Sends the option preamble, installs the codec and spawns the
    /// receiver task.
    async fn with_parts(
        reader: BufReader<OwnedReadHalf>,
        mut writer: OwnedWriteHalf,
        opt: Options,
    ) -> Result<Client> {
        let mut preamble = serde_json::to_vec(&opt)?;
        preamble.push(b'\n');
        writer.write_all(&preamble).await?;

        let (codec_reader, codec_writer) = opt.code_type.attach(reader, writer)?;
        let (close_tx, close_rx) = oneshot::channel();
        let inner = Arc::new(Inner {
            writer: Mutex::new(codec_writer),
            state: StdMutex::new(State {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
            close_signal: StdMutex::new(Some(close_tx)),
        });
        tokio::spawn(receive_loop(Arc::clone(&inner), codec_reader, close_rx));
        Ok(Client { inner })
    }

    /// Starts a call without waiting for it. The returned [`Call`] resolves
    /// once the reply (or a failure) arrives.
    pub async fn go<A: Serialize>(&self, service_method: &str, args: &A) -> Call {
        let (tx, rx) = oneshot::channel();
        let mut call = Call {
            seq: 0,
            service_method: service_method.to_string(),
            done: rx,
        };

        let body = match serde_json::to_value(args) {
            Ok(body) => body,
            Err(e) => {
                let _ = tx.send(Err(e.into()));
                return call;
            }
        };

        // Sending lock first; registration takes the state lock inside it.
        let mut writer = self.inner.writer.lock().await;
        let seq = {
            let mut state = self.inner.state.lock().unwrap();
            if state.closing || state.shutdown {
                drop(state);
                let _ = tx.send(Err(RpcError::Shutdown));
                return call;
            }
            let seq = state.seq;
            state.seq += 1;
            state.pending.insert(seq, tx);
            seq
        };
        call.seq = seq;

        let header = Header {
            service_method: call.service_method.clone(),
            seq,
            error: String::new(),
        };
        if let Err(e) = writer.write(&header, &body).await {
            // Nobody will ever answer this seq; fail it here.
            if let Some(tx) = self.remove_call(seq) {
                let _ = tx.send(Err(e));
            }
        }
        call
    }

    /// Invokes the named method and waits for it to complete.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.go(service_method, args).await.join().await
    }

    /// Like [`call`](Client::call) but gives up after `deadline`. A call
    /// that times out is removed from the pending table, so a late reply is
    /// drained and discarded instead of completing anything.
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
        let mut call = self.go(service_method, args).await;
        match tokio::time::timeout(deadline, call.wait_value()).await {
            Ok(body) => Ok(serde_json::from_value(body?)?),
            Err(_) => {
                self.remove_call(call.seq);
                Err(RpcError::DeadlineExceeded)
            }
        }
    }

    /// True while the client has neither been closed nor observed a fatal
    /// connection error.
    pub fn is_available(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        !state.closing && !state.shutdown
    }

    /// Closes the connection. Pending calls fail with a shutdown error; a
    /// second close reports that the client is already shutting down.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.closing {
                return Err(RpcError::Shutdown);
            }
            state.closing = true;
        }
        if let Some(signal) = self.inner.close_signal.lock().unwrap().take() {
            let _ = signal.send(());
        }
        self.inner.writer.lock().await.close().await;
        Ok(())
    }

    fn remove_call(&self, seq: u64) -> Option<oneshot::Sender<CallResult>> {
        self.inner.state.lock().unwrap().pending.remove(&seq)
    }
}

/// The receiver task: reads reply frames and completes pending calls until
/// the connection dies or the client is closed.
async fn receive_loop(
    inner: Arc<Inner>,
    mut reader: CodecReader,
    mut close_rx: oneshot::Receiver<()>,
) {
    let fatal = loop {
        let header = tokio::select! {
            _ = &mut close_rx => break RpcError::Shutdown,
            read = reader.read_header() => match read {
                Ok(header) => header,
                Err(e) => break e,
            },
        };

        let slot = inner.state.lock().unwrap().pending.remove(&header.seq);
        match slot {
            // The call was abandoned (deadline, or a write that partially
            // failed); the body still has to be drained to keep framing.
            None => {
                if let Err(e) = reader.read_body().await {
                    break e;
                }
            }
            Some(tx) if !header.error.is_empty() => {
                let drained = reader.read_body().await;
                let _ = tx.send(Err(RpcError::Remote(header.error)));
                if let Err(e) = drained {
                    break e;
                }
            }
            Some(tx) => match reader.read_body().await {
                Ok(body) => {
                    let _ = tx.send(Ok(body));
                }
                Err(e) => {
                    let _ = tx.send(Err(RpcError::Connection(format!("reading body: {e}"))));
                    break e;
                }
            },
        }
    };
    terminate(&inner, fatal).await;
}

/// The single place a client shuts down: marks the state, closes the wire
/// and fails every pending call exactly once.
async fn terminate(inner: &Arc<Inner>, fatal: RpcError) {
    // Same order as the send path: sending lock outside, state lock inside,
    // so no call can register between the drain and the shutdown flag.
    let mut writer = inner.writer.lock().await;
    writer.close().await;

    let mut state = inner.state.lock().unwrap();
    state.shutdown = true;
    let closed_by_user = matches!(fatal, RpcError::Shutdown);
    if !closed_by_user && !fatal.is_eof() {
        tracing::warn!("rpc client: connection lost: {}", fatal);
    }
    for (_, tx) in state.pending.drain() {
        let error = if closed_by_user {
            RpcError::Shutdown
        } else {
            RpcError::Connection(fatal.to_string())
        };
        let _ = tx.send(Err(error));
    }
}
