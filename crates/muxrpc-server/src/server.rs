//! The server: accept loop, per-connection sessions, request dispatch.

use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;

use muxrpc_common::codec::{CodecReader, CodecWriter};
use muxrpc_common::protocol::MAGIC_NUMBER;
use muxrpc_common::{Header, Options, Result, RpcError};

use crate::service::{is_exported, Method, Service};

/// An RPC server: a registry of services plus the machinery to serve them
/// over accepted connections.
pub struct Server {
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Server {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Publishes a service under its name.
    ///
    /// A name that is not an exported identifier is a hard error, and a
    /// second registration under an existing name fails with
    /// `service already defined` while the first registration stays intact.
    ///
    /// # Arguments
    /// * `service` - A built [`Service`], see [`Service::build`]
    pub fn register(&self, service: Service) -> Result<()> {
        if !is_exported(service.name()) {
            return Err(RpcError::InvalidServiceName(service.name().to_string()));
        }
        let mut services = self.services.write().unwrap();
        match services.entry(service.name().to_string()) {
            Entry::Occupied(_) => Err(RpcError::ServiceAlreadyDefined(service.name().to_string())),
            Entry::Vacant(slot) => {
                tracing::info!("rpc server: registered service {}", service.name());
                slot.insert(Arc::new(service));
                Ok(())
            }
        }
    }

    /// Looks up `Service.Method`. Failures come back as the error text to
    /// put on the offending request's response header; they never tear the
    /// session down.
    fn find_method(&self, service_method: &str) -> std::result::Result<Arc<Method>, String> {
        let Some((service_name, method_name)) = service_method.rsplit_once('.') else {
            return Err(format!(
                "rpc server: service/method request ill-formed: {service_method}"
            ));
        };
        let services = self.services.read().unwrap();
        let service = services
            .get(service_name)
            .ok_or_else(|| format!("rpc server: can't find service {service_method}"))?;
        service
            .method(method_name)
            .ok_or_else(|| format!("rpc server: can't find method {service_method}"))
    }

    /// Snapshot of registered services in name order, for the debug page.
    pub(crate) fn service_snapshot(&self) -> Vec<Arc<Service>> {
        let services = self.services.read().unwrap();
        let mut all: Vec<Arc<Service>> = services.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Accepts connections on the listener and serves each in its own task.
    /// Accept errors are logged and do not terminate the loop.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!("rpc server: connection established from {}", peer);
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.serve_conn(stream).await;
                    });
                }
                Err(e) => tracing::warn!("rpc server: accept: {}", e),
            }
        }
    }

    /// Serves a single established connection until the client hangs up.
    pub async fn serve_conn(self: Arc<Self>, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        self.serve_stream(BufReader::new(read_half), write_half)
            .await;
    }

    /// Runs the session on a stream whose preamble has not been read yet.
    /// The reader may already hold buffered bytes (the HTTP CONNECT bridge
    /// hands over its buffer here).
    pub(crate) async fn serve_stream(
        self: Arc<Self>,
        mut reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    ) {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("rpc server: reading option preamble: {}", e);
                return;
            }
        }
        let opt: Options = match serde_json::from_str(line.trim_end()) {
            Ok(opt) => opt,
            Err(e) => {
                tracing::warn!("rpc server: invalid option preamble: {}", e);
                return;
            }
        };
        if opt.magic_number != MAGIC_NUMBER {
            tracing::warn!("rpc server: unknown magic number {:#x}", opt.magic_number);
            return;
        }
        let (codec_reader, codec_writer) = match opt.code_type.attach(reader, writer) {
            Ok(halves) => halves,
            Err(e) => {
                tracing::warn!("rpc server: {}", e);
                return;
            }
        };
        self.serve_codec(codec_reader, codec_writer, &opt).await;
    }

    /// The request loop. Handlers run concurrently; the loop only reads.
    /// When the stream dies, in-flight handlers are drained before the
    /// codec is closed.
    async fn serve_codec(
        self: Arc<Self>,
        mut reader: CodecReader,
        writer: CodecWriter,
        opt: &Options,
    ) {
        let writer = Arc::new(Mutex::new(writer));
        let mut handlers = JoinSet::new();

        loop {
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(e) => {
                    if !e.is_eof() {
                        tracing::warn!("rpc server: reading header: {}", e);
                    }
                    break;
                }
            };

            let method = match self.find_method(&header.service_method) {
                Ok(method) => method,
                Err(message) => {
                    // The body still has to be consumed to keep framing.
                    if reader.read_body().await.is_err() {
                        break;
                    }
                    let mut response = header;
                    response.error = message;
                    send_response(&writer, &response, &Value::Null).await;
                    continue;
                }
            };

            let body = match reader.read_body().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!("rpc server: reading body: {}", e);
                    break;
                }
            };

            handlers.spawn(handle_request(
                method,
                header,
                body,
                Arc::clone(&writer),
                opt.handle_timeout,
            ));
        }

        while handlers.join_next().await.is_some() {}
        writer.lock().await.close().await;
    }
}

/// Runs one request to completion and writes exactly one response, on every
/// path: success, method error, panic, or handler timeout.
async fn handle_request(
    method: Arc<Method>,
    mut header: Header,
    body: Value,
    writer: Arc<Mutex<CodecWriter>>,
    timeout: Duration,
) {
    let (done_tx, done_rx) = oneshot::channel();
    let invoked = Arc::clone(&method);
    tokio::task::spawn_blocking(move || {
        let _ = done_tx.send(invoked.call(body));
    });

    let outcome = if timeout.is_zero() {
        done_rx.await.ok()
    } else {
        tokio::select! {
            outcome = done_rx => outcome.ok(),
            _ = tokio::time::sleep(timeout) => {
                // The method keeps running in the background, but its result
                // is discarded: this response is the only one written.
                header.error =
                    format!("rpc server: request handle timeout: expect within {:?}", timeout);
                send_response(&writer, &header, &Value::Null).await;
                return;
            }
        }
    };

    match outcome {
        Some(Ok(reply)) => send_response(&writer, &header, &reply).await,
        Some(Err(message)) => {
            header.error = message;
            send_response(&writer, &header, &Value::Null).await;
        }
        None => {
            tracing::warn!("rpc server: method {} panicked", method.name());
            header.error = format!("rpc server: method {} aborted", method.name());
            send_response(&writer, &header, &Value::Null).await;
        }
    }
}

/// Responses share the session's write lock so header+body pairs never
/// interleave on the wire.
async fn send_response(writer: &Arc<Mutex<CodecWriter>>, header: &Header, body: &Value) {
    let mut writer = writer.lock().await;
    if let Err(e) = writer.write(header, body).await {
        tracing::warn!("rpc server: writing response: {}", e);
    }
}
