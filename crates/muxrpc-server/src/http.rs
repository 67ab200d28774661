//! HTTP side door: CONNECT upgrade to the RPC protocol, plus a plain-text
//! debug page.
//!
//! The bridge speaks just enough HTTP/1.0 by hand: it reads one request
//! head off the raw stream, answers the status line, and for a CONNECT on
//! the RPC path hands the (still buffered) stream over to the normal
//! session path. Everything after the `200 Connected to RPC` status line is
//! the RPC protocol.

use std::fmt::Write as _;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use muxrpc_common::protocol::{CONNECTED_STATUS, DEFAULT_DEBUG_PATH, DEFAULT_RPC_PATH};

use crate::server::Server;

impl Server {
    /// Accepts connections and serves each through the HTTP bridge on the
    /// default RPC path.
    pub async fn accept_http(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!("rpc server: http connection from {}", peer);
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.serve_http_conn(stream, DEFAULT_RPC_PATH).await;
                    });
                }
                Err(e) => tracing::warn!("rpc server: accept: {}", e),
            }
        }
    }

    /// Handles one HTTP connection: a CONNECT on `rpc_path` upgrades to the
    /// RPC protocol, a GET on the debug path returns the service listing,
    /// anything else is answered 405.
    pub async fn serve_http_conn(self: Arc<Self>, stream: TcpStream, rpc_path: &str) {
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut writer = write_half;

        let mut request_line = String::new();
        match reader.read_line(&mut request_line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        // Drain the rest of the request head.
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) if line.trim_end().is_empty() => break,
                Ok(_) => {}
            }
        }

        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or("");
        let path = parts.next().unwrap_or("");

        match (method, path) {
            ("CONNECT", p) if p == rpc_path => {
                let status = format!("HTTP/1.0 {CONNECTED_STATUS}\r\n\r\n");
                if writer.write_all(status.as_bytes()).await.is_err() {
                    return;
                }
                self.serve_stream(reader, writer).await;
            }
            ("GET", p) if p == DEFAULT_DEBUG_PATH => {
                let body = self.debug_page();
                let response = format!(
                    "HTTP/1.0 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = writer.write_all(response.as_bytes()).await;
            }
            _ => {
                let _ = writer
                    .write_all(
                        b"HTTP/1.0 405 Method Not Allowed\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n405 must CONNECT\n",
                    )
                    .await;
            }
        }
    }

    /// Plain-text listing of registered services, methods and call counts.
    fn debug_page(&self) -> String {
        let mut page = String::from("muxrpc services\n\n");
        for service in self.service_snapshot() {
            for name in service.method_names() {
                if let Some(method) = service.method(name) {
                    let _ = writeln!(page, "{}: {} calls", method.name(), method.num_calls());
                }
            }
        }
        page
    }
}
