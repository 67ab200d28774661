//! muxrpc Protocol Types
//!
//! This module defines the session preamble and the per-message header that
//! both ends of a connection exchange, plus the constants of the external
//! HTTP interfaces (CONNECT upgrade paths and registry header names).
//!
//! # Session Preamble
//!
//! The client sends exactly one JSON-encoded [`Options`] object immediately
//! after connecting, before any framed message. The server validates the
//! magic number and the codec kind, then switches to codec framing for the
//! rest of the connection. Timeout fields travel as integer nanoseconds.
//!
//! # Message Header
//!
//! Every framed message starts with a [`Header`]. On a request the `error`
//! field is empty; on a response the header echoes the request's `seq` and
//! `service_method`, and a non-empty `error` marks a failed call.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::codec::CodecKind;

/// Marks a connection as speaking the muxrpc protocol. A session whose
/// preamble carries any other value is closed before reading requests.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Default path served by the HTTP CONNECT bridge.
pub const DEFAULT_RPC_PATH: &str = "/_rpc_";

/// Default path of the plain-text debug page.
pub const DEFAULT_DEBUG_PATH: &str = "/debug/rpc";

/// Status phrase the server answers a successful CONNECT with. The full
/// status line on the wire is `HTTP/1.0 200 Connected to RPC`.
pub const CONNECTED_STATUS: &str = "200 Connected to RPC";

/// Response header carrying the comma-separated list of alive servers.
pub const X_RPC_SERVERS: &str = "X-rpc-Servers";

/// Request header naming the server address a heartbeat renews.
pub const X_RPC_SERVER: &str = "X-rpc-Server";

/// Immutable per-connection configuration, negotiated once at session start.
///
/// Sent by the client as a single JSON object before any framed message.
/// Field names and the nanosecond duration encoding are fixed by the wire
/// protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Must equal [`MAGIC_NUMBER`].
    #[serde(rename = "MagicNumber")]
    pub magic_number: u32,
    /// Body encoding for every framed message on this connection.
    #[serde(rename = "CodeType")]
    pub code_type: CodecKind,
    /// Client-side dial budget. Zero means no limit.
    #[serde(rename = "ConnectionTimeout", with = "duration_nanos")]
    pub connect_timeout: Duration,
    /// Server-side per-request budget. Zero means no limit.
    #[serde(rename = "HandleTimeout", with = "duration_nanos")]
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            magic_number: MAGIC_NUMBER,
            code_type: CodecKind::Json,
            connect_timeout: Duration::from_secs(10),
            handle_timeout: Duration::ZERO,
        }
    }
}

impl Options {
    /// Sets the client-side dial budget.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the server-side per-request budget.
    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = timeout;
        self
    }

    /// Selects the body encoding for the connection.
    pub fn with_codec(mut self, kind: CodecKind) -> Self {
        self.code_type = kind;
        self
    }
}

/// Header of one framed message, in either direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Addressed method, in the form `Service.Method`.
    #[serde(rename = "ServiceMethod")]
    pub service_method: String,
    /// Per-client monotonically increasing request identifier, starting at 1.
    #[serde(rename = "Seq")]
    pub seq: u64,
    /// Empty on requests and successful responses.
    #[serde(rename = "Error", default)]
    pub error: String,
}

/// Durations travel as integer nanoseconds on the wire.
mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}
