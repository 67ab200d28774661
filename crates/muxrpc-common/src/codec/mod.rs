//! muxrpc Codec Layer
//!
//! A codec turns a byte stream into framed header+body messages. The kind of
//! codec is negotiated once per connection through the [`Options`] preamble
//! and constructed here via [`CodecKind::attach`].
//!
//! # Framing Contract
//!
//! Reads consume exactly one header then exactly one body. A write emits the
//! header, then the body, then flushes the underlying buffer as a single
//! unit before returning; on failure the writer shuts the stream down (best
//! effort) so the peer observes end-of-stream rather than a torn frame.
//!
//! # Concurrency Contract
//!
//! The codec is split into a read half and a write half. Reads are
//! serialized by being performed from a single receiver task that owns the
//! [`CodecReader`]; writes are mutually exclusive because every sender goes
//! through one lock around the [`CodecWriter`].
//!
//! [`Options`]: crate::protocol::Options

mod json;

pub use json::{JsonCodecReader, JsonCodecWriter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::{Result, RpcError};
use crate::protocol::Header;

/// Names a body encoding. The string form is what travels in the session
/// preamble.
///
/// Only the JSON codec is implemented; `application/gob` is reserved and a
/// preamble selecting it terminates the session before any request is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecKind {
    #[serde(rename = "application/json")]
    Json,
    #[serde(rename = "application/gob")]
    Gob,
}

impl CodecKind {
    /// Constructs the codec halves for this kind over an established stream.
    ///
    /// The read side takes an already-buffered reader so callers that have
    /// consumed a preamble (or an HTTP CONNECT exchange) from the same buffer
    /// lose no bytes when framing starts.
    pub fn attach(
        self,
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    ) -> Result<(CodecReader, CodecWriter)> {
        match self {
            CodecKind::Json => Ok((
                CodecReader::Json(JsonCodecReader::new(reader)),
                CodecWriter::Json(JsonCodecWriter::new(writer)),
            )),
            CodecKind::Gob => Err(RpcError::UnknownCodec("application/gob".to_string())),
        }
    }
}

/// Read half of a negotiated codec. Owned by the session's receiver task.
#[derive(Debug)]
pub enum CodecReader {
    Json(JsonCodecReader),
}

impl CodecReader {
    /// Reads the next message header.
    pub async fn read_header(&mut self) -> Result<Header> {
        match self {
            CodecReader::Json(c) => c.read_header().await,
        }
    }

    /// Reads the body following a header, as one untyped value. Callers
    /// materialize it into a concrete type, or drop it to drain a body that
    /// has no destination.
    pub async fn read_body(&mut self) -> Result<Value> {
        match self {
            CodecReader::Json(c) => c.read_body().await,
        }
    }
}

/// Write half of a negotiated codec. Senders serialize on a lock around it.
#[derive(Debug)]
pub enum CodecWriter {
    Json(JsonCodecWriter),
}

impl CodecWriter {
    /// Writes one header+body pair and flushes it as a single unit.
    pub async fn write(&mut self, header: &Header, body: &Value) -> Result<()> {
        match self {
            CodecWriter::Json(c) => c.write(header, body).await,
        }
    }

    /// Shuts the stream down, best effort.
    pub async fn close(&mut self) {
        match self {
            CodecWriter::Json(c) => c.close().await,
        }
    }
}
