//! muxrpc Common Types, Wire Protocol and Codec Layer
//!
//! This crate provides the shared protocol definitions and the framing layer
//! for the muxrpc RPC runtime.
//!
//! # Overview
//!
//! muxrpc is a from-scratch RPC runtime: a client invokes methods registered
//! on a remote server over a reliable, ordered byte stream (TCP by default),
//! with many in-flight calls multiplexed over one connection. This crate
//! contains everything both ends agree on:
//!
//! - **Protocol Layer**: the session [`Options`] preamble (magic number plus
//!   codec negotiation), the per-message [`Header`], and the registry header
//!   names.
//! - **Codec Layer**: pluggable per-connection encodings. A connection is
//!   negotiated once, then carries framed header+body messages in both
//!   directions.
//!
//! # Wire Format
//!
//! A connection starts with exactly one JSON-encoded [`Options`] object sent
//! by the client. After that every message is one encoded [`Header`]
//! followed by one encoded body value, in the codec's native framing. The
//! JSON codec frames with newline-delimited JSON values.
//!
//! # Components
//!
//! - [`protocol`] - `Options`, `Header`, protocol constants
//! - [`codec`] - `CodecKind` and the split reader/writer codec halves
//! - [`error`] - the shared [`RpcError`] type

pub mod codec;
pub mod error;
pub mod protocol;

pub use codec::{CodecKind, CodecReader, CodecWriter};
pub use error::{Result, RpcError};
pub use protocol::{Header, Options, MAGIC_NUMBER};
