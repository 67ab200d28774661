//! muxrpc Client Runtime
//!
//! This crate holds everything the calling side needs:
//!
//! - [`Client`] - one connection, many concurrent in-flight calls matched
//!   to replies by sequence number
//! - [`Call`] - the handle to one in-flight request
//! - [`Discovery`] - enumerating candidate server addresses, either from a
//!   static list or refreshed from a registry
//! - [`XClient`] - a session-reusing layer that picks a replica per call or
//!   broadcasts to all of them
//!
//! # Example
//!
//! ```no_run
//! use muxrpc_client::Client;
//! use muxrpc_common::Options;
//! # use serde::{Deserialize, Serialize};
//! # #[derive(Serialize)] struct Args { a: i32, b: i32 }
//! # #[derive(Deserialize)] struct Reply { sum: i32 }
//!
//! # async fn run() -> muxrpc_common::Result<()> {
//! let client = Client::dial("127.0.0.1:9999", Options::default()).await?;
//! let reply: Reply = client.call("Arith.Add", &Args { a: 3, b: 4 }).await?;
//! assert_eq!(reply.sum, 7);
//! # Ok(())
//! # }
//! ```

mod call;
mod client;
mod discovery;
mod xclient;

pub use call::Call;
pub use client::Client;
pub use discovery::{Discovery, MultiServerDiscovery, RegistryDiscovery, SelectMode};
pub use xclient::XClient;
