//! muxrpc Server Runtime
//!
//! This crate exposes user objects as callable RPC services and serves them
//! over any number of connections.
//!
//! # Overview
//!
//! A [`Service`] is built from a receiver value and a set of typed method
//! adapters; a [`Server`] holds registered services and runs the accept
//! loop. Each connection negotiates a codec through the session preamble,
//! then requests are dispatched concurrently: the request loop never waits
//! for a handler before reading the next header, and a per-session write
//! lock keeps response frames from interleaving on the wire.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use muxrpc_server::{Server, Service};
//! # use serde::{Deserialize, Serialize};
//! # #[derive(Deserialize)] struct Args { a: i32, b: i32 }
//! # #[derive(Serialize, Default)] struct Reply { sum: i32 }
//!
//! struct Arith;
//!
//! impl Arith {
//!     fn add(&self, args: Args, reply: &mut Reply) -> Result<(), String> {
//!         reply.sum = args.a + args.b;
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> muxrpc_common::Result<()> {
//! let server = Arc::new(Server::new());
//! server.register(Service::build("Arith", Arith).method("Add", Arith::add).finish())?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9999").await?;
//! server.accept(listener).await;
//! # Ok(())
//! # }
//! ```

mod http;
mod server;
mod service;

pub use server::Server;
pub use service::{Method, Service, ServiceBuilder};
