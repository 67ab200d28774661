//! Shared fixtures: an arithmetic service and server starters.
#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use muxrpc_server::{Server, Service};

#[derive(Serialize, Deserialize)]
pub struct Args {
    pub a: i32,
    pub b: i32,
}

#[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
pub struct Reply {
    pub val: i32,
}

#[derive(Serialize, Deserialize)]
pub struct SleepArgs {
    pub ms: u64,
}

#[derive(Serialize, Deserialize)]
pub struct Empty {}

/// The test receiver; `tag` identifies which server instance answered.
pub struct Arith {
    pub tag: i32,
}

impl Arith {
    pub fn add(&self, args: Args, reply: &mut Reply) -> Result<(), String> {
        reply.val = args.a + args.b;
        Ok(())
    }

    pub fn sleep(&self, args: SleepArgs, reply: &mut Reply) -> Result<(), String> {
        std::thread::sleep(Duration::from_millis(args.ms));
        reply.val = self.tag;
        Ok(())
    }

    pub fn which(&self, _args: Empty, reply: &mut Reply) -> Result<(), String> {
        reply.val = self.tag;
        Ok(())
    }

    pub fn fail(&self, _args: Empty, _reply: &mut Reply) -> Result<(), String> {
        Err("synthetic failure".to_string())
    }
}

pub fn arith_service(tag: i32) -> Service {
    Service::build("Arith", Arith { tag })
        .method("Add", Arith::add)
        .method("Sleep", Arith::sleep)
        .method("Which", Arith::which)
        .method("Fail", Arith::fail)
        .finish()
}

/// Starts a server with one registered service and returns its address.
pub async fn start_server_with(service: Service) -> String {
    let server = Arc::new(Server::new());
    server.register(service).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(server.accept(listener));
    addr
}

pub async fn start_arith(tag: i32) -> String {
    start_server_with(arith_service(tag)).await
}
