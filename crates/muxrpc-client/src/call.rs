//! The handle to one in-flight call.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;

use muxrpc_common::{Result, RpcError};

pub(crate) type CallResult = Result<Value>;

/// An active RPC started with [`Client::go`](crate::Client::go).
///
/// Completion arrives through a one-shot slot, so a call is signalled at
/// most once by construction; if the handle has been dropped the late
/// result is discarded without anyone noticing.
pub struct Call {
    /// Sequence number this call was registered under, 0 when registration
    /// itself failed.
    pub seq: u64,
    /// Addressed method, `Service.Method`.
    pub service_method: String,
    pub(crate) done: oneshot::Receiver<CallResult>,
}

impl Call {
    /// Waits for the reply and decodes it into `R`.
    pub async fn join<R: DeserializeOwned>(mut self) -> Result<R> {
        let body = self.wait_value().await?;
        Ok(serde_json::from_value(body)?)
    }

    /// Waits for the raw reply body. Usable behind `&mut` so callers can
    /// race it against a deadline and still keep the handle.
    pub(crate) async fn wait_value(&mut self) -> CallResult {
        match (&mut self.done).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Shutdown),
        }
    }
}
