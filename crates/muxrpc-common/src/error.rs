use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unknown codec kind: {0}")]
    UnknownCodec(String),

    #[error("rpc: connect timeout")]
    ConnectTimeout,

    #[error("rpc: call deadline exceeded")]
    DeadlineExceeded,

    #[error("connection is shut down")]
    Shutdown,

    #[error("connection error: {0}")]
    Connection(String),

    /// An error reported by the remote end on a response header. The message
    /// is carried verbatim, including server-side dispatch failures and
    /// handler timeouts.
    #[error("{0}")]
    Remote(String),

    #[error("rpc: service already defined: {0}")]
    ServiceAlreadyDefined(String),

    #[error("rpc server: {0} is not a valid service name")]
    InvalidServiceName(String),

    #[error("rpc discovery: no available servers")]
    NoAvailableServers,

    #[error("registry error: {0}")]
    Registry(String),
}

impl RpcError {
    /// True when the error is an orderly end-of-stream from the peer, which
    /// sessions treat as a normal hangup rather than a failure worth logging.
    pub fn is_eof(&self) -> bool {
        matches!(self, RpcError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
