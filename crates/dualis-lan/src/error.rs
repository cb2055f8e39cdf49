use thiserror::Error;

#[derive(Debug, Error)]
pub enum LanError {
    #[error("transport error: {0}")]
    Transport(#[from] dualis_transport::TransportError),

    #[error("protocol error: {0}")]
    Proto(#[from] dualis_netproto::ProtoError),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("handshake rejected: {0}")]
    HandshakeRejected(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("session is not active")]
    NotActive,
}
