use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("port {0} out of range (must be 1024..=65535)")]
    InvalidPort(u16),

    #[error("could not resolve address {0}")]
    BadAddress(String),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("transport not started")]
    NotStarted,

    #[error("transport already started")]
    AlreadyStarted,

    #[error("no peer at index {0}")]
    NoSuchPeer(usize),

    #[error("no free peer slot")]
    PeersFull,

    #[error("payload too large: {0}")]
    PayloadTooLarge(usize),
}
