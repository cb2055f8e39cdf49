use thiserror::Error;

use crate::instance::ConsoleError;

#[derive(Debug, Error)]
pub enum NetplayError {
    #[error("transport error: {0}")]
    Transport(#[from] dualis_transport::TransportError),

    #[error("protocol error: {0}")]
    Proto(#[from] dualis_netproto::ProtoError),

    #[error("console error: {0}")]
    Console(#[from] ConsoleError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("inputs not ready for the current frame")]
    InputNotReady,

    #[error("an instance worker failed; session aborted")]
    SessionPoisoned,

    #[error("ROM hash mismatch with the host")]
    RomHashMismatch,

    #[error("state sync failed: {0}")]
    SyncFailed(&'static str),

    #[error("session is not active")]
    NotActive,
}
