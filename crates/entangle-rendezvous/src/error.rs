//! Rendezvous error types

use thiserror::Error;

/// Errors raised by a rendezvous transport
#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error("Peer {0} is not on this channel")]
    PeerNotFound(String),

    #[error("Channel to peer {0} is closed")]
    ChannelClosed(String),

    #[error("Transport has been destroyed")]
    Destroyed,

    #[error("Hub state unavailable: {0}")]
    Hub(String),
}

pub type RendezvousResult<T> = Result<T, RendezvousError>;

impl From<RendezvousError> for entangle_core::Error {
    fn from(err: RendezvousError) -> Self {
        entangle_core::Error::Transport(err.to_string())
    }
}
