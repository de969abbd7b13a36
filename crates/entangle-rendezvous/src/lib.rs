//! Entangle Rendezvous
//!
//! The boundary between a pairing session and the peer-to-peer layer that
//! carries its messages:
//!
//! - **[`Rendezvous`]**: joins the channel identified by a [`RendezvousAddress`],
//!   authenticating the local end with a keypair. Every participant that joins
//!   the same address is announced to the others with [`TransportEvent::PeerSeen`].
//!
//! - **[`Transport`]**: the handle a session uses to send [`Message`]s to a
//!   specific peer and to leave the channel.
//!
//! - **[`MemoryRendezvous`]**: an in-process hub implementing both, used by the
//!   CLI demo and the test suites.
//!
//! Peer discovery, delivery and wire transport are the implementor's concern;
//! messages from one peer must be delivered in send order.

mod error;
mod memory;

use async_trait::async_trait;
use entangle_core::{Credential, Message, PeerAddress, RendezvousAddress};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use error::{RendezvousError, RendezvousResult};
pub use memory::MemoryRendezvous;

/// Inbound events delivered to a channel member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Another participant is present on the channel
    PeerSeen(PeerAddress),
    /// A message arrived from a participant
    Message { from: PeerAddress, message: Message },
    /// Connectivity problem reported by the transport
    Error(String),
}

/// Outbound half of a joined channel
#[async_trait]
pub trait Transport: Send + Sync {
    /// Address other peers use to reach this end
    fn local_peer(&self) -> &PeerAddress;

    /// Send a message to one peer on the channel
    async fn rpc(&self, peer: &PeerAddress, message: Message) -> RendezvousResult<()>;

    /// Leave the channel. Idempotent.
    async fn destroy(&self);
}

/// A joined rendezvous channel
pub struct Channel {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Entry point to the peer-to-peer layer
#[async_trait]
pub trait Rendezvous: Send + Sync {
    /// Join the channel at `address`, authenticated as `identity`
    async fn join(
        &self,
        address: &RendezvousAddress,
        identity: &Credential,
    ) -> RendezvousResult<Channel>;
}
