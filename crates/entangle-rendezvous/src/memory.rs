//! In-process rendezvous hub
//!
//! Every [`MemoryRendezvous`] clone shares one table of channels keyed by
//! rendezvous address. Members are identified by their keypair's public key.

use crate::error::{RendezvousError, RendezvousResult};
use crate::{Channel, Rendezvous, Transport, TransportEvent};
use async_trait::async_trait;
use entangle_core::{Credential, Message, PeerAddress, RendezvousAddress};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

type Members = HashMap<PeerAddress, mpsc::UnboundedSender<TransportEvent>>;

/// Rendezvous hub that connects sessions living in the same process
#[derive(Clone, Default)]
pub struct MemoryRendezvous {
    channels: Arc<Mutex<HashMap<RendezvousAddress, Members>>>,
}

impl MemoryRendezvous {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members currently on the channel at `address`
    pub fn peer_count(&self, address: &RendezvousAddress) -> usize {
        self.channels
            .lock()
            .ok()
            .and_then(|channels| channels.get(address).map(HashMap::len))
            .unwrap_or(0)
    }

    fn sender_for(
        &self,
        address: &RendezvousAddress,
        peer: &PeerAddress,
    ) -> RendezvousResult<mpsc::UnboundedSender<TransportEvent>> {
        let channels = self
            .channels
            .lock()
            .map_err(|e| RendezvousError::Hub(e.to_string()))?;
        channels
            .get(address)
            .and_then(|members| members.get(peer))
            .cloned()
            .ok_or_else(|| RendezvousError::PeerNotFound(peer.to_string()))
    }

    fn leave(&self, address: &RendezvousAddress, peer: &PeerAddress) {
        if let Ok(mut channels) = self.channels.lock() {
            if let Some(members) = channels.get_mut(address) {
                members.remove(peer);
                if members.is_empty() {
                    channels.remove(address);
                }
            }
        }
        debug!("Rendezvous {}: peer {} left", short(address.as_str()), short(peer.as_str()));
    }
}

#[async_trait]
impl Rendezvous for MemoryRendezvous {
    async fn join(
        &self,
        address: &RendezvousAddress,
        identity: &Credential,
    ) -> RendezvousResult<Channel> {
        let peer = PeerAddress::new(identity.public_key());
        let (tx, rx) = mpsc::unbounded_channel();

        let existing: Vec<(PeerAddress, mpsc::UnboundedSender<TransportEvent>)> = {
            let mut channels = self
                .channels
                .lock()
                .map_err(|e| RendezvousError::Hub(e.to_string()))?;
            let members = channels.entry(address.clone()).or_default();
            let existing = members
                .iter()
                .filter(|(other, _)| **other != peer)
                .map(|(other, sender)| (other.clone(), sender.clone()))
                .collect();
            members.insert(peer.clone(), tx.clone());
            existing
        };

        // Announce both directions so each side learns about the other
        for (other, sender) in existing {
            if sender.send(TransportEvent::PeerSeen(peer.clone())).is_err() {
                debug!("Rendezvous: peer {} no longer listening", short(other.as_str()));
            }
            let _ = tx.send(TransportEvent::PeerSeen(other));
        }

        info!(
            "Rendezvous {}: joined as {}",
            short(address.as_str()),
            short(peer.as_str())
        );

        let transport = MemoryTransport {
            hub: self.clone(),
            address: address.clone(),
            peer,
            destroyed: AtomicBool::new(false),
        };

        Ok(Channel {
            transport: Arc::new(transport),
            events: rx,
        })
    }
}

/// One member's handle onto a [`MemoryRendezvous`] channel
struct MemoryTransport {
    hub: MemoryRendezvous,
    address: RendezvousAddress,
    peer: PeerAddress,
    destroyed: AtomicBool,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer(&self) -> &PeerAddress {
        &self.peer
    }

    async fn rpc(&self, peer: &PeerAddress, message: Message) -> RendezvousResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(RendezvousError::Destroyed);
        }

        let sender = self.hub.sender_for(&self.address, peer)?;
        debug!(
            "Rendezvous: {} -> {} ({})",
            short(self.peer.as_str()),
            short(peer.as_str()),
            message.name()
        );
        sender
            .send(TransportEvent::Message {
                from: self.peer.clone(),
                message,
            })
            .map_err(|_| RendezvousError::ChannelClosed(peer.to_string()))
    }

    async fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.hub.leave(&self.address, &self.peer);
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.hub.leave(&self.address, &self.peer);
        }
    }
}

/// First 12 chars of an address, for logs
fn short(s: &str) -> &str {
    s.get(..12).unwrap_or(s)
}
