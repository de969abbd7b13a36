//! Entangle Core - Shared types and wire definitions
//!
//! This crate provides the foundational types used across all Entangle components:
//! session configuration, rendezvous/peer addresses, the transferable credential,
//! and the messages exchanged between an issuer and a requester.

pub mod config;
pub mod credential;
pub mod error;
pub mod protocol;

pub use config::{Algorithm, MatchRule, SessionConfig};
pub use credential::Credential;
pub use error::{Error, Result};
pub use protocol::{Message, PeerAddress, Rejection, RejectionCode, RendezvousAddress};
