//! Entangle Auth - Device pairing with PIN + TOTP challenges
//!
//! An issuer holding a credential publishes provisioning info (QR code /
//! otpauth URI) for an authenticator app. A requester that knows the issuer's
//! identity types the PIN followed by the current token; if they match, the
//! issuer hands over the credential over a rendezvous channel.

pub mod credential;
pub mod directory;
pub mod events;
pub mod identity;
pub mod ledger;
pub mod provisioning;
pub mod secret;
pub mod session;
pub mod ticker;

pub use credential::{CredentialSuite, Ed25519Suite};
pub use directory::DirectoryStore;
pub use events::{EventEmitter, EventKind, SessionError, SessionEvent};
pub use identity::{address_for_key, resolve, Directory, DirectoryRecord, Identity};
pub use ledger::{AttemptLedger, AttemptRecord};
pub use provisioning::ProvisioningInfo;
pub use secret::{current_token, decode_passcode, encode_passcode, transcode, TokenProvider};
pub use session::{Collaborators, PairingSession, Role, SessionId};
pub use ticker::TokenTicker;
