//! Rendezvous addressing and the messages exchanged between peers

use crate::credential::Credential;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hex-encoded SHA-256 digest both roles compute to find each other
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RendezvousAddress(String);

impl RendezvousAddress {
    /// Wrap an already computed hex digest
    pub fn new(hex_digest: impl Into<String>) -> Self {
        Self(hex_digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RendezvousAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of one participant on a rendezvous channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status code attached to a rejected challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum RejectionCode {
    /// Wrong passcode; the requester may try again
    Unauthorized,
    /// Too many failed attempts from this peer
    Forbidden,
    /// The peer's pairing window has elapsed
    Timeout,
}

impl RejectionCode {
    pub fn as_u16(self) -> u16 {
        match self {
            RejectionCode::Unauthorized => 401,
            RejectionCode::Forbidden => 403,
            RejectionCode::Timeout => 408,
        }
    }

    /// Whether the requester session must be torn down after this rejection
    pub fn is_terminal(self) -> bool {
        !matches!(self, RejectionCode::Unauthorized)
    }
}

impl From<RejectionCode> for u16 {
    fn from(code: RejectionCode) -> Self {
        code.as_u16()
    }
}

impl TryFrom<u16> for RejectionCode {
    type Error = String;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            401 => Ok(RejectionCode::Unauthorized),
            403 => Ok(RejectionCode::Forbidden),
            408 => Ok(RejectionCode::Timeout),
            other => Err(format!("Unknown rejection code: {}", other)),
        }
    }
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Structured rejection sent back to a requester
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub code: RejectionCode,
    pub reason: String,
}

impl Rejection {
    pub fn new(code: RejectionCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(RejectionCode::Unauthorized, "Not authorized")
    }

    pub fn locked_out() -> Self {
        Self::new(RejectionCode::Forbidden, "Too many failed attempts")
    }

    pub fn timed_out() -> Self {
        Self::new(RejectionCode::Timeout, "Pairing window expired")
    }

    pub fn is_terminal(&self) -> bool {
        self.code.is_terminal()
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

/// Messages carried between peers over the rendezvous channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Requester proves knowledge of PIN + token (transport-encoded)
    Challenge { passcode: String },
    /// Issuer releases the credential
    Accepted { credential: Credential },
    /// Issuer refuses the challenge
    Rejected { rejection: Rejection },
}

impl Message {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Message::Challenge { .. } => "challenge",
            Message::Accepted { .. } => "accepted",
            Message::Rejected { .. } => "rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_code_wire_format() {
        let rejection = Rejection::locked_out();
        let json = serde_json::to_value(&rejection).unwrap();
        assert_eq!(json["code"], 403);

        let parsed: Rejection =
            serde_json::from_str(r#"{"code":408,"reason":"late"}"#).unwrap();
        assert_eq!(parsed.code, RejectionCode::Timeout);
        assert!(parsed.is_terminal());
    }

    #[test]
    fn test_unknown_rejection_code() {
        let parsed = serde_json::from_str::<Rejection>(r#"{"code":500,"reason":"?"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_only_unauthorized_is_recoverable() {
        assert!(!RejectionCode::Unauthorized.is_terminal());
        assert!(RejectionCode::Forbidden.is_terminal());
        assert!(RejectionCode::Timeout.is_terminal());
    }

    #[test]
    fn test_message_tagging() {
        let message = Message::Challenge {
            passcode: "MTIzNA==".to_string(),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(json, r#"{"type":"challenge","passcode":"MTIzNA=="}"#);
        assert_eq!(message.name(), "challenge");
    }
}
