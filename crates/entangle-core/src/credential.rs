//! The long-lived keypair handed to a requester once pairing succeeds

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque keypair.
///
/// Entangle never inspects or mutates the key material; the issuer forwards
/// it once, inside an `accepted` message.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Public half, in its canonical string form
    public_key: String,
    /// Private half, encoded by the suite that produced it
    secret_key: String,
}

impl Credential {
    pub fn new(public_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secret() {
        let credential = Credential::new("pub", "very-secret");
        let debug = format!("{:?}", credential);
        assert!(debug.contains("pub"));
        assert!(!debug.contains("very-secret"));
    }
}
