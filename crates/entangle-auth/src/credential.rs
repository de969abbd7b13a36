//! Keypair generation

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_dalek::SigningKey;
use entangle_core::{Credential, Result};
use rand::rngs::OsRng;

/// Produces keypairs: the long-lived credential an issuer hands out, and the
/// throwaway identity a requester uses on the rendezvous channel.
pub trait CredentialSuite: Send + Sync {
    fn generate_keypair(&self) -> Result<Credential>;
}

/// Ed25519 keypairs, both halves base64url without padding
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Suite;

impl CredentialSuite for Ed25519Suite {
    fn generate_keypair(&self) -> Result<Credential> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes());
        let secret_key = URL_SAFE_NO_PAD.encode(signing_key.to_bytes());
        Ok(Credential::new(public_key, secret_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, Verifier, VerifyingKey};

    #[test]
    fn test_keypairs_are_distinct() {
        let first = Ed25519Suite.generate_keypair().unwrap();
        let second = Ed25519Suite.generate_keypair().unwrap();
        assert_ne!(first.public_key(), second.public_key());
        assert_eq!(first.public_key().len(), 43);
    }

    #[test]
    fn test_keypair_halves_belong_together() {
        let credential = Ed25519Suite.generate_keypair().unwrap();

        let secret: [u8; 32] = URL_SAFE_NO_PAD
            .decode(credential.secret_key())
            .unwrap()
            .try_into()
            .unwrap();
        let public: [u8; 32] = URL_SAFE_NO_PAD
            .decode(credential.public_key())
            .unwrap()
            .try_into()
            .unwrap();

        let signing_key = SigningKey::from_bytes(&secret);
        let verifying_key = VerifyingKey::from_bytes(&public).unwrap();
        let signature = signing_key.sign(b"pairing");
        assert!(verifying_key.verify(b"pairing", &signature).is_ok());
    }
}
