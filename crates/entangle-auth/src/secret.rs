//! Shared secrets, time-based tokens and passcode transport encoding
//!
//! Hashing follows one canonical form everywhere: SHA-256 over the JSON string
//! encoding of the input (quotes included), rendered as lowercase hex. Both the
//! rendezvous address and passphrase-derived secrets are built from it, so two
//! independent implementations agree bit for bit.

use base32::Alphabet;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use entangle_core::{Algorithm, Error, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use totp_rs::{Secret, TOTP};

/// Hash a string in canonical form
pub fn sha256_hex(value: &str) -> String {
    let canonical = serde_json::Value::String(value.to_owned()).to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derive a base32 TOTP secret from a passphrase, or generate a random one
pub fn derive_secret(passphrase: Option<&str>) -> String {
    match passphrase {
        Some(passphrase) => base32::encode(
            Alphabet::Rfc4648 { padding: true },
            sha256_hex(passphrase).as_bytes(),
        ),
        None => generate_secret(),
    }
}

/// Random base32 secret from the TOTP generator
pub fn generate_secret() -> String {
    match Secret::generate_secret().to_encoded() {
        Secret::Encoded(encoded) => encoded,
        Secret::Raw(bytes) => base32::encode(Alphabet::Rfc4648 { padding: false }, &bytes),
    }
}

fn decode_secret(secret: &str) -> Result<Vec<u8>> {
    let normalized = secret.trim_end_matches('=').to_ascii_uppercase();
    base32::decode(Alphabet::Rfc4648 { padding: false }, &normalized)
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| Error::Token("secret is not valid base32".into()))
}

fn totp_algorithm(algorithm: Algorithm) -> totp_rs::Algorithm {
    match algorithm {
        Algorithm::Sha1 => totp_rs::Algorithm::SHA1,
        Algorithm::Sha256 => totp_rs::Algorithm::SHA256,
        Algorithm::Sha512 => totp_rs::Algorithm::SHA512,
    }
}

/// Wall-clock time since the Unix epoch
pub(crate) fn unix_now() -> Result<Duration> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Token(e.to_string()))
}

/// Produces tokens for one secret/period/digits/algorithm combination.
///
/// Stateless apart from its parameters: the token is a function of wall-clock
/// time only, and no clock skew is tolerated, so a token from the previous
/// period never matches.
#[derive(Debug, Clone)]
pub struct TokenProvider {
    totp: TOTP,
    period: u64,
}

impl TokenProvider {
    pub fn new(secret: &str, period: u64, digits: u32, algorithm: Algorithm) -> Result<Self> {
        if period == 0 {
            return Err(Error::Config("period must be greater than zero".into()));
        }
        let bytes = decode_secret(secret)?;
        let totp = TOTP::new_unchecked(
            totp_algorithm(algorithm),
            digits as usize,
            0,
            period,
            bytes,
            None,
            String::new(),
        );
        Ok(Self { totp, period })
    }

    /// Token for the current period
    pub fn current(&self) -> Result<String> {
        Ok(self.at(unix_now()?.as_secs()))
    }

    /// Token for the period containing `timestamp` (Unix seconds)
    pub fn at(&self, timestamp: u64) -> String {
        self.totp.generate(timestamp)
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    /// Start of the period following the one containing `timestamp`
    pub fn next_boundary(&self, timestamp: u64) -> u64 {
        (timestamp / self.period + 1) * self.period
    }
}

/// Current token for the given parameters
pub fn current_token(secret: &str, period: u64, digits: u32, algorithm: Algorithm) -> Result<String> {
    TokenProvider::new(secret, period, digits, algorithm)?.current()
}

/// Encode a passcode for the rendezvous channel
pub fn encode_passcode(passcode: &str) -> String {
    BASE64.encode(passcode.as_bytes())
}

/// Decode a passcode received over the rendezvous channel
pub fn decode_passcode(encoded: &str) -> Result<String> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| Error::Encoding(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| Error::Encoding(e.to_string()))
}

fn encoded_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([0-9a-zA-Z+/]{4})*(([0-9a-zA-Z+/]{2}==)|([0-9a-zA-Z+/]{3}=))?$")
            .expect("static pattern is valid")
    })
}

/// Whether `value` has the shape of standard padded base64
pub fn looks_encoded(value: &str) -> bool {
    encoded_pattern().is_match(value)
}

/// Direction-guessing codec: decodes anything shaped like base64, encodes
/// everything else.
///
/// A plaintext passcode that happens to look like base64 (e.g. eight digits)
/// is decoded rather than encoded. The pairing protocol itself uses the
/// explicit [`encode_passcode`]/[`decode_passcode`] pair.
pub fn transcode(value: &str) -> String {
    if looks_encoded(value) {
        match BASE64.decode(value) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => encode_passcode(value),
        }
    } else {
        encode_passcode(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // RFC 6238 test secret "12345678901234567890"
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn test_rfc6238_vectors() {
        let provider = TokenProvider::new(RFC_SECRET, 30, 8, Algorithm::Sha1).unwrap();
        assert_eq!(provider.at(59), "94287082");
        assert_eq!(provider.at(1_111_111_109), "07081804");
    }

    #[test]
    fn test_token_stable_within_period() {
        let provider = TokenProvider::new(&derive_secret(Some("s3cret")), 30, 6, Algorithm::Sha1)
            .unwrap();
        let start = 1_700_000_010 - (1_700_000_010 % 30);
        let token = provider.at(start);
        assert_eq!(token.len(), 6);
        assert_eq!(provider.at(start + 29), token);
        assert_ne!(provider.at(start + 30), token);
    }

    #[test]
    fn test_next_boundary() {
        let provider = TokenProvider::new(RFC_SECRET, 30, 6, Algorithm::Sha1).unwrap();
        assert_eq!(provider.next_boundary(0), 30);
        assert_eq!(provider.next_boundary(29), 30);
        assert_eq!(provider.next_boundary(30), 60);
    }

    #[test]
    fn test_sha256_hex_hashes_json_form() {
        let mut hasher = Sha256::new();
        hasher.update(b"\"abc\"");
        assert_eq!(sha256_hex("abc"), hex::encode(hasher.finalize()));
        assert_eq!(sha256_hex("abc").len(), 64);
    }

    #[test]
    fn test_derived_secret_is_deterministic_base32() {
        let secret = derive_secret(Some("s3cret"));
        assert_eq!(secret, derive_secret(Some("s3cret")));
        assert_ne!(secret, derive_secret(Some("other")));
        // 64 hex chars -> 13 padded base32 groups
        assert_eq!(secret.len(), 104);
        assert!(secret.ends_with('=') && !secret.ends_with("=="));
        assert!(secret
            .trim_end_matches('=')
            .chars()
            .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c)));
    }

    #[test]
    fn test_random_secret_is_usable() {
        let secret = derive_secret(None);
        assert_ne!(secret, derive_secret(None));
        assert!(TokenProvider::new(&secret, 30, 6, Algorithm::Sha512).is_ok());
    }

    #[test]
    fn test_invalid_secret_rejected() {
        assert!(TokenProvider::new("not base32!", 30, 6, Algorithm::Sha1).is_err());
        assert!(TokenProvider::new("", 30, 6, Algorithm::Sha1).is_err());
        assert!(TokenProvider::new(RFC_SECRET, 0, 6, Algorithm::Sha1).is_err());
    }

    #[test]
    fn test_passcode_encoding() {
        assert_eq!(encode_passcode("1234567890"), "MTIzNDU2Nzg5MA==");
        assert_eq!(decode_passcode("MTIzNDU2Nzg5MA==").unwrap(), "1234567890");
        assert!(decode_passcode("%%%").is_err());
    }

    #[test]
    fn test_transcode_guesses_direction() {
        assert_eq!(transcode("1234567890"), "MTIzNDU2Nzg5MA==");
        assert_eq!(transcode("MTIzNDU2Nzg5MA=="), "1234567890");
        // eight digits look like base64 and are decoded, not encoded
        assert!(looks_encoded("12345678"));
        assert_ne!(transcode("12345678"), encode_passcode("12345678"));
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(passcode in "[ -~]{0,40}") {
            prop_assert_eq!(decode_passcode(&encode_passcode(&passcode)).unwrap(), passcode);
        }

        #[test]
        fn prop_encode_inverts_decode(passcode in "[ -~]{0,40}") {
            let encoded = encode_passcode(&passcode);
            prop_assert_eq!(encode_passcode(&decode_passcode(&encoded).unwrap()), encoded);
        }

        #[test]
        fn prop_transcode_round_trips_plaintext(passcode in "[ -~]{0,40}") {
            prop_assume!(!looks_encoded(&passcode));
            prop_assert_eq!(transcode(&transcode(&passcode)), passcode);
        }
    }
}
