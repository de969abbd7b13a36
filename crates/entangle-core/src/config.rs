//! Configuration types for an issuing pairing session

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Issuer name shown by authenticator apps when none is configured
pub const DEFAULT_ISSUER: &str = "Entanglement Authenticator";
/// Pairing window per peer, measured from first contact
pub const DEFAULT_TIMEOUT_MS: u64 = 5 * 60 * 1000;
/// Failed challenges tolerated per peer before lockout
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// TOTP period in seconds
pub const DEFAULT_PERIOD: u64 = 30;
/// TOTP token length
pub const DEFAULT_DIGITS: u32 = 6;

/// HMAC algorithm used for token generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Algorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Name as it appears in an `otpauth://` URI
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha1 => "SHA1",
            Algorithm::Sha256 => "SHA256",
            Algorithm::Sha512 => "SHA512",
        }
    }
}

impl std::str::FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "").as_str() {
            "SHA1" => Ok(Algorithm::Sha1),
            "SHA256" => Ok(Algorithm::Sha256),
            "SHA512" => Ok(Algorithm::Sha512),
            _ => Err(format!("Invalid algorithm: {}. Use: SHA1, SHA256, SHA512", s)),
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a decoded passcode is compared against the PIN and current token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MatchRule {
    /// Passcode must equal `pin + token`
    #[default]
    PinThenToken,
    /// Passcode must equal `token + pin`
    TokenThenPin,
    /// Length must equal `pin + token` and both must occur somewhere in it.
    /// Accepts either order, and some interleavings when the PIN and token overlap.
    Containment,
}

impl MatchRule {
    pub fn matches(&self, guess: &str, pin: &str, token: &str) -> bool {
        match self {
            MatchRule::PinThenToken => {
                guess.len() == pin.len() + token.len()
                    && guess.starts_with(pin)
                    && guess.ends_with(token)
            }
            MatchRule::TokenThenPin => {
                guess.len() == pin.len() + token.len()
                    && guess.starts_with(token)
                    && guess.ends_with(pin)
            }
            MatchRule::Containment => {
                guess.len() == pin.len() + token.len()
                    && guess.contains(token)
                    && guess.contains(pin)
            }
        }
    }
}

impl std::str::FromStr for MatchRule {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pin-then-token" | "pin-token" => Ok(MatchRule::PinThenToken),
            "token-then-pin" | "token-pin" => Ok(MatchRule::TokenThenPin),
            "containment" | "contains" => Ok(MatchRule::Containment),
            _ => Err(format!(
                "Invalid match rule: {}. Use: pin-then-token, token-then-pin, containment",
                s
            )),
        }
    }
}

/// Configuration for the issuing side of a pairing ceremony
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Rendezvous address override (defaults to the hash of the credential's public key)
    pub address: Option<String>,
    /// Display name shown by authenticator apps
    pub issuer: String,
    /// User name; the provisioning label is derived from it
    pub user: Option<String>,
    /// Passphrase the TOTP secret is derived from (random secret if None)
    pub secret_passphrase: Option<String>,
    /// Static PIN combined with the token; any string, empty for token-only
    pub pin: String,
    /// Per-peer pairing window in milliseconds
    pub timeout_ms: u64,
    /// Failed challenges per peer before lockout
    pub max_attempts: u32,
    /// Token period in seconds
    pub period: u64,
    /// Token length
    pub digits: u32,
    /// Token HMAC algorithm
    pub algorithm: Algorithm,
    /// Passcode comparison rule
    pub match_rule: MatchRule,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: None,
            issuer: DEFAULT_ISSUER.to_string(),
            user: None,
            secret_passphrase: None,
            pin: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            period: DEFAULT_PERIOD,
            digits: DEFAULT_DIGITS,
            algorithm: Algorithm::Sha1,
            match_rule: MatchRule::PinThenToken,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set rendezvous address override
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Builder pattern: set issuer name
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    /// Builder pattern: set user name
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Builder pattern: set secret passphrase
    pub fn with_secret_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.secret_passphrase = Some(passphrase.into());
        self
    }

    /// Builder pattern: set PIN
    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = pin.into();
        self
    }

    /// Builder pattern: set per-peer timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    /// Builder pattern: set max attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Builder pattern: set token period in seconds
    pub fn with_period(mut self, period: u64) -> Self {
        self.period = period;
        self
    }

    /// Builder pattern: set token digits
    pub fn with_digits(mut self, digits: u32) -> Self {
        self.digits = digits;
        self
    }

    /// Builder pattern: set algorithm
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Builder pattern: set match rule
    pub fn with_match_rule(mut self, match_rule: MatchRule) -> Self {
        self.match_rule = match_rule;
        self
    }

    /// Per-peer pairing window
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Reject values that cannot produce a working ceremony
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::Config("timeout must be greater than zero".into()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be greater than zero".into()));
        }
        if self.period == 0 {
            return Err(Error::Config("period must be greater than zero".into()));
        }
        if !(6..=8).contains(&self.digits) {
            return Err(Error::Config(format!(
                "digits must be between 6 and 8, got {}",
                self.digits
            )));
        }
        if self.issuer.is_empty() {
            return Err(Error::Config("issuer must not be empty".into()));
        }
        if matches!(&self.address, Some(address) if address.is_empty()) {
            return Err(Error::Config("address override must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.issuer, DEFAULT_ISSUER);
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.period, 30);
        assert_eq!(config.digits, 6);
        assert_eq!(config.algorithm, Algorithm::Sha1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(SessionConfig::new().with_digits(0).validate().is_err());
        assert!(SessionConfig::new().with_period(0).validate().is_err());
        assert!(SessionConfig::new().with_max_attempts(0).validate().is_err());
        assert!(SessionConfig::new()
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(SessionConfig::new().with_address("").validate().is_err());
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"pin":"1234","algorithm":"SHA256"}"#).unwrap();
        assert_eq!(config.pin, "1234");
        assert_eq!(config.algorithm, Algorithm::Sha256);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("sha1".parse::<Algorithm>().unwrap(), Algorithm::Sha1);
        assert_eq!("SHA-256".parse::<Algorithm>().unwrap(), Algorithm::Sha256);
        assert!("md5".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_match_rules() {
        assert!(MatchRule::PinThenToken.matches("1234987654", "1234", "987654"));
        assert!(!MatchRule::PinThenToken.matches("9876541234", "1234", "987654"));
        assert!(MatchRule::TokenThenPin.matches("9876541234", "1234", "987654"));
        assert!(MatchRule::Containment.matches("9876541234", "1234", "987654"));
        assert!(MatchRule::Containment.matches("1234987654", "1234", "987654"));
        assert!(!MatchRule::Containment.matches("12349876540", "1234", "987654"));
        assert!(!MatchRule::PinThenToken.matches("1234000000", "1234", "987654"));
    }

    #[test]
    fn test_any_pin_is_accepted() {
        assert!(SessionConfig::new().with_pin("12a4").validate().is_ok());
        assert!(SessionConfig::new().with_pin("correct horse").validate().is_ok());
        assert!(SessionConfig::new().with_pin("").validate().is_ok());
    }

    #[test]
    fn test_empty_pin_is_token_only() {
        assert!(MatchRule::PinThenToken.matches("987654", "", "987654"));
        assert!(!MatchRule::PinThenToken.matches("987655", "", "987654"));
    }
}
