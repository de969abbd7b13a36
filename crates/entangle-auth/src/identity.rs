//! Identity resolution
//!
//! Turns a human-facing identity into the rendezvous address both roles
//! compute independently. An alias (`~@name`) is looked up in the directory
//! to find the public key it points at; a raw public key is hashed directly.

use crate::secret::sha256_hex;
use async_trait::async_trait;
use entangle_core::{Error, RendezvousAddress, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Prefix marking an identity as a directory alias
pub const ALIAS_PREFIX: &str = "~@";

/// Who the requester wants to pair with
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    /// Directory alias, stored with its `~@` prefix
    Alias(String),
    /// Raw public key, without the `~` soul prefix
    PublicKey(String),
}

impl Identity {
    pub fn parse(s: &str) -> Self {
        if s.starts_with(ALIAS_PREFIX) {
            Identity::Alias(s.to_string())
        } else {
            Identity::PublicKey(s.trim_start_matches('~').to_string())
        }
    }

    /// Identity for an alias given with or without its prefix
    pub fn alias(name: &str) -> Self {
        Identity::Alias(alias_key(name))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Identity::Alias(alias) => alias,
            Identity::PublicKey(key) => key,
        }
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Identity::parse(s)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize an alias to its `~@` directory key
pub fn alias_key(name: &str) -> String {
    if name.starts_with(ALIAS_PREFIX) {
        name.to_string()
    } else {
        format!("{}{}", ALIAS_PREFIX, name)
    }
}

/// Directory node stored under an alias key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    /// Soul keys linked from this node, each `~<public key>`
    pub keys: Vec<String>,
}

impl DirectoryRecord {
    /// First public key linked from the record
    pub fn public_key(&self) -> Option<&str> {
        self.keys.iter().find_map(|key| {
            key.strip_prefix('~')
                .filter(|key| !key.is_empty() && !key.starts_with('@'))
        })
    }
}

/// Graph-store lookups needed to resolve an alias
#[async_trait]
pub trait Directory: Send + Sync {
    /// Direct lookup of the node stored under `key`
    async fn get(&self, key: &str) -> Result<Option<DirectoryRecord>>;

    /// User-namespace lookup; yields the soul key (`~<public key>`) of the
    /// account owning `alias`
    async fn user(&self, alias: &str) -> Result<Option<String>>;
}

/// Rendezvous address for a public key
pub fn address_for_key(public_key: &str) -> RendezvousAddress {
    RendezvousAddress::new(sha256_hex(public_key))
}

/// Resolve an identity to its rendezvous address.
///
/// Directory failures are surfaced as [`Error::Resolution`]; retrying is up
/// to the caller.
pub async fn resolve(identity: &Identity, directory: &dyn Directory) -> Result<RendezvousAddress> {
    match identity {
        Identity::PublicKey(key) => Ok(address_for_key(key)),
        Identity::Alias(alias) => {
            let key = lookup_public_key(alias, directory).await?;
            debug!("Resolved {} to public key {}", alias, key);
            Ok(address_for_key(&key))
        }
    }
}

async fn lookup_public_key(alias: &str, directory: &dyn Directory) -> Result<String> {
    let record = directory
        .get(alias)
        .await
        .map_err(|e| Error::resolution(alias, e.to_string()))?;

    if let Some(key) = record.as_ref().and_then(DirectoryRecord::public_key) {
        return Ok(key.to_string());
    }

    // Record missing or not yet synchronized; ask the user namespace instead
    debug!("No key on record for {}, trying user lookup", alias);
    let soul = directory
        .user(alias)
        .await
        .map_err(|e| Error::resolution(alias, e.to_string()))?;

    soul.as_deref()
        .map(|soul| soul.trim_start_matches('~'))
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::resolution(alias, "no public key published for alias"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryStore;

    struct Unreachable;

    #[async_trait]
    impl Directory for Unreachable {
        async fn get(&self, _key: &str) -> Result<Option<DirectoryRecord>> {
            Err(Error::Transport("directory offline".into()))
        }

        async fn user(&self, _alias: &str) -> Result<Option<String>> {
            Err(Error::Transport("directory offline".into()))
        }
    }

    #[test]
    fn test_identity_parsing() {
        assert_eq!(Identity::parse("~@alice"), Identity::Alias("~@alice".into()));
        assert_eq!(Identity::parse("~abc.def"), Identity::PublicKey("abc.def".into()));
        assert_eq!(Identity::parse("abc.def"), Identity::PublicKey("abc.def".into()));
        assert_eq!(Identity::alias("alice"), Identity::Alias("~@alice".into()));
    }

    #[test]
    fn test_record_public_key_skips_alias_links() {
        let record = DirectoryRecord {
            keys: vec!["~@alice".into(), "~KEY".into()],
        };
        assert_eq!(record.public_key(), Some("KEY"));
        assert_eq!(DirectoryRecord::default().public_key(), None);
    }

    #[tokio::test]
    async fn test_alias_and_key_resolve_to_same_address() {
        let directory = DirectoryStore::in_memory();
        directory.publish_alias("alice", "KEY").await.unwrap();

        let by_alias = resolve(&Identity::alias("alice"), &directory).await.unwrap();
        let by_key = resolve(&Identity::parse("KEY"), &directory).await.unwrap();
        assert_eq!(by_alias, by_key);
        assert_eq!(by_key, address_for_key("KEY"));
        assert_eq!(by_key.as_str().len(), 64);
    }

    #[tokio::test]
    async fn test_falls_back_to_user_lookup() {
        let directory = DirectoryStore::in_memory();
        directory.publish_user("bob", "BOBKEY").await.unwrap();

        let address = resolve(&Identity::alias("bob"), &directory).await.unwrap();
        assert_eq!(address, address_for_key("BOBKEY"));
    }

    #[tokio::test]
    async fn test_unknown_alias_fails() {
        let directory = DirectoryStore::in_memory();
        let result = resolve(&Identity::alias("nobody"), &directory).await;
        assert!(matches!(result, Err(Error::Resolution { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_directory_fails() {
        let result = resolve(&Identity::alias("alice"), &Unreachable).await;
        assert!(matches!(result, Err(Error::Resolution { .. })));

        // raw keys never touch the directory
        assert!(resolve(&Identity::parse("KEY"), &Unreachable).await.is_ok());
    }
}
