//! Users file and public key authorization
//!
//! ```toml
//! [[users]]
//! name = "alice"
//! public_keys = ["ssh-ed25519 AAAAC3Nza... alice@laptop"]
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use russh_keys::key::PublicKey;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: Vec<UserEntry>,
}

#[derive(Debug, Deserialize)]
struct UserEntry {
    name: String,
    #[serde(default)]
    public_keys: Vec<String>,
}

/// Key fingerprints each user may log in with
#[derive(Debug, Default)]
pub struct UserKeys {
    fingerprints: HashMap<String, HashSet<String>>,
}

impl UserKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the users file; a missing file yields an empty set
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Users file not found: {:?}", path);
            return Ok(Self::new());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let keys = Self::parse(&content).with_context(|| format!("Failed to parse {:?}", path))?;
        tracing::info!(
            "Loaded {} keys for {} users from {:?}",
            keys.key_count(),
            keys.user_count(),
            path
        );
        Ok(keys)
    }

    /// Parse users file content. Unparsable keys are skipped with a warning.
    pub fn parse(content: &str) -> Result<Self> {
        let file: UsersFile = toml::from_str(content)?;
        let mut keys = Self::new();

        for user in file.users {
            keys.fingerprints.entry(user.name.clone()).or_default();
            for line in &user.public_keys {
                match parse_key_line(line) {
                    Some(key) => keys.add_key(&user.name, &key),
                    None => tracing::warn!("Skipping unparsable key for user {}", user.name),
                }
            }
        }
        Ok(keys)
    }

    pub fn add_key(&mut self, user: &str, key: &PublicKey) {
        self.fingerprints
            .entry(user.to_string())
            .or_default()
            .insert(key.fingerprint());
    }

    pub fn is_authorized(&self, user: &str, key: &PublicKey) -> bool {
        self.fingerprints
            .get(user)
            .is_some_and(|keys| keys.contains(&key.fingerprint()))
    }

    pub fn user_count(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn key_count(&self) -> usize {
        self.fingerprints.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.key_count() == 0
    }
}

/// Accepts `type base64 [comment]` or the bare base64 blob
fn parse_key_line(line: &str) -> Option<PublicKey> {
    let line = line.trim();
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(_), Some(blob)) => russh_keys::parse_public_key_base64(blob).ok(),
        (Some(blob), None) => russh_keys::parse_public_key_base64(blob).ok(),
        _ => None,
    }
}
