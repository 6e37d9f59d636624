// Durable whitelist document schema

use super::StoreError;
use crate::whitelist::{Account, MemberId, Registry, RoleId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the account written into a freshly seeded document
pub const SEED_ACCOUNT: &str = "example_user";

/// Top-level persisted document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistDocument {
    /// Account records keyed by account name. Read as empty when missing.
    #[serde(default)]
    pub whitelist: BTreeMap<String, AccountRecord>,
}

/// One persisted account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Display name; falls back to the account name when absent
    #[serde(default)]
    pub pretty: Option<String>,
    /// Session capacity (default 1)
    #[serde(default = "default_session_limit")]
    pub session_limit: usize,
    /// Members holding a session, in claim order
    #[serde(default)]
    pub sessions: Vec<MemberId>,
    /// Role ids granted on login, in application order
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

fn default_session_limit() -> usize {
    1
}

impl AccountRecord {
    fn from_account(account: &Account) -> Self {
        Self {
            pretty: Some(account.display_name().to_string()),
            session_limit: account.session_limit(),
            sessions: account.sessions().to_vec(),
            roles: account.roles().to_vec(),
        }
    }
}

impl WhitelistDocument {
    /// Content written when no document exists yet
    pub fn seed() -> Self {
        let mut whitelist = BTreeMap::new();
        whitelist.insert(
            SEED_ACCOUNT.to_string(),
            AccountRecord {
                pretty: Some("Example User".to_string()),
                session_limit: 0,
                sessions: Vec::new(),
                roles: Vec::new(),
            },
        );
        Self { whitelist }
    }

    pub fn from_registry(registry: &Registry) -> Self {
        let whitelist = registry
            .accounts()
            .map(|account| (account.name().to_string(), AccountRecord::from_account(account)))
            .collect();
        Self { whitelist }
    }

    /// Build a fresh registry, dropping sessions that violate its invariants
    pub fn into_registry(self) -> Registry {
        let mut registry = Registry::new();
        for (name, record) in self.whitelist {
            let account = Account::new(name, record.pretty, record.session_limit, record.roles);
            registry.restore_account(account, record.sessions);
        }
        registry
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::CorruptDocument(e.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| StoreError::PersistenceFailure(format!("Failed to serialize: {}", e)))
    }
}

/// SHA-256 digest of serialized registry content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&Sha256::digest(bytes));
        Self(digest)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
