// Whitelist store manager
// Single owner of the registry; every access goes through one coarse lock

use super::StoreError;
use super::document::{Fingerprint, WhitelistDocument};
use super::storage::DocumentStorage;
use crate::whitelist::{AccountSnapshot, MemberId, NewAccount, Registry};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Persistence and lifecycle wrapper around the registry
///
/// Mutations take the registry write lock; saves hold the read lock for the
/// whole serialize-and-write pass, so a save never observes a half-applied
/// change and no change slips in between serialization and the write.
/// Writes to the medium are serialized by `write_lock`, taken before the
/// registry lock.
pub struct WhitelistStore {
    storage: Arc<dyn DocumentStorage>,
    registry: RwLock<Registry>,
    write_lock: Mutex<()>,
    last_loaded_at: RwLock<Option<DateTime<Utc>>>,
    last_persisted_at: RwLock<Option<DateTime<Utc>>>,
    persisted_fingerprint: RwLock<Option<Fingerprint>>,
}

impl WhitelistStore {
    /// Create a store with an empty registry. Call [`load`](Self::load)
    /// before serving requests, or use [`open`](Self::open).
    pub fn new(storage: Arc<dyn DocumentStorage>) -> Self {
        Self {
            storage,
            registry: RwLock::new(Registry::new()),
            write_lock: Mutex::new(()),
            last_loaded_at: RwLock::new(None),
            last_persisted_at: RwLock::new(None),
            persisted_fingerprint: RwLock::new(None),
        }
    }

    /// Create a store and load it from `storage`
    pub async fn open(storage: Arc<dyn DocumentStorage>) -> Result<Self, StoreError> {
        let store = Self::new(storage);
        store.load().await?;
        Ok(store)
    }

    /// Replace the registry with the stored document
    ///
    /// A missing document is seeded first. A document that fails to parse is
    /// moved aside where the medium supports it, replaced with the seed and
    /// read once more. Returns the number of
    /// accounts loaded.
    pub async fn load(&self) -> Result<usize, StoreError> {
        let document = self.read_document().await?;
        let registry = document.into_registry();
        let count = registry.len();

        *self.registry.write().await = registry;
        *self.last_loaded_at.write().await = Some(Utc::now());

        info!(
            "Loaded {} whitelist account(s) from {}",
            count,
            self.storage.describe()
        );
        Ok(count)
    }

    /// Write the current registry, fully replacing the stored document
    ///
    /// On failure the registry, `last_persisted_at` and the persisted
    /// fingerprint are left untouched.
    pub async fn save(&self) -> Result<(), StoreError> {
        let _writing = self.write_lock.lock().await;
        let registry = self.registry.read().await;
        let bytes = WhitelistDocument::from_registry(&registry).to_bytes()?;
        self.persist(&bytes).await?;
        Ok(())
    }

    /// Flush then re-read the stored document
    pub async fn reload(&self) -> Result<usize, StoreError> {
        self.save().await?;
        self.load().await
    }

    pub async fn last_loaded_at(&self) -> Option<DateTime<Utc>> {
        *self.last_loaded_at.read().await
    }

    pub async fn last_persisted_at(&self) -> Option<DateTime<Utc>> {
        *self.last_persisted_at.read().await
    }

    /// Digest of the content last written by `save` or an autosave tick
    pub async fn persisted_fingerprint(&self) -> Option<Fingerprint> {
        *self.persisted_fingerprint.read().await
    }

    /// Digest of the registry as it would be written now
    pub async fn fingerprint(&self) -> Result<Fingerprint, StoreError> {
        let registry = self.registry.read().await;
        let bytes = WhitelistDocument::from_registry(&registry).to_bytes()?;
        Ok(Fingerprint::of(&bytes))
    }

    /// Save only when the content differs from the last persisted content
    ///
    /// Returns the new fingerprint if a write happened, `None` if the content
    /// was unchanged. Nothing counts as persisted until the first save after
    /// startup, so that save always writes.
    pub(crate) async fn save_if_changed(&self) -> Result<Option<Fingerprint>, StoreError> {
        let _writing = self.write_lock.lock().await;
        let registry = self.registry.read().await;
        let bytes = WhitelistDocument::from_registry(&registry).to_bytes()?;
        let current = Fingerprint::of(&bytes);

        if *self.persisted_fingerprint.read().await == Some(current) {
            debug!("Whitelist unchanged ({}), skipping save", current);
            return Ok(None);
        }

        self.persist(&bytes).await?;
        Ok(Some(current))
    }

    /// Run `f` against the registry under the read lock
    pub async fn read<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        let registry = self.registry.read().await;
        f(&registry)
    }

    /// Run `f` against the registry under the write lock
    ///
    /// Use this for check-then-act sequences that must not interleave with
    /// other commands.
    pub async fn update<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
        let mut registry = self.registry.write().await;
        f(&mut registry)
    }

    pub async fn get_account(&self, name: &str) -> Option<AccountSnapshot> {
        self.read(|r| r.get_account(name).map(|a| a.snapshot()))
            .await
    }

    pub async fn find_owner(&self, member: MemberId) -> Option<String> {
        self.read(|r| r.find_owner(member).map(str::to_string)).await
    }

    pub async fn add_account(&self, new: NewAccount) -> Result<AccountSnapshot, StoreError> {
        let snapshot = self
            .update(|r| r.add_account(new).map(|a| a.snapshot()))
            .await?;
        info!("Added whitelist account {}", snapshot.name);
        Ok(snapshot)
    }

    /// Remove an account, returning its final state. Unknown names are a no-op.
    pub async fn remove_account(&self, name: &str) -> Option<AccountSnapshot> {
        let removed = self
            .update(|r| r.remove_account(name).map(|a| a.snapshot()))
            .await;
        if let Some(account) = &removed {
            info!(
                "Removed whitelist account {} ({} session(s) released)",
                account.name,
                account.sessions.len()
            );
        }
        removed
    }

    pub async fn list_accounts(&self) -> Vec<AccountSnapshot> {
        self.read(Registry::list_accounts).await
    }

    pub async fn create_session(&self, name: &str, member: MemberId) -> Result<(), StoreError> {
        self.update(|r| r.create_session(name, member)).await?;
        debug!("Member {} holds a session on {}", member, name);
        Ok(())
    }

    pub async fn drop_session(&self, name: &str, member: MemberId) -> Result<bool, StoreError> {
        Ok(self.update(|r| r.drop_session(name, member)).await?)
    }

    pub async fn drop_all_sessions(&self, name: &str) -> Result<Vec<MemberId>, StoreError> {
        Ok(self.update(|r| r.drop_all_sessions(name)).await?)
    }

    pub async fn set_session_limit(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<MemberId>, StoreError> {
        Ok(self.update(|r| r.set_session_limit(name, limit)).await?)
    }

    /// Drop `member`'s session wherever it is held
    pub async fn release_member(&self, member: MemberId) -> Option<String> {
        self.update(|r| r.release_member(member)).await
    }

    /// Caller holds `write_lock`
    async fn persist(&self, bytes: &[u8]) -> Result<Fingerprint, StoreError> {
        if let Err(e) = self.storage.write(bytes).await {
            error!(
                "Failed to save whitelist to {}: {}",
                self.storage.describe(),
                e
            );
            return Err(e);
        }

        let fingerprint = Fingerprint::of(bytes);
        *self.persisted_fingerprint.write().await = Some(fingerprint);
        *self.last_persisted_at.write().await = Some(Utc::now());
        debug!("Saved whitelist to {} ({})", self.storage.describe(), fingerprint);
        Ok(fingerprint)
    }

    async fn read_document(&self) -> Result<WhitelistDocument, StoreError> {
        let bytes = match self.storage.read().await? {
            Some(bytes) => bytes,
            None => {
                info!(
                    "No whitelist document at {}, creating one",
                    self.storage.describe()
                );
                self.write_seed().await?
            }
        };

        match WhitelistDocument::from_bytes(&bytes) {
            Ok(document) => Ok(document),
            Err(e) => {
                warn!(
                    "Whitelist document at {} is unreadable ({}), replacing it with the default",
                    self.storage.describe(),
                    e
                );
                let preserved = {
                    let _writing = self.write_lock.lock().await;
                    self.storage.preserve_unreadable().await
                };
                match preserved {
                    Ok(Some(backup)) => warn!("Unreadable whitelist kept at {}", backup),
                    Ok(None) => {}
                    Err(e) => error!("Could not keep a copy of the unreadable whitelist: {}", e),
                }
                let bytes = self.write_seed().await?;
                WhitelistDocument::from_bytes(&bytes)
            }
        }
    }

    async fn write_seed(&self) -> Result<Vec<u8>, StoreError> {
        let seed = WhitelistDocument::seed().to_bytes()?;
        {
            let _writing = self.write_lock.lock().await;
            self.storage.write(&seed).await?;
        }

        self.storage.read().await?.ok_or_else(|| {
            StoreError::PersistenceFailure(format!(
                "Seeded document missing from {}",
                self.storage.describe()
            ))
        })
    }
}
