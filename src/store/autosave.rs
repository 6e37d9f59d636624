// Background autosave for the whitelist store

use super::StoreError;
use super::manager::WhitelistStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

const DEFAULT_INTERVAL_SECS: u64 = 120;

/// Autosave settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutosaveConfig {
    /// Whether the background loop runs at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Seconds between ticks
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

impl AutosaveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Result of one autosave tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosaveOutcome {
    Saved,
    Unchanged,
}

/// Change-detecting saver
///
/// Skips the write when the registry still hashes the same as the content the
/// store last persisted, whether that was written by a tick or by a manual
/// save. The first tick after startup always writes.
pub struct Autosaver {
    store: Arc<WhitelistStore>,
}

impl Autosaver {
    pub fn new(store: Arc<WhitelistStore>) -> Self {
        Self { store }
    }

    /// Save if the registry changed since the last successful save
    ///
    /// A failed write leaves the recorded fingerprint alone so the next tick
    /// retries.
    pub async fn tick(&self) -> Result<AutosaveOutcome, StoreError> {
        match self.store.save_if_changed().await? {
            Some(fingerprint) => {
                debug!("Autosave wrote {}", fingerprint);
                Ok(AutosaveOutcome::Saved)
            }
            None => Ok(AutosaveOutcome::Unchanged),
        }
    }
}

/// Handle to a running autosave loop
///
/// Dropping the handle without calling [`stop`](Self::stop) also ends the
/// loop at its next wake-up, but does not wait for it.
pub struct AutosaveHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AutosaveHandle {
    /// Signal the loop to stop and wait for it to finish
    ///
    /// A tick already in progress completes before the loop exits.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            error!("Autosave task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start the background autosave loop
///
/// The first tick fires immediately. Ticks missed while a slow save holds the
/// lock are delayed rather than bunched up.
pub fn spawn_autosave(store: Arc<WhitelistStore>, period: Duration) -> AutosaveHandle {
    let period = if period.is_zero() {
        warn!(
            "Autosave interval of zero requested, using {}s",
            DEFAULT_INTERVAL_SECS
        );
        Duration::from_secs(DEFAULT_INTERVAL_SECS)
    } else {
        period
    };

    let (stop_tx, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        info!("Starting whitelist autosave every {}s", period.as_secs());

        let autosaver = Autosaver::new(store);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match autosaver.tick().await {
                        Ok(AutosaveOutcome::Saved) => info!("Autosave: whitelist saved"),
                        Ok(AutosaveOutcome::Unchanged) => debug!("Autosave: no changes"),
                        Err(e) => error!("Autosave failed, retrying next tick: {}", e),
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Whitelist autosave stopped");
    });

    AutosaveHandle { stop_tx, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::storage::MemoryDocumentStorage;
    use crate::whitelist::{MemberId, NewAccount};

    async fn memory_store() -> (Arc<MemoryDocumentStorage>, Arc<WhitelistStore>) {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let store = WhitelistStore::open(storage.clone()).await.unwrap();
        (storage, Arc::new(store))
    }

    #[test]
    fn test_default_config() {
        let config = AutosaveConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_tick_skips_unchanged_content() {
        let (storage, store) = memory_store().await;
        let seeded_writes = storage.write_count();
        let autosaver = Autosaver::new(store.clone());

        assert_eq!(autosaver.tick().await.unwrap(), AutosaveOutcome::Saved);
        assert_eq!(autosaver.tick().await.unwrap(), AutosaveOutcome::Unchanged);
        assert_eq!(storage.write_count(), seeded_writes + 1);

        store.add_account(NewAccount::new("erin")).await.unwrap();
        assert_eq!(autosaver.tick().await.unwrap(), AutosaveOutcome::Saved);
        assert_eq!(autosaver.tick().await.unwrap(), AutosaveOutcome::Unchanged);
        assert_eq!(storage.write_count(), seeded_writes + 2);
    }

    #[tokio::test]
    async fn test_tick_detects_session_changes() {
        let (_storage, store) = memory_store().await;
        store
            .add_account(NewAccount::new("frank").with_session_limit(2))
            .await
            .unwrap();
        let autosaver = Autosaver::new(store.clone());
        autosaver.tick().await.unwrap();

        store.create_session("frank", MemberId(1)).await.unwrap();
        assert_eq!(autosaver.tick().await.unwrap(), AutosaveOutcome::Saved);

        // Claim and release again: content is back where it was last written
        store.create_session("frank", MemberId(2)).await.unwrap();
        store.drop_session("frank", MemberId(2)).await.unwrap();
        assert_eq!(autosaver.tick().await.unwrap(), AutosaveOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_tick_after_manual_save_is_unchanged() {
        let (storage, store) = memory_store().await;
        let autosaver = Autosaver::new(store.clone());
        autosaver.tick().await.unwrap();

        store.add_account(NewAccount::new("lena")).await.unwrap();
        store.save().await.unwrap();
        let writes = storage.write_count();

        assert_eq!(autosaver.tick().await.unwrap(), AutosaveOutcome::Unchanged);
        assert_eq!(storage.write_count(), writes);

        // reload saves too
        store.add_account(NewAccount::new("mona")).await.unwrap();
        store.reload().await.unwrap();
        assert_eq!(autosaver.tick().await.unwrap(), AutosaveOutcome::Unchanged);
        assert_eq!(storage.write_count(), writes + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_saves_only_after_changes() {
        let (storage, store) = memory_store().await;
        let seeded_writes = storage.write_count();

        let handle = spawn_autosave(store.clone(), Duration::from_secs(120));

        // First tick fires immediately
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(storage.write_count(), seeded_writes + 1);

        // Idle tick at t=120
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(storage.write_count(), seeded_writes + 1);

        // One mutation, one write at t=240
        store.add_account(NewAccount::new("gina")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(storage.write_count(), seeded_writes + 2);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_the_loop() {
        let (storage, store) = memory_store().await;
        let handle = spawn_autosave(store.clone(), Duration::from_secs(120));
        tokio::time::sleep(Duration::from_secs(1)).await;

        handle.stop().await;
        let writes = storage.write_count();

        store.add_account(NewAccount::new("hank")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(storage.write_count(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_ends_the_loop() {
        let (_storage, store) = memory_store().await;
        let handle = spawn_autosave(store.clone(), Duration::from_secs(120));
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(handle);
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Only the test still holds the store once the task has exited
        assert_eq!(Arc::strong_count(&store), 1);
    }
}
