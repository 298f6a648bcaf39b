//! In-memory store used by tests and throwaway worlds.

use super::{AccountRecord, ContainerRecord, PlayerRecord, Store, StoreFuture, WorldMeta};
use crate::error::StoreError;
use crate::spatial::SectorCoord;
use futures_util::FutureExt;
use protocol::{ContainerId, PlayerId, Tile};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Records {
    meta: Option<WorldMeta>,
    sectors: HashMap<(u32, SectorCoord), Vec<Tile>>,
    containers: HashMap<ContainerId, ContainerRecord>,
    players: HashMap<PlayerId, PlayerRecord>,
    accounts: HashMap<String, AccountRecord>,
}

/// Cloning shares the same records and counters.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<Records>>,
    sector_loads: Arc<AtomicUsize>,
    sector_saves: Arc<AtomicUsize>,
    failing_sector_loads: Arc<AtomicUsize>,
    failing_record_saves: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        // Poisoning is ignored.
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of sector loads issued so far.
    pub fn sector_loads(&self) -> usize {
        self.sector_loads.load(Ordering::SeqCst)
    }

    pub fn sector_saves(&self) -> usize {
        self.sector_saves.load(Ordering::SeqCst)
    }

    /// Make the next `count` sector loads fail.
    pub fn fail_sector_loads(&self, count: usize) {
        self.failing_sector_loads.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` meta, container, player or account saves fail.
    pub fn fail_record_saves(&self, count: usize) {
        self.failing_record_saves.store(count, Ordering::SeqCst);
    }

    pub fn put_sector(&self, w: u32, coord: SectorCoord, tiles: Vec<Tile>) {
        self.records().sectors.insert((w, coord), tiles);
    }

    pub fn sector(&self, w: u32, coord: SectorCoord) -> Option<Vec<Tile>> {
        self.records().sectors.get(&(w, coord)).cloned()
    }

    pub fn container(&self, id: ContainerId) -> Option<ContainerRecord> {
        self.records().containers.get(&id).cloned()
    }

    pub fn player(&self, id: PlayerId) -> Option<PlayerRecord> {
        self.records().players.get(&id).cloned()
    }

    pub fn meta(&self) -> Option<WorldMeta> {
        self.records().meta.clone()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn save_failure(&self, what: String) -> Option<StoreFuture<()>> {
        Self::take_failure(&self.failing_record_saves).then(|| ready(Err(StoreError::Unavailable(what))))
    }
}

fn ready<T: Send + 'static>(value: Result<T, StoreError>) -> StoreFuture<T> {
    async move { value }.boxed()
}

impl Store for MemoryStore {
    fn load_meta(&self) -> StoreFuture<Option<WorldMeta>> {
        ready(Ok(self.records().meta.clone()))
    }

    fn save_meta(&self, meta: WorldMeta) -> StoreFuture<()> {
        if let Some(failed) = self.save_failure("meta".to_string()) {
            return failed;
        }
        self.records().meta = Some(meta);
        ready(Ok(()))
    }

    fn load_sector(&self, w: u32, coord: SectorCoord) -> StoreFuture<Option<Vec<Tile>>> {
        self.sector_loads.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_sector_loads) {
            return ready(Err(StoreError::Unavailable(format!("sector {} {}", w, coord))));
        }
        ready(Ok(self.records().sectors.get(&(w, coord)).cloned()))
    }

    fn save_sector(&self, w: u32, coord: SectorCoord, tiles: Vec<Tile>) -> StoreFuture<()> {
        self.sector_saves.fetch_add(1, Ordering::SeqCst);
        self.records().sectors.insert((w, coord), tiles);
        ready(Ok(()))
    }

    fn load_container(&self, id: ContainerId) -> StoreFuture<Option<ContainerRecord>> {
        ready(Ok(self.records().containers.get(&id).cloned()))
    }

    fn save_container(&self, id: ContainerId, record: ContainerRecord) -> StoreFuture<()> {
        if let Some(failed) = self.save_failure(format!("container {}", id)) {
            return failed;
        }
        self.records().containers.insert(id, record);
        ready(Ok(()))
    }

    fn load_player(&self, id: PlayerId) -> StoreFuture<Option<PlayerRecord>> {
        ready(Ok(self.records().players.get(&id).cloned()))
    }

    fn save_player(&self, record: PlayerRecord) -> StoreFuture<()> {
        if let Some(failed) = self.save_failure(format!("player {}", record.id)) {
            return failed;
        }
        self.records().players.insert(record.id, record);
        ready(Ok(()))
    }

    fn load_account(&self, username: &str) -> StoreFuture<Option<AccountRecord>> {
        ready(Ok(self.records().accounts.get(&username.to_lowercase()).cloned()))
    }

    fn save_account(&self, record: AccountRecord) -> StoreFuture<()> {
        if let Some(failed) = self.save_failure(format!("account {}", record.username)) {
            return failed;
        }
        self.records()
            .accounts
            .insert(record.username.to_lowercase(), record);
        ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failure_injection_counts_down() {
        let store = MemoryStore::new();
        let coord = SectorCoord::new(0, 0, 0);
        store.fail_sector_loads(2);
        assert!(store.load_sector(0, coord).await.is_err());
        assert!(store.load_sector(0, coord).await.is_err());
        assert_eq!(store.load_sector(0, coord).await.unwrap(), None);
        assert_eq!(store.sector_loads(), 3);
    }

    #[tokio::test]
    async fn test_record_save_failures_leave_records_alone() {
        let store = MemoryStore::new();
        store.fail_record_saves(1);
        let record = AccountRecord {
            username: "Ada".to_string(),
            password: "pw".to_string(),
            player_ids: vec![],
        };
        assert!(matches!(
            store.save_account(record.clone()).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.load_account("ada").await.unwrap().is_none());
        store.save_account(record).await.unwrap();
        assert!(store.load_account("ada").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clones_share_records() {
        let store = MemoryStore::new();
        let other = store.clone();
        store
            .save_account(AccountRecord {
                username: "Ada".to_string(),
                password: "pw".to_string(),
                player_ids: vec![],
            })
            .await
            .unwrap();
        assert!(other.load_account("ada").await.unwrap().is_some());
    }
}
