//! Directory-backed store: one JSON file per unit.

use super::{AccountRecord, ContainerRecord, PlayerRecord, Store, StoreFuture, WorldMeta};
use crate::error::StoreError;
use crate::spatial::SectorCoord;
use futures_util::FutureExt;
use futures_util::future::ready;
use protocol::{ContainerId, PlayerId, Tile};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Layout under `root`:
/// `meta.json`, `sectors/<w>/<x>,<y>,<z>.json`, `containers/<id>.json`,
/// `players/<id>.json`, `accounts/<username>.json`.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sector_path(&self, w: u32, coord: SectorCoord) -> PathBuf {
        self.root
            .join("sectors")
            .join(w.to_string())
            .join(format!("{}.json", coord))
    }

    fn container_path(&self, id: ContainerId) -> PathBuf {
        self.root.join("containers").join(format!("{}.json", id))
    }

    fn player_path(&self, id: PlayerId) -> PathBuf {
        self.root.join("players").join(format!("{}.json", id))
    }

    /// Usernames become file names, so anything that could leave
    /// `accounts/` is refused.
    fn account_path(&self, username: &str) -> Result<PathBuf, StoreError> {
        let key = username.to_lowercase();
        if key.is_empty() || key.contains("..") || key.contains(['/', '\\', ':', '\0']) {
            return Err(StoreError::InvalidKey(username.to_string()));
        }
        Ok(self.root.join("accounts").join(format!("{}.json", key)))
    }
}

async fn read_json<T: DeserializeOwned>(path: PathBuf) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize>(path: PathBuf, value: T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(&value)?;
    // Replace via a temp file so readers never see a half-written record.
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

impl Store for FsStore {
    fn load_meta(&self) -> StoreFuture<Option<WorldMeta>> {
        read_json(self.root.join("meta.json")).boxed()
    }

    fn save_meta(&self, meta: WorldMeta) -> StoreFuture<()> {
        write_json(self.root.join("meta.json"), meta).boxed()
    }

    fn load_sector(&self, w: u32, coord: SectorCoord) -> StoreFuture<Option<Vec<Tile>>> {
        read_json(self.sector_path(w, coord)).boxed()
    }

    fn save_sector(&self, w: u32, coord: SectorCoord, tiles: Vec<Tile>) -> StoreFuture<()> {
        write_json(self.sector_path(w, coord), tiles).boxed()
    }

    fn load_container(&self, id: ContainerId) -> StoreFuture<Option<ContainerRecord>> {
        read_json(self.container_path(id)).boxed()
    }

    fn save_container(&self, id: ContainerId, record: ContainerRecord) -> StoreFuture<()> {
        write_json(self.container_path(id), record).boxed()
    }

    fn load_player(&self, id: PlayerId) -> StoreFuture<Option<PlayerRecord>> {
        read_json(self.player_path(id)).boxed()
    }

    fn save_player(&self, record: PlayerRecord) -> StoreFuture<()> {
        write_json(self.player_path(record.id), record).boxed()
    }

    fn load_account(&self, username: &str) -> StoreFuture<Option<AccountRecord>> {
        match self.account_path(username) {
            Ok(path) => read_json(path).boxed(),
            Err(e) => ready(Err(e)).boxed(),
        }
    }

    fn save_account(&self, record: AccountRecord) -> StoreFuture<()> {
        match self.account_path(&record.username) {
            Ok(path) => write_json(path, record).boxed(),
            Err(e) => ready(Err(e)).boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{ContainerKind, Item};

    fn temp_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tileworld-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn test_missing_records_are_none() {
        let store = FsStore::new(temp_root("missing"));
        assert!(store.load_meta().await.unwrap().is_none());
        assert!(store.load_sector(0, SectorCoord::new(0, 0, 0)).await.unwrap().is_none());
        assert!(store.load_account("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_container_written_and_read_back() {
        let root = temp_root("container");
        let store = FsStore::new(&root);
        let record = ContainerRecord {
            kind: ContainerKind::Normal,
            items: vec![Some(Item::new(4, 3)), None],
        };
        store.save_container(9, record.clone()).await.unwrap();
        assert!(root.join("containers/9.json").exists());
        assert_eq!(store.load_container(9).await.unwrap(), Some(record));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_account_keys_stay_inside_root() {
        let root = temp_root("accounts");
        let store = FsStore::new(root.join("data"));
        for username in ["../../escaped", "a/b", "a\\b", ".."] {
            let record = AccountRecord {
                username: username.to_string(),
                password: "pw".to_string(),
                player_ids: Vec::new(),
            };
            assert!(matches!(store.save_account(record).await, Err(StoreError::InvalidKey(_))));
            assert!(matches!(store.load_account(username).await, Err(StoreError::InvalidKey(_))));
        }
        assert!(!root.join("escaped.json").exists());

        let record = AccountRecord {
            username: "Ada_1".to_string(),
            password: "pw".to_string(),
            player_ids: vec![3],
        };
        store.save_account(record.clone()).await.unwrap();
        assert!(root.join("data/accounts/ada_1.json").exists());
        assert_eq!(store.load_account("ada_1").await.unwrap(), Some(record));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_corrupt_sector_is_an_error() {
        let root = temp_root("corrupt");
        let store = FsStore::new(&root);
        let path = store.sector_path(0, SectorCoord::new(1, 1, 0));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            store.load_sector(0, SectorCoord::new(1, 1, 0)).await,
            Err(StoreError::Json(_))
        ));
        let _ = std::fs::remove_dir_all(&root);
    }
}
