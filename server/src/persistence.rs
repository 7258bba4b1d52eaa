//! `load`/`save` are the serving hot path; `list`/`delete`/`reset`/`exists` exist only for the
//! admin CLI. Room ids are sanitized to `[A-Za-z0-9_-]+` before touching storage.
use async_trait::async_trait;
use lively_protocol::{sanitize_room_id, Snapshot};
use std::collections::HashMap;
use std::path::PathBuf;

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load(&self, room_id: &str) -> std::io::Result<Option<Snapshot>>;
    async fn save(&self, room_id: &str, snapshot: &Snapshot) -> std::io::Result<()>;
    async fn list(&self) -> std::io::Result<Vec<String>>;
    async fn delete(&self, room_id: &str) -> std::io::Result<()>;
    async fn exists(&self, room_id: &str) -> std::io::Result<bool> {
        Ok(self.load(room_id).await?.is_some())
    }
    /// Resets a room to an empty snapshot rather than removing its persisted entry entirely.
    async fn reset(&self, room_id: &str) -> std::io::Result<()> {
        self.delete(room_id).await
    }
}

/// One JSON file per sanitized room id under a configured directory.
pub struct FsPersistence {
    dir: PathBuf,
}

impl FsPersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, room_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_room_id(room_id)))
    }
}

#[async_trait]
impl Persistence for FsPersistence {
    async fn load(&self, room_id: &str) -> std::io::Result<Option<Snapshot>> {
        let path = self.path_for(room_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot = serde_json::from_slice(&bytes).map_err(|e| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e)
                })?;
                Ok(Some(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn save(&self, room_id: &str, snapshot: &Snapshot) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(room_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await
    }

    async fn list(&self) -> std::io::Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.path().file_stem().and_then(|s| s.to_str()) {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, room_id: &str) -> std::io::Result<()> {
        match tokio::fs::remove_file(self.path_for(room_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// An in-memory adapter for tests and single-process demos.
#[derive(Default)]
pub struct InMemoryPersistence {
    rooms: parking_lot::Mutex<HashMap<String, Snapshot>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn load(&self, room_id: &str) -> std::io::Result<Option<Snapshot>> {
        Ok(self.rooms.lock().get(&sanitize_room_id(room_id)).cloned())
    }

    async fn save(&self, room_id: &str, snapshot: &Snapshot) -> std::io::Result<()> {
        self.rooms
            .lock()
            .insert(sanitize_room_id(room_id), snapshot.clone());
        Ok(())
    }

    async fn list(&self) -> std::io::Result<Vec<String>> {
        let mut ids: Vec<String> = self.rooms.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, room_id: &str) -> std::io::Result<()> {
        self.rooms.lock().remove(&sanitize_room_id(room_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_persistence_round_trips_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsPersistence::new(dir.path());
        assert!(store.load("room-1").await.unwrap().is_none());

        let snap = Snapshot::empty(42);
        store.save("room-1", &snap).await.unwrap();
        assert_eq!(store.load("room-1").await.unwrap(), Some(snap));
        assert!(store.exists("room-1").await.unwrap());

        assert_eq!(store.list().await.unwrap(), vec!["room-1".to_string()]);
        store.delete("room-1").await.unwrap();
        assert!(store.load("room-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn room_ids_are_sanitized_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsPersistence::new(dir.path());
        store.save("../../etc/passwd", &Snapshot::empty(1)).await.unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed, vec!["______etc_passwd".to_string()]);
    }

    #[tokio::test]
    async fn in_memory_persistence_round_trips() {
        let store = InMemoryPersistence::new();
        store.save("a", &Snapshot::empty(1)).await.unwrap();
        assert!(store.exists("a").await.unwrap());
        store.reset("a").await.unwrap();
        assert!(!store.exists("a").await.unwrap());
    }
}
