//! A process-wide registry mapping `roomId -> room actor`, created at server start and drained
//! at stop. Guarded by a mutex on create/evict only; the room actor itself serializes all
//! per-room work.
use crate::config::Config;
use crate::host::RoomHost;
use crate::persistence::Persistence;
use crate::room_actor::{RoomActor, RoomHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

pub struct RoomManager {
    rooms: Mutex<HashMap<String, RoomHandle>>,
    persistence: Arc<dyn Persistence>,
    host: Arc<dyn RoomHost>,
    config: Arc<Config>,
    self_weak: Weak<RoomManager>,
}

impl RoomManager {
    pub fn new(persistence: Arc<dyn Persistence>, host: Arc<dyn RoomHost>, config: Arc<Config>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            rooms: Mutex::new(HashMap::new()),
            persistence,
            host,
            config,
            self_weak: weak.clone(),
        })
    }

    /// Returns the handle for `room_id`, spawning a fresh room actor on first access.
    pub fn room(&self, room_id: &str) -> RoomHandle {
        if let Some(handle) = self.rooms.lock().get(room_id) {
            return handle.clone();
        }
        let mut rooms = self.rooms.lock();
        // re-check: another task may have created it while we were not holding the lock.
        if let Some(handle) = rooms.get(room_id) {
            return handle.clone();
        }
        let handle = RoomActor::spawn(
            room_id.to_string(),
            self.persistence.clone(),
            self.host.clone(),
            self.config.clone(),
            self.self_weak.clone(),
        );
        rooms.insert(room_id.to_string(), handle.clone());
        handle
    }

    /// Removes `room_id`'s handle. Called by a room actor right before it stops on idle
    /// eviction, so a later `room()` call spawns a fresh actor instead of handing back a dead
    /// handle whose channel no one is reading anymore.
    pub fn evict(&self, room_id: &str) {
        self.rooms.lock().remove(room_id);
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    /// Broadcasts `server:shutdown` to every room, flushes snapshots, and waits for each to
    /// confirm — bounded by `deadline`.
    pub async fn shutdown_all(&self, deadline: std::time::Duration) {
        let handles: Vec<RoomHandle> = self.rooms.lock().values().cloned().collect();
        let shutdowns = handles.iter().map(|h| h.shutdown());
        let all = futures::future::join_all(shutdowns);
        if tokio::time::timeout(deadline, all).await.is_err() {
            tracing::warn!("graceful shutdown deadline elapsed before all rooms confirmed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NoopHost;
    use crate::persistence::InMemoryPersistence;

    #[tokio::test]
    async fn room_is_created_on_demand_and_reused() {
        let manager = RoomManager::new(
            Arc::new(InMemoryPersistence::new()),
            Arc::new(NoopHost),
            Arc::new(Config::default()),
        );
        assert_eq!(manager.room_count(), 0);
        let _h1 = manager.room("a");
        assert_eq!(manager.room_count(), 1);
        let _h2 = manager.room("a");
        assert_eq!(manager.room_count(), 1);
        let _h3 = manager.room("b");
        assert_eq!(manager.room_count(), 2);
    }
}
