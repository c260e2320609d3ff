//! Shared services owned by the core.
//!
//! One `SharedServices` value is constructed at init and passed down;
//! nothing in the core keeps module-level state. All lifecycles end when
//! the value is dropped.

use crate::bloom::NegativeCache;
use crate::cache::QueryCache;
use crate::config::CoreConfig;
use crate::error::CoreResult;
use crate::graph::store::GraphStore;
use crate::types::FileEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub struct SharedServices {
    pub config: Arc<CoreConfig>,
    pub store: Arc<GraphStore>,
    pub bloom: Arc<NegativeCache>,
    pub query_cache: Arc<QueryCache>,
    /// Workspace file-change fan-out (watcher -> caches, observers).
    pub events: broadcast::Sender<FileEvent>,
}

impl SharedServices {
    /// Open the persistent store under `.ontology/` and wire the caches.
    pub fn init(config: Arc<CoreConfig>) -> CoreResult<Self> {
        std::fs::create_dir_all(config.state_dir().join("cache"))?;
        let store = Arc::new(GraphStore::open(&config.db_path())?);
        Ok(Self::with_store(config, store))
    }

    /// Ephemeral services with an in-memory store (tests, one-shot CLI runs).
    pub fn init_in_memory(config: Arc<CoreConfig>) -> CoreResult<Self> {
        let store = Arc::new(GraphStore::open_in_memory()?);
        Ok(Self::with_store(config, store))
    }

    fn with_store(config: Arc<CoreConfig>, store: Arc<GraphStore>) -> Self {
        let (events, _) = broadcast::channel(256);
        let ttl = Duration::from_secs(config.cache.memory.ttl);
        let query_cache = Arc::new(QueryCache::new(config.cache.memory.max_size, ttl));
        Self {
            config,
            store,
            bloom: Arc::new(NegativeCache::new()),
            query_cache,
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<FileEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(CoreConfig::new(dir.path().to_path_buf()));
        let services = SharedServices::init(config).unwrap();
        assert!(dir.path().join(".ontology/ontology.db").exists());
        assert!(dir.path().join(".ontology/cache").exists());
        drop(services);
    }

    #[test]
    fn event_bus_fans_out() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(CoreConfig::new(dir.path().to_path_buf()));
        let services = SharedServices::init_in_memory(config).unwrap();
        let mut rx = services.subscribe_events();
        services
            .events
            .send(FileEvent::Modified { path: "a.ts".into() })
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), FileEvent::Modified { path: "a.ts".into() });
    }
}
