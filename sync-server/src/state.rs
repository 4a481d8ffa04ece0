use std::sync::Arc;

use crate::config::AppConfig;
use crate::content_store::ContentStore;
use crate::db::connection::DbPool;
use crate::services::chunk_manager::ChunkManager;
use crate::ws::push::PushRegistry;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub store: ContentStore,
    pub chunks: Arc<ChunkManager>,
    pub push: PushRegistry,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let store = ContentStore::new(config.storage_base_path.clone());
        let chunks = Arc::new(ChunkManager::new(
            db.clone(),
            store.clone(),
            config.max_concurrent_chunk_sessions,
        ));
        Self {
            db,
            config,
            store,
            chunks,
            push: PushRegistry::new(),
        }
    }
}
