use crate::cache::SqliteCacheStore;
use crate::config::Config;
use crate::sessions::SessionRegistry;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: SqlitePool,
    pub cache: Arc<SqliteCacheStore>,
    pub sessions: Arc<SessionRegistry>,
    // Client du proxy PDF, partagé entre les requêtes.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        db: SqlitePool,
        cache: Arc<SqliteCacheStore>,
        sessions: Arc<SessionRegistry>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            db,
            cache,
            sessions,
            http,
        }
    }
}
