use sqlx::SqlitePool;
use std::sync::Arc;

use sc2sentry_backend::config::AppConfig;

pub struct AppState {
    pub db: SqlitePool,
    /// Immutable settings snapshot / 配置快照
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: Arc<AppConfig>) -> Self {
        Self { db, config }
    }
}
