use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

/// Shared handler state: configuration plus the one database client built at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: SupabaseClient,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let db = SupabaseClient::new(&config);
        Self {
            config: Arc::new(config),
            db,
        }
    }
}
