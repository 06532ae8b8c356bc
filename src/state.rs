use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::repository::dataset_store::DataStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<DataStore>,
}

impl AppState {
    pub async fn build(config: AppConfig) -> AppResult<Self> {
        let store = DataStore::load(config.dataset_path.as_deref(), config.dataset_autosave).await?;
        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
        })
    }
}
