use crate::config::Config;
use crate::db::Database;
use crate::failure_log::FailureLog;
use crate::store::{ConvertSingleflight, DerivativeStore};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub store: DerivativeStore,
    pub singleflight: ConvertSingleflight,
    pub convert_semaphore: Arc<Semaphore>,
    pub failure_log: Option<FailureLog>,
}

impl AppState {
    pub fn new(config: Config, db: Database, failure_log: Option<FailureLog>) -> Self {
        let store = DerivativeStore::new(db.clone());
        let convert_semaphore = Arc::new(Semaphore::new(config.max_concurrent_conversions));
        Self {
            config: Arc::new(config),
            db,
            store,
            singleflight: ConvertSingleflight::new(),
            convert_semaphore,
            failure_log,
        }
    }

    pub async fn record_conversion_failure(
        &self,
        asset_id: &str,
        source_format: &str,
        target_format: &str,
        is_dark: bool,
        reason: String,
    ) {
        if let Some(log) = self.failure_log.as_ref() {
            log.write(crate::failure_log::ConversionFailureEntry::new(
                asset_id,
                source_format,
                target_format,
                is_dark,
                reason,
            ))
            .await;
        }
    }
}
