pub mod error;
pub mod notification;
pub mod notifications;
pub mod scheduler;
pub mod siga;
pub mod state;
pub mod storage;
pub mod types;
pub mod util;

use std::sync::Arc;

use error::NotifyError;
use notification::{BrowserNavigator, DesktopToaster, LogNavigator, LogToaster, Navigator, Toaster};
use notifications::{AggregatorSettings, NotificationAggregator};
use siga::client::SigaClient;
use storage::{JsonFileStore, KeyValueStore};
use types::Config;

/// Application name shown on desktop toasts
pub const APP_NAME: &str = "SIGA";

/// Wire an aggregator for `config`: file-backed store under ~/.siga, the
/// HTTP client, and the toast/navigation sinks the config asks for.
pub fn build_aggregator(config: &Config) -> Result<Arc<NotificationAggregator>, NotifyError> {
    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(state::storage_path()?));
    build_aggregator_with_store(config, store)
}

pub fn build_aggregator_with_store(
    config: &Config,
    store: Arc<dyn KeyValueStore>,
) -> Result<Arc<NotificationAggregator>, NotifyError> {
    let client = SigaClient::new(config, store.clone())?;

    let toaster: Arc<dyn Toaster> = if config.desktop_toasts {
        Arc::new(DesktopToaster::new(APP_NAME))
    } else {
        Arc::new(LogToaster)
    };

    let navigator: Arc<dyn Navigator> = match config.app_url.as_deref() {
        Some(url) if !url.trim().is_empty() => Arc::new(BrowserNavigator::new(url)),
        _ => Arc::new(LogNavigator),
    };

    let settings = AggregatorSettings {
        tz: config.tz()?,
        quota_fallback: config.quota_max,
    };

    let aggregator = NotificationAggregator::new(Arc::new(client), store, settings)
        .with_toaster(toaster)
        .with_navigator(navigator);

    Ok(Arc::new(aggregator))
}
