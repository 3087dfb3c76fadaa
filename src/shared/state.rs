use std::sync::Arc;

use crate::config::AppConfig;
use crate::notify::Notifier;
use crate::scheduler::ReportScheduler;
use crate::shared::utils::DbPool;

/// Shared application context handed to every handler. Core logic takes this
/// (or pieces of it) as a parameter; there is no global state.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub conn: DbPool,
    pub notifier: Notifier,
    pub scheduler: Arc<ReportScheduler>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("conn", &"DbPool")
            .field("notifier", &"Notifier")
            .field("scheduler", &"Arc<ReportScheduler>")
            .finish()
    }
}
