use std::sync::Arc;

use boba_adapters::MysqlBackend;
use boba_core::config::ClientConfig;
use boba_core::connection_manager::ConnectionManager;
use boba_core::driver::{DriverSettings, SessionDriver};
use boba_core::history::{FileHistoryStore, HistoryLog};
use boba_core::query_executor::QueryExecutor;
use boba_core::session::SessionState;
use boba_tui::{Osc52Clipboard, Theme, TuiError};
use tokio::runtime::Runtime;

pub fn run(runtime: &Runtime, config: &ClientConfig) -> Result<(), TuiError> {
    let (history_store, history) = load_history(config);

    let backend = Arc::new(MysqlBackend);
    let connections = ConnectionManager::new(Arc::clone(&backend), config.query.connect_timeout());
    let executor = QueryExecutor::new(backend, config.query.timeout());
    let theme = Theme::new(config.display.theme, config.display.max_column_width);
    let settings = DriverSettings {
        style: theme.table,
        export_dir: config.export.directory.clone(),
        history_store,
    };
    let session = SessionState::new(config.connection.clone(), config.display.page_size)
        .with_history(history);

    let mut driver = SessionDriver::new(
        session,
        connections,
        executor,
        settings,
        Box::new(Osc52Clipboard),
        runtime.handle().clone(),
    );
    let result = boba_tui::run(&mut driver, &theme);
    runtime.block_on(driver.shutdown());
    result
}

/// A broken history file costs the history, not the session.
fn load_history(config: &ClientConfig) -> (Option<FileHistoryStore>, HistoryLog) {
    if !config.history.persist {
        return (None, HistoryLog::new());
    }

    let store = match FileHistoryStore::load_default() {
        Ok(store) => store,
        Err(error) => {
            tracing::warn!(%error, "history file unavailable");
            return (None, HistoryLog::new());
        }
    };
    match store.load() {
        Ok(history) => {
            tracing::debug!(entries = history.len(), path = %store.path().display(), "history loaded");
            (Some(store), history)
        }
        Err(error) => {
            tracing::warn!(%error, "failed to load history");
            (Some(store), HistoryLog::new())
        }
    }
}
