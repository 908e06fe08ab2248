use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::ConnectionConfig;
use crate::connection_manager::{ConnectionBackend, ConnectionError, ConnectionManager, ConnectionStatus};
use crate::export::export_result;
use crate::formatter::{render, TableStyle};
use crate::history::FileHistoryStore;
use crate::query_executor::{QueryBackend, QueryError, QueryExecutor, QueryOutcome};
use crate::session::{Effect, SessionEvent, SessionState, Ticket};

/// Destination for "copy" actions.
pub trait ClipboardSink: Send {
    fn set_text(&mut self, text: &str) -> io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub style: TableStyle,
    pub export_dir: PathBuf,
    pub history_store: Option<FileHistoryStore>,
}

enum Completion<C> {
    Connected {
        ticket: Ticket,
        config: ConnectionConfig,
        result: Result<(C, Duration), ConnectionError>,
    },
    Query {
        ticket: Ticket,
        result: Result<QueryOutcome, QueryError>,
    },
}

/// Owns the session and everything it talks to. Connects and queries run as
/// tasks on `runtime`; their completions are fed back into the session only
/// from `drain_completions`/`next_completion`, so session state is mutated by
/// one caller at a time.
pub struct SessionDriver<B: QueryBackend> {
    session: SessionState,
    connections: ConnectionManager<B>,
    executor: QueryExecutor<B>,
    settings: DriverSettings,
    clipboard: Box<dyn ClipboardSink>,
    runtime: Handle,
    completions_tx: UnboundedSender<Completion<<B as ConnectionBackend>::Connection>>,
    completions_rx: UnboundedReceiver<Completion<<B as ConnectionBackend>::Connection>>,
}

impl<B: QueryBackend> SessionDriver<B> {
    #[must_use]
    pub fn new(
        session: SessionState,
        connections: ConnectionManager<B>,
        executor: QueryExecutor<B>,
        settings: DriverSettings,
        clipboard: Box<dyn ClipboardSink>,
        runtime: Handle,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            session,
            connections,
            executor,
            settings,
            clipboard,
            runtime,
            completions_tx,
            completions_rx,
        }
    }

    #[must_use]
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.connections.status()
    }

    #[must_use]
    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn dispatch(&mut self, event: SessionEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for effect in self.session.handle(event) {
                if let Some(follow_up) = self.apply(effect) {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    /// Feeds every completion that has already arrived into the session.
    /// Returns `true` when at least one was applied.
    pub fn drain_completions(&mut self) -> bool {
        let mut applied = false;
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.complete(completion);
            applied = true;
        }
        applied
    }

    /// Waits for the next completion and applies it.
    pub async fn next_completion(&mut self) -> bool {
        match self.completions_rx.recv().await {
            Some(completion) => {
                self.complete(completion);
                true
            }
            None => false,
        }
    }

    pub async fn shutdown(&mut self) {
        self.connections.close().await;
    }

    fn apply(&mut self, effect: Effect) -> Option<SessionEvent> {
        match effect {
            Effect::Connect { ticket, config } => {
                self.spawn_connect(ticket, config);
                None
            }
            Effect::RunQuery { ticket, sql } => {
                let Some(connection) = self.connections.current().cloned() else {
                    return Some(SessionEvent::QueryFinished {
                        ticket,
                        result: Err(QueryError::Execution("not connected".to_string())),
                    });
                };
                let executor = self.executor.clone();
                let completions = self.completions_tx.clone();
                self.runtime.spawn(async move {
                    let result = executor.execute(&connection, &sql).await;
                    let _ = completions.send(Completion::Query { ticket, result });
                });
                None
            }
            Effect::Copy { format, result } => {
                let text = render(format, &result, &self.settings.style);
                let outcome = self
                    .clipboard
                    .set_text(&text)
                    .map(|()| result.row_count())
                    .map_err(|error| error.to_string());
                if let Err(error) = &outcome {
                    tracing::warn!(%error, "clipboard copy failed");
                }
                Some(SessionEvent::Copied {
                    format,
                    result: outcome,
                })
            }
            Effect::Export { format, result } => {
                let outcome = export_result(&self.settings.export_dir, format, &result, &self.settings.style);
                if let Err(error) = &outcome {
                    tracing::warn!(%error, "export failed");
                }
                Some(SessionEvent::Exported(outcome))
            }
            Effect::RecordHistory(entry) => {
                if let Some(store) = &self.settings.history_store {
                    if let Err(error) = store.append(&entry) {
                        tracing::warn!(%error, "failed to persist history entry");
                    }
                }
                None
            }
            Effect::Quit => {
                tracing::info!("quit requested");
                None
            }
        }
    }

    fn spawn_connect(&self, ticket: Ticket, config: ConnectionConfig) {
        let backend = self.connections.backend();
        let connect_timeout = self.connections.connect_timeout();
        let completions = self.completions_tx.clone();
        tracing::info!(addr = %config.target(), user = %config.user, "connecting");
        self.runtime.spawn(async move {
            let result = ConnectionManager::<B>::open(backend.as_ref(), &config, connect_timeout).await;
            let _ = completions.send(Completion::Connected {
                ticket,
                config,
                result,
            });
        });
    }

    fn complete(&mut self, completion: Completion<<B as ConnectionBackend>::Connection>) {
        let event = match completion {
            Completion::Connected {
                ticket,
                config,
                result,
            } => {
                let result = match result {
                    Ok((handle, latency)) => {
                        tracing::info!(addr = %config.target(), ?latency, "connected");
                        self.install(config, handle, latency);
                        Ok(latency)
                    }
                    Err(error) => {
                        tracing::warn!(addr = %config.target(), %error, "connect failed");
                        Err(error)
                    }
                };
                SessionEvent::Connected { ticket, result }
            }
            Completion::Query { ticket, result } => SessionEvent::QueryFinished { ticket, result },
        };
        self.dispatch(event);
    }

    fn install(&mut self, config: ConnectionConfig, handle: B::Connection, latency: Duration) {
        let Some(previous) = self.connections.install(config, handle, latency) else {
            return;
        };
        let backend = self.connections.backend();
        self.runtime.spawn(async move {
            if let Err(error) = backend.disconnect(previous).await {
                tracing::warn!(%error, "failed to close replaced connection");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::runtime::Handle;

    use super::{ClipboardSink, DriverSettings, SessionDriver};
    use crate::config::ConnectionConfig;
    use crate::connection_manager::{BackendError, ConnectFailureKind, ConnectionManager};
    use crate::formatter::TableStyle;
    use crate::history::FileHistoryStore;
    use crate::query_executor::testing::ScriptedBackend;
    use crate::query_executor::{QueryExecutor, Rowset};
    use crate::session::{Key, SessionEvent, SessionState, SessionView};
    use crate::value::CellValue;

    #[derive(Debug, Clone, Default)]
    struct RecordingClipboard(Arc<Mutex<Vec<String>>>);

    impl ClipboardSink for RecordingClipboard {
        fn set_text(&mut self, text: &str) -> io::Result<()> {
            self.0.lock().expect("clipboard lock").push(text.to_string());
            Ok(())
        }
    }

    struct FailingClipboard;

    impl ClipboardSink for FailingClipboard {
        fn set_text(&mut self, _text: &str) -> io::Result<()> {
            Err(io::Error::other("no terminal"))
        }
    }

    fn users_backend() -> ScriptedBackend {
        ScriptedBackend::default().with_read(
            "SELECT id, name FROM users",
            Rowset {
                columns: vec!["id".to_string(), "name".to_string()],
                rows: vec![
                    vec![CellValue::Integer(1), CellValue::from("ada")],
                    vec![CellValue::Integer(2), CellValue::Null],
                ],
            },
        )
    }

    fn driver(
        backend: ScriptedBackend,
        clipboard: Box<dyn ClipboardSink>,
        temp_dir: &TempDir,
    ) -> SessionDriver<ScriptedBackend> {
        let backend = Arc::new(backend);
        SessionDriver::new(
            SessionState::new(ConnectionConfig::new("127.0.0.1", "root", "app"), 20),
            ConnectionManager::new(Arc::clone(&backend), Duration::from_secs(5)),
            QueryExecutor::new(backend, Duration::from_secs(5)),
            DriverSettings {
                style: TableStyle::default(),
                export_dir: temp_dir.path().to_path_buf(),
                history_store: Some(FileHistoryStore::from_path(
                    temp_dir.path().join("history.ndjson"),
                )),
            },
            clipboard,
            Handle::current(),
        )
    }

    fn press(driver: &mut SessionDriver<ScriptedBackend>, key: Key) {
        driver.dispatch(SessionEvent::Key(key));
    }

    fn type_text(driver: &mut SessionDriver<ScriptedBackend>, text: &str) {
        for ch in text.chars() {
            press(driver, Key::Char(ch));
        }
    }

    async fn connect_and_query(driver: &mut SessionDriver<ScriptedBackend>) {
        press(driver, Key::Enter);
        assert!(driver.next_completion().await);
        assert!(driver.connection_status().is_connected);

        press(driver, Key::Enter);
        type_text(driver, "SELECT id, name FROM users;");
        press(driver, Key::Enter);
        assert!(driver.session().is_busy());
        assert!(driver.next_completion().await);
        assert!(!driver.session().is_busy());
    }

    #[tokio::test]
    async fn connect_then_query_populates_free_query_view() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut driver = driver(users_backend(), Box::new(RecordingClipboard::default()), &temp_dir);
        connect_and_query(&mut driver).await;

        let SessionView::FreeQuery(view) = driver.session().view() else {
            panic!("expected query view");
        };
        let rows = view.rows().expect("read result");
        assert_eq!(rows.rows(), &[vec!["1", "ada"], vec!["2", "NULL"]]);

        let history = FileHistoryStore::from_path(temp_dir.path().join("history.ndjson"))
            .load()
            .expect("history load");
        assert_eq!(history.all()[0].text, "SELECT id, name FROM users");
    }

    #[tokio::test]
    async fn copy_sends_rendered_text_to_clipboard() {
        let temp_dir = TempDir::new().expect("temp dir");
        let clipboard = RecordingClipboard::default();
        let mut driver = driver(users_backend(), Box::new(clipboard.clone()), &temp_dir);
        connect_and_query(&mut driver).await;

        press(&mut driver, Key::Ctrl('e'));
        press(&mut driver, Key::Down);
        press(&mut driver, Key::Enter);

        let copied = clipboard.0.lock().expect("clipboard lock").clone();
        assert_eq!(copied, vec!["id,name\n1,ada\n2,NULL\n".to_string()]);
        assert_eq!(driver.session().notice(), Some("Copied 2 rows as CSV"));
    }

    #[tokio::test]
    async fn clipboard_failure_is_reported_as_notice() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut driver = driver(users_backend(), Box::new(FailingClipboard), &temp_dir);
        connect_and_query(&mut driver).await;

        press(&mut driver, Key::Ctrl('e'));
        press(&mut driver, Key::Enter);
        assert_eq!(driver.session().notice(), Some("Copy failed: no terminal"));
        assert!(driver.session().last_result().is_some());
    }

    #[tokio::test]
    async fn export_writes_timestamped_file() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut driver = driver(users_backend(), Box::new(RecordingClipboard::default()), &temp_dir);
        connect_and_query(&mut driver).await;

        press(&mut driver, Key::Ctrl('e'));
        for _ in 0..4 {
            press(&mut driver, Key::Down);
        }
        press(&mut driver, Key::Enter);

        let exported: Vec<_> = fs::read_dir(temp_dir.path())
            .expect("read temp dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("export_") && name.ends_with(".csv"))
            .collect();
        assert_eq!(exported.len(), 1, "{exported:?}");
        assert!(driver
            .session()
            .notice()
            .is_some_and(|notice| notice.starts_with("Exported 2 rows to")));
    }

    #[tokio::test]
    async fn failed_connect_keeps_form_and_stays_disconnected() {
        let temp_dir = TempDir::new().expect("temp dir");
        let backend = ScriptedBackend {
            fail_connect: Some(BackendError::new(ConnectFailureKind::Refused, "no route")),
            ..ScriptedBackend::default()
        };
        let mut driver = driver(backend, Box::new(RecordingClipboard::default()), &temp_dir);

        press(&mut driver, Key::Enter);
        assert!(driver.next_completion().await);
        let SessionView::Connecting { error, .. } = driver.session().view() else {
            panic!("expected connect view");
        };
        assert_eq!(error.as_deref(), Some("connection refused: no route"));
        assert!(!driver.connection_status().is_connected);
    }

    #[tokio::test]
    async fn shutdown_closes_connection() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut driver = driver(users_backend(), Box::new(RecordingClipboard::default()), &temp_dir);
        press(&mut driver, Key::Enter);
        driver.next_completion().await;
        assert!(driver.connection_status().is_connected);

        driver.shutdown().await;
        assert!(!driver.connection_status().is_connected);
    }
}
