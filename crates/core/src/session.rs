use std::mem;
use std::time::Duration;

use crate::config::{ConnectionConfig, OutputFormat};
use crate::connection_manager::{validate, ConnectionError};
use crate::export::{ExportError, ExportReceipt};
use crate::history::{HistoryEntry, HistoryLog};
use crate::pagination::PaginationWindow;
use crate::query_executor::{normalize_query_text, ExecSummary, QueryError, QueryOutcome, QueryResult};
use crate::sql::{count_rows_sql, describe_table_sql, offset_page_sql, TableName, SHOW_TABLES_SQL};

pub type Ticket = u64;

pub const BUSY_NOTICE: &str = "Busy: wait for the running request to finish";

/// Terminal-independent key presses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Ctrl(char),
    F(u8),
    Enter,
    Backspace,
    Esc,
    Tab,
    BackTab,
    Up,
    Down,
    Left,
    Right,
    PageUp,
    PageDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPurpose {
    FreeQuery,
    TableList,
    TableCount { table: String },
    TablePage { table: String, window: PaginationWindow },
}

#[derive(Debug)]
pub enum SessionEvent {
    Key(Key),
    Connected {
        ticket: Ticket,
        result: Result<Duration, ConnectionError>,
    },
    QueryFinished {
        ticket: Ticket,
        result: Result<QueryOutcome, QueryError>,
    },
    Copied {
        format: OutputFormat,
        result: Result<usize, String>,
    },
    Exported(Result<ExportReceipt, ExportError>),
}

/// Work the session asks its driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Connect {
        ticket: Ticket,
        config: ConnectionConfig,
    },
    RunQuery {
        ticket: Ticket,
        sql: String,
    },
    Copy {
        format: OutputFormat,
        result: QueryResult,
    },
    Export {
        format: OutputFormat,
        result: QueryResult,
    },
    RecordHistory(HistoryEntry),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectField {
    Host,
    Port,
    User,
    Password,
    Database,
}

impl ConnectField {
    pub const ALL: [Self; 5] = [
        Self::Host,
        Self::Port,
        Self::User,
        Self::Password,
        Self::Database,
    ];

    fn next(self) -> Self {
        match self {
            Self::Host => Self::Port,
            Self::Port => Self::User,
            Self::User => Self::Password,
            Self::Password => Self::Database,
            Self::Database => Self::Host,
        }
    }

    fn previous(self) -> Self {
        match self {
            Self::Host => Self::Database,
            Self::Port => Self::Host,
            Self::User => Self::Port,
            Self::Password => Self::User,
            Self::Database => Self::Password,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Host => "Host",
            Self::Port => "Port",
            Self::User => "User",
            Self::Password => "Password",
            Self::Database => "Database",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectForm {
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub active: ConnectField,
}

impl ConnectForm {
    #[must_use]
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port.to_string(),
            user: config.user.clone(),
            password: config.password.clone().unwrap_or_default(),
            database: config.database.clone(),
            active: ConnectField::Host,
        }
    }

    #[must_use]
    pub fn value(&self, field: ConnectField) -> &str {
        match field {
            ConnectField::Host => &self.host,
            ConnectField::Port => &self.port,
            ConnectField::User => &self.user,
            ConnectField::Password => &self.password,
            ConnectField::Database => &self.database,
        }
    }

    /// Field text as shown on screen; the password is masked.
    #[must_use]
    pub fn display_value(&self, field: ConnectField) -> String {
        match field {
            ConnectField::Password => "*".repeat(self.password.chars().count()),
            other => self.value(other).to_string(),
        }
    }

    fn value_mut(&mut self, field: ConnectField) -> &mut String {
        match field {
            ConnectField::Host => &mut self.host,
            ConnectField::Port => &mut self.port,
            ConnectField::User => &mut self.user,
            ConnectField::Password => &mut self.password,
            ConnectField::Database => &mut self.database,
        }
    }

    pub fn to_config(&self) -> Result<ConnectionConfig, ConnectionError> {
        let port = self.port.trim().parse::<u16>().map_err(|_| {
            ConnectionError::InvalidConfig(format!("invalid port `{}`", self.port.trim()))
        })?;
        let config = ConnectionConfig {
            host: self.host.trim().to_string(),
            port,
            user: self.user.trim().to_string(),
            password: (!self.password.is_empty()).then(|| self.password.clone()),
            database: self.database.trim().to_string(),
        };
        validate(&config)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItem {
    RunQuery,
    BrowseTables,
    History,
    Help,
    Reconnect,
    Quit,
}

impl MenuItem {
    pub const ALL: [Self; 6] = [
        Self::RunQuery,
        Self::BrowseTables,
        Self::History,
        Self::Help,
        Self::Reconnect,
        Self::Quit,
    ];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::RunQuery => "Run query",
            Self::BrowseTables => "Browse tables",
            Self::History => "History",
            Self::Help => "Help",
            Self::Reconnect => "Reconnect",
            Self::Quit => "Quit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Copy,
    Export,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferAction {
    pub kind: TransferKind,
    pub format: OutputFormat,
}

impl TransferAction {
    pub const ALL: [Self; 8] = [
        Self::copy(OutputFormat::Table),
        Self::copy(OutputFormat::Csv),
        Self::copy(OutputFormat::Json),
        Self::copy(OutputFormat::Markdown),
        Self::export(OutputFormat::Csv),
        Self::export(OutputFormat::Json),
        Self::export(OutputFormat::Markdown),
        Self::export(OutputFormat::Table),
    ];

    const fn copy(format: OutputFormat) -> Self {
        Self {
            kind: TransferKind::Copy,
            format,
        }
    }

    const fn export(format: OutputFormat) -> Self {
        Self {
            kind: TransferKind::Export,
            format,
        }
    }

    #[must_use]
    pub fn label(self) -> String {
        match self.kind {
            TransferKind::Copy => format!("Copy as {}", self.format.label()),
            TransferKind::Export => format!(
                "Export {} to .{} file",
                self.format.label(),
                self.format.extension()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreeQueryOutcome {
    Rows {
        result: QueryResult,
        window: PaginationWindow,
    },
    Write(ExecSummary),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeQueryView {
    pub input: String,
    pub outcome: Option<FreeQueryOutcome>,
    pub error: Option<String>,
    /// Ticket of the query this view submitted and has not seen finish.
    pub awaiting: Option<Ticket>,
}

impl FreeQueryView {
    #[must_use]
    pub fn with_input(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn rows(&self) -> Option<&QueryResult> {
        match &self.outcome {
            Some(FreeQueryOutcome::Rows { result, .. }) => Some(result),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableListView {
    pub tables: Vec<String>,
    pub selected: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBrowseView {
    pub table: String,
    pub window: PaginationWindow,
    pub result: Option<QueryResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionView {
    Connecting {
        form: ConnectForm,
        error: Option<String>,
    },
    MainMenu {
        selected: usize,
    },
    FreeQuery(FreeQueryView),
    TableList(TableListView),
    TableBrowse(TableBrowseView),
    HistoryView {
        selected: usize,
        return_to: Box<SessionView>,
    },
    CopyExportMenu {
        selected: usize,
        snapshot: QueryResult,
        return_to: Box<SessionView>,
    },
    HelpView {
        return_to: Box<SessionView>,
    },
}

impl SessionView {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting { .. } => "Connect",
            Self::MainMenu { .. } => "Main menu",
            Self::FreeQuery(_) => "Query",
            Self::TableList(_) => "Tables",
            Self::TableBrowse(_) => "Browse",
            Self::HistoryView { .. } => "History",
            Self::CopyExportMenu { .. } => "Copy / export",
            Self::HelpView { .. } => "Help",
        }
    }

    /// The view underneath any overlays.
    #[must_use]
    pub fn base(&self) -> &SessionView {
        match self {
            Self::HistoryView { return_to, .. }
            | Self::CopyExportMenu { return_to, .. }
            | Self::HelpView { return_to } => return_to.base(),
            other => other,
        }
    }

    fn base_mut(&mut self) -> &mut SessionView {
        match self {
            Self::HistoryView { return_to, .. }
            | Self::CopyExportMenu { return_to, .. }
            | Self::HelpView { return_to } => return_to.base_mut(),
            other => other,
        }
    }

    fn is_help(&self) -> bool {
        matches!(self, Self::HelpView { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingWork {
    Connect(ConnectionConfig),
    Query(QueryPurpose),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingRequest {
    ticket: Ticket,
    work: PendingWork,
}

/// The modal controller. It never performs I/O: every input yields the
/// effects a driver must run, and their completions come back as events.
#[derive(Debug)]
pub struct SessionState {
    view: SessionView,
    history: HistoryLog,
    pending: Option<PendingRequest>,
    next_ticket: Ticket,
    draft: ConnectionConfig,
    active: Option<ConnectionConfig>,
    last_result: Option<QueryResult>,
    notice: Option<String>,
    page_size: usize,
    should_quit: bool,
}

impl SessionState {
    #[must_use]
    pub fn new(draft: ConnectionConfig, page_size: usize) -> Self {
        Self {
            view: SessionView::Connecting {
                form: ConnectForm::from_config(&draft),
                error: None,
            },
            history: HistoryLog::new(),
            pending: None,
            next_ticket: 1,
            draft,
            active: None,
            last_result: None,
            notice: None,
            page_size: page_size.max(1),
            should_quit: false,
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: HistoryLog) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn view(&self) -> &SessionView {
        &self.view
    }

    #[must_use]
    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    #[must_use]
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn pending_query(&self) -> Option<&QueryPurpose> {
        match &self.pending {
            Some(PendingRequest {
                work: PendingWork::Query(purpose),
                ..
            }) => Some(purpose),
            _ => None,
        }
    }

    #[must_use]
    pub fn active_connection(&self) -> Option<&ConnectionConfig> {
        self.active.as_ref()
    }

    /// Most recent rows produced by a free query or a table page.
    #[must_use]
    pub fn last_result(&self) -> Option<&QueryResult> {
        self.last_result.as_ref()
    }

    #[must_use]
    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.should_quit {
            return effects;
        }

        match event {
            SessionEvent::Key(key) => {
                self.notice = None;
                self.on_key(key, &mut effects);
            }
            SessionEvent::Connected { ticket, result } => self.on_connected(ticket, result),
            SessionEvent::QueryFinished { ticket, result } => {
                self.on_query_finished(ticket, result, &mut effects);
            }
            SessionEvent::Copied { format, result } => {
                self.notice = Some(match result {
                    Ok(rows) => format!("Copied {rows} rows as {}", format.label()),
                    Err(error) => format!("Copy failed: {error}"),
                });
            }
            SessionEvent::Exported(result) => {
                self.notice = Some(match result {
                    Ok(receipt) => {
                        format!("Exported {} rows to {}", receipt.rows, receipt.path.display())
                    }
                    Err(error) => format!("Export failed: {error}"),
                });
            }
        }
        effects
    }

    fn on_key(&mut self, key: Key, effects: &mut Vec<Effect>) {
        if key == Key::Ctrl('q') {
            self.quit(effects);
            return;
        }

        let view = mem::replace(&mut self.view, SessionView::MainMenu { selected: 0 });
        if key == Key::F(1) && !view.is_help() {
            self.view = SessionView::HelpView {
                return_to: Box::new(view),
            };
            return;
        }

        let before = view.name();
        self.view = match view {
            SessionView::Connecting { form, error } => self.connecting_key(form, error, key, effects),
            SessionView::MainMenu { selected } => self.main_menu_key(selected, key, effects),
            SessionView::FreeQuery(view) => self.free_query_key(view, key, effects),
            SessionView::TableList(view) => self.table_list_key(view, key, effects),
            SessionView::TableBrowse(view) => self.table_browse_key(view, key, effects),
            SessionView::HistoryView {
                selected,
                return_to,
            } => self.history_key(selected, return_to, key, effects),
            SessionView::CopyExportMenu {
                selected,
                snapshot,
                return_to,
            } => self.copy_export_key(selected, snapshot, return_to, key, effects),
            SessionView::HelpView { return_to } => self.help_key(return_to, key, effects),
        };

        if before != self.view.name() {
            tracing::debug!(from = before, to = self.view.name(), "view changed");
        }
    }

    fn quit(&mut self, effects: &mut Vec<Effect>) {
        self.should_quit = true;
        effects.push(Effect::Quit);
    }

    fn issue_ticket(&mut self) -> Ticket {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    fn reject_if_busy(&mut self) -> bool {
        if self.pending.is_some() {
            self.notice = Some(BUSY_NOTICE.to_string());
            return true;
        }
        false
    }

    fn begin_query(
        &mut self,
        purpose: QueryPurpose,
        sql: String,
        effects: &mut Vec<Effect>,
    ) -> Option<Ticket> {
        if self.reject_if_busy() {
            return None;
        }
        let ticket = self.issue_ticket();
        tracing::debug!(ticket, ?purpose, "query submitted");
        self.pending = Some(PendingRequest {
            ticket,
            work: PendingWork::Query(purpose),
        });
        effects.push(Effect::RunQuery { ticket, sql });
        Some(ticket)
    }

    /// Releases the busy state when `ticket` matches the request in flight.
    fn take_pending(&mut self, ticket: Ticket) -> Option<PendingWork> {
        match &self.pending {
            Some(pending) if pending.ticket == ticket => self.pending.take().map(|pending| pending.work),
            _ => {
                tracing::debug!(ticket, "ignoring completion for unknown ticket");
                None
            }
        }
    }

    fn help_overlay(view: SessionView) -> SessionView {
        SessionView::HelpView {
            return_to: Box::new(view),
        }
    }

    fn connecting_key(
        &mut self,
        mut form: ConnectForm,
        mut error: Option<String>,
        key: Key,
        effects: &mut Vec<Effect>,
    ) -> SessionView {
        match key {
            Key::Tab | Key::Down => form.active = form.active.next(),
            Key::BackTab | Key::Up => form.active = form.active.previous(),
            Key::Backspace => {
                form.value_mut(form.active).pop();
            }
            Key::Char(ch) => form.value_mut(form.active).push(ch),
            Key::Esc if self.active.is_some() => return SessionView::MainMenu { selected: 0 },
            Key::Enter => {
                if !self.reject_if_busy() {
                    match form.to_config() {
                        Ok(config) => {
                            let ticket = self.issue_ticket();
                            tracing::debug!(ticket, addr = %config.target(), "connect submitted");
                            self.draft = config.clone();
                            self.pending = Some(PendingRequest {
                                ticket,
                                work: PendingWork::Connect(config.clone()),
                            });
                            effects.push(Effect::Connect { ticket, config });
                            error = None;
                        }
                        Err(invalid) => error = Some(invalid.to_string()),
                    }
                }
            }
            _ => {}
        }
        SessionView::Connecting { form, error }
    }

    fn main_menu_key(&mut self, selected: usize, key: Key, effects: &mut Vec<Effect>) -> SessionView {
        let last = MenuItem::ALL.len() - 1;
        match key {
            Key::Up | Key::Char('k') => SessionView::MainMenu {
                selected: selected.saturating_sub(1),
            },
            Key::Down | Key::Char('j') => SessionView::MainMenu {
                selected: (selected + 1).min(last),
            },
            Key::Char('q') => {
                self.quit(effects);
                SessionView::MainMenu { selected }
            }
            Key::Char('?') => Self::help_overlay(SessionView::MainMenu { selected }),
            Key::Enter => self.activate_menu_item(selected.min(last), effects),
            _ => SessionView::MainMenu { selected },
        }
    }

    fn activate_menu_item(&mut self, selected: usize, effects: &mut Vec<Effect>) -> SessionView {
        let menu = SessionView::MainMenu { selected };
        match MenuItem::ALL[selected] {
            MenuItem::RunQuery => SessionView::FreeQuery(FreeQueryView::default()),
            MenuItem::BrowseTables => {
                if self
                    .begin_query(QueryPurpose::TableList, SHOW_TABLES_SQL.to_string(), effects)
                    .is_some()
                {
                    SessionView::TableList(TableListView::default())
                } else {
                    menu
                }
            }
            MenuItem::History => self.history_overlay(menu),
            MenuItem::Help => Self::help_overlay(menu),
            MenuItem::Reconnect => SessionView::Connecting {
                form: ConnectForm::from_config(self.active.as_ref().unwrap_or(&self.draft)),
                error: None,
            },
            MenuItem::Quit => {
                self.quit(effects);
                menu
            }
        }
    }

    fn history_overlay(&self, return_to: SessionView) -> SessionView {
        SessionView::HistoryView {
            selected: self.history.len().saturating_sub(1),
            return_to: Box::new(return_to),
        }
    }

    fn submit_free_query(&mut self, view: &mut FreeQueryView, effects: &mut Vec<Effect>) {
        let text = normalize_query_text(&view.input).to_string();
        if text.is_empty() {
            view.error = Some("Enter a query to run".to_string());
            return;
        }
        let Some(ticket) = self.begin_query(QueryPurpose::FreeQuery, text.clone(), effects) else {
            return;
        };
        view.awaiting = Some(ticket);
        view.error = None;
        if let Some(entry) = self.history.append(text) {
            effects.push(Effect::RecordHistory(entry.clone()));
        }
    }

    fn free_query_key(
        &mut self,
        mut view: FreeQueryView,
        key: Key,
        effects: &mut Vec<Effect>,
    ) -> SessionView {
        match key {
            Key::Esc => return SessionView::MainMenu { selected: 0 },
            Key::Enter => self.submit_free_query(&mut view, effects),
            Key::Backspace => {
                view.input.pop();
            }
            Key::Char(ch) => view.input.push(ch),
            Key::Ctrl('l') => {
                view.input.clear();
                view.error = None;
            }
            Key::Ctrl('r') => return self.history_overlay(SessionView::FreeQuery(view)),
            Key::Ctrl('e') => {
                if let Some(snapshot) = view.rows().or(self.last_result.as_ref()).cloned() {
                    return SessionView::CopyExportMenu {
                        selected: 0,
                        snapshot,
                        return_to: Box::new(SessionView::FreeQuery(view)),
                    };
                }
                self.notice = Some("Run a query that returns rows first".to_string());
            }
            Key::PageDown | Key::PageUp => {
                if let Some(FreeQueryOutcome::Rows { window, .. }) = &mut view.outcome {
                    *window = if key == Key::PageDown {
                        window.next()
                    } else {
                        window.prev()
                    };
                }
            }
            _ => {}
        }
        SessionView::FreeQuery(view)
    }

    fn table_list_key(
        &mut self,
        mut view: TableListView,
        key: Key,
        effects: &mut Vec<Effect>,
    ) -> SessionView {
        match key {
            Key::Esc => return SessionView::MainMenu { selected: 0 },
            Key::Char('q') => self.quit(effects),
            Key::Char('?') => return Self::help_overlay(SessionView::TableList(view)),
            Key::Up | Key::Char('k') => view.selected = view.selected.saturating_sub(1),
            Key::Down | Key::Char('j') => {
                view.selected = (view.selected + 1).min(view.tables.len().saturating_sub(1));
            }
            Key::Char('r') | Key::F(5) => {
                self.begin_query(QueryPurpose::TableList, SHOW_TABLES_SQL.to_string(), effects);
            }
            Key::Enter => {
                let Some(table) = view.tables.get(view.selected).cloned() else {
                    return SessionView::TableList(view);
                };
                match TableName::new(&table).map(count_rows_sql) {
                    Ok(sql) => {
                        let purpose = QueryPurpose::TableCount {
                            table: table.clone(),
                        };
                        if self.begin_query(purpose, sql, effects).is_some() {
                            return SessionView::TableBrowse(TableBrowseView {
                                table,
                                window: PaginationWindow::first(0, self.page_size),
                                result: None,
                                error: None,
                            });
                        }
                    }
                    Err(error) => view.error = Some(error.to_string()),
                }
            }
            Key::Char('d') => {
                let Some(table) = view.tables.get(view.selected) else {
                    return SessionView::TableList(view);
                };
                match TableName::new(table).map(describe_table_sql) {
                    Ok(sql) => {
                        let mut query = FreeQueryView::with_input(sql);
                        self.submit_free_query(&mut query, effects);
                        return SessionView::FreeQuery(query);
                    }
                    Err(error) => view.error = Some(error.to_string()),
                }
            }
            _ => {}
        }
        SessionView::TableList(view)
    }

    fn request_page(&mut self, table: &str, window: PaginationWindow, effects: &mut Vec<Effect>) -> Result<(), String> {
        let sql = TableName::new(table)
            .map(|name| offset_page_sql(name, window.limit(), window.offset()))
            .map_err(|error| error.to_string())?;
        let purpose = QueryPurpose::TablePage {
            table: table.to_string(),
            window,
        };
        self.begin_query(purpose, sql, effects);
        Ok(())
    }

    fn table_browse_key(
        &mut self,
        mut view: TableBrowseView,
        key: Key,
        effects: &mut Vec<Effect>,
    ) -> SessionView {
        let target = match key {
            Key::Esc => return SessionView::MainMenu { selected: 0 },
            Key::Char('q') => {
                self.quit(effects);
                None
            }
            Key::Char('?') => return Self::help_overlay(SessionView::TableBrowse(view)),
            Key::Char('e') => {
                if let Some(snapshot) = view.result.clone() {
                    return SessionView::CopyExportMenu {
                        selected: 0,
                        snapshot,
                        return_to: Box::new(SessionView::TableBrowse(view)),
                    };
                }
                self.notice = Some("No rows loaded yet".to_string());
                None
            }
            Key::PageDown | Key::Right | Key::Char('n') => {
                let next = view.window.next();
                if next == view.window {
                    self.notice = Some("Already on the last page".to_string());
                    None
                } else {
                    Some(next)
                }
            }
            Key::PageUp | Key::Left | Key::Char('p') => {
                let prev = view.window.prev();
                if prev == view.window {
                    self.notice = Some("Already on the first page".to_string());
                    None
                } else {
                    Some(prev)
                }
            }
            Key::Char('r') | Key::F(5) => Some(view.window),
            _ => None,
        };

        if let Some(window) = target {
            if let Err(error) = self.request_page(&view.table, window, effects) {
                view.error = Some(error);
            }
        }
        SessionView::TableBrowse(view)
    }

    fn history_key(
        &mut self,
        selected: usize,
        return_to: Box<SessionView>,
        key: Key,
        effects: &mut Vec<Effect>,
    ) -> SessionView {
        let last = self.history.len().saturating_sub(1);
        let selected = match key {
            Key::Esc => return *return_to,
            Key::Char('q') => {
                self.quit(effects);
                selected
            }
            Key::Up | Key::Char('k') => selected.saturating_sub(1),
            Key::Down | Key::Char('j') => (selected + 1).min(last),
            Key::Enter => {
                let Some(entry) = self.history.get(selected) else {
                    return SessionView::HistoryView {
                        selected,
                        return_to,
                    };
                };
                let text = entry.text.clone();
                return match *return_to {
                    SessionView::FreeQuery(mut view) => {
                        view.input = text;
                        view.error = None;
                        SessionView::FreeQuery(view)
                    }
                    _ => SessionView::FreeQuery(FreeQueryView::with_input(text)),
                };
            }
            _ => selected,
        };
        SessionView::HistoryView {
            selected,
            return_to,
        }
    }

    fn copy_export_key(
        &mut self,
        selected: usize,
        snapshot: QueryResult,
        return_to: Box<SessionView>,
        key: Key,
        effects: &mut Vec<Effect>,
    ) -> SessionView {
        let last = TransferAction::ALL.len() - 1;
        let selected = match key {
            Key::Esc => return *return_to,
            Key::Char('q') => {
                self.quit(effects);
                selected
            }
            Key::Up | Key::Char('k') => selected.saturating_sub(1),
            Key::Down | Key::Char('j') => (selected + 1).min(last),
            Key::Enter => {
                let action = TransferAction::ALL[selected.min(last)];
                let format = action.format;
                effects.push(match action.kind {
                    TransferKind::Copy => Effect::Copy {
                        format,
                        result: snapshot,
                    },
                    TransferKind::Export => Effect::Export {
                        format,
                        result: snapshot,
                    },
                });
                return *return_to;
            }
            _ => selected,
        };
        SessionView::CopyExportMenu {
            selected,
            snapshot,
            return_to,
        }
    }

    fn help_key(&mut self, return_to: Box<SessionView>, key: Key, effects: &mut Vec<Effect>) -> SessionView {
        match key {
            Key::Char('q') => {
                self.quit(effects);
                SessionView::HelpView { return_to }
            }
            Key::Esc | Key::Enter | Key::Char('?') | Key::F(1) => *return_to,
            _ => SessionView::HelpView { return_to },
        }
    }

    fn on_connected(&mut self, ticket: Ticket, result: Result<Duration, ConnectionError>) {
        let Some(PendingWork::Connect(config)) = self.take_pending(ticket) else {
            return;
        };

        match result {
            Ok(latency) => {
                self.notice = Some(format!(
                    "Connected to {} in {} ms",
                    config.target(),
                    latency.as_millis()
                ));
                self.active = Some(config);
                if matches!(self.view.base(), SessionView::Connecting { .. }) {
                    self.view = SessionView::MainMenu { selected: 0 };
                }
            }
            Err(error) => {
                if let SessionView::Connecting { error: slot, .. } = self.view.base_mut() {
                    *slot = Some(error.to_string());
                } else {
                    self.notice = Some(format!("Connection failed: {error}"));
                }
            }
        }
    }

    fn on_query_finished(
        &mut self,
        ticket: Ticket,
        result: Result<QueryOutcome, QueryError>,
        effects: &mut Vec<Effect>,
    ) {
        let Some(PendingWork::Query(purpose)) = self.take_pending(ticket) else {
            return;
        };

        match purpose {
            QueryPurpose::FreeQuery => {
                self.remember(&result);
                self.finish_free_query(ticket, result);
            }
            QueryPurpose::TableList => self.finish_table_list(result),
            QueryPurpose::TableCount { table } => self.finish_table_count(&table, result, effects),
            QueryPurpose::TablePage { table, window } => {
                self.remember(&result);
                self.finish_table_page(&table, window, result);
            }
        }
    }

    fn remember(&mut self, result: &Result<QueryOutcome, QueryError>) {
        if let Ok(QueryOutcome::Read(rows)) = result {
            self.last_result = Some(rows.clone());
        }
    }

    fn discard_stale(&mut self, result: Result<QueryOutcome, QueryError>) {
        tracing::debug!(view = self.view.name(), "completion arrived for a closed view");
        if let Err(error) = result {
            self.notice = Some(format!("Earlier request failed: {error}"));
        }
    }

    fn finish_free_query(&mut self, ticket: Ticket, result: Result<QueryOutcome, QueryError>) {
        let page_size = self.page_size;
        let view = match self.view.base_mut() {
            SessionView::FreeQuery(view) if view.awaiting == Some(ticket) => view,
            _ => {
                self.discard_stale(result);
                return;
            }
        };
        view.awaiting = None;

        match result {
            Ok(QueryOutcome::Read(result)) => {
                let window = PaginationWindow::first(result.row_count(), page_size);
                view.outcome = Some(FreeQueryOutcome::Rows { result, window });
                view.error = None;
            }
            Ok(QueryOutcome::Write(summary)) => {
                view.outcome = Some(FreeQueryOutcome::Write(summary));
                view.error = None;
            }
            Err(error) => {
                view.outcome = None;
                view.error = Some(error.to_string());
            }
        }
    }

    fn finish_table_list(&mut self, result: Result<QueryOutcome, QueryError>) {
        let SessionView::TableList(view) = self.view.base_mut() else {
            self.discard_stale(result);
            return;
        };

        match result {
            Ok(QueryOutcome::Read(result)) => {
                view.tables = result.first_column();
                view.selected = view.selected.min(view.tables.len().saturating_sub(1));
                view.error = None;
            }
            Ok(QueryOutcome::Write(_)) => {
                view.error = Some("table listing returned no rows".to_string());
            }
            Err(error) => view.error = Some(error.to_string()),
        }
    }

    fn finish_table_count(
        &mut self,
        table: &str,
        result: Result<QueryOutcome, QueryError>,
        effects: &mut Vec<Effect>,
    ) {
        let page_size = self.page_size;
        let window = match self.view.base_mut() {
            SessionView::TableBrowse(view) if view.table == table => match parse_count(result) {
                Ok(total) => {
                    view.window = PaginationWindow::first(total, page_size);
                    view.error = None;
                    Some(view.window)
                }
                Err(message) => {
                    view.error = Some(message);
                    None
                }
            },
            _ => {
                tracing::debug!(table, "row count arrived for a closed view");
                None
            }
        };

        if let Some(window) = window {
            if let Err(error) = self.request_page(table, window, effects) {
                if let SessionView::TableBrowse(view) = self.view.base_mut() {
                    view.error = Some(error);
                }
            }
        }
    }

    fn finish_table_page(
        &mut self,
        table: &str,
        window: PaginationWindow,
        result: Result<QueryOutcome, QueryError>,
    ) {
        let view = match self.view.base_mut() {
            SessionView::TableBrowse(view) if view.table == table => view,
            _ => {
                self.discard_stale(result);
                return;
            }
        };

        match result {
            Ok(QueryOutcome::Read(result)) => {
                view.window = window;
                view.result = Some(result);
                view.error = None;
            }
            Ok(QueryOutcome::Write(_)) => {
                view.error = Some("table page returned no rows".to_string());
            }
            Err(error) => view.error = Some(error.to_string()),
        }
    }
}

fn parse_count(result: Result<QueryOutcome, QueryError>) -> Result<usize, String> {
    match result {
        Ok(QueryOutcome::Read(result)) => result
            .first_cell()
            .and_then(|cell| cell.trim().parse::<usize>().ok())
            .ok_or_else(|| "row count query returned no number".to_string()),
        Ok(QueryOutcome::Write(_)) => Err("row count query returned no rows".to_string()),
        Err(error) => Err(error.to_string()),
    }
}
