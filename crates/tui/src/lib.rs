use std::io::{self, Stdout, Write};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use boba_core::config::ThemeName;
use boba_core::connection_manager::ConnectionStatus;
use boba_core::driver::{ClipboardSink, SessionDriver};
use boba_core::formatter::{render_table, TableStyle};
use boba_core::pagination::PaginationWindow;
use boba_core::query_executor::{QueryBackend, QueryResult};
use boba_core::session::{
    ConnectField, FreeQueryOutcome, FreeQueryView, Key, MenuItem, QueryPurpose, SessionEvent,
    SessionState, SessionView, TableBrowseView, TableListView, TransferAction,
};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Clear, Paragraph};
use ratatui::{Frame, Terminal};
use thiserror::Error;

const TICK_RATE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Colors and border glyphs for one session; passed to every render call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub table: TableStyle,
    pub border: BorderType,
    pub accent: Color,
    pub error: Color,
    pub muted: Color,
}

impl Theme {
    #[must_use]
    pub fn new(name: ThemeName, max_column_width: usize) -> Self {
        let border = match name {
            ThemeName::Unicode => BorderType::Rounded,
            ThemeName::Ascii => BorderType::Plain,
        };
        Self {
            table: TableStyle::for_theme(name, max_column_width),
            border,
            accent: Color::Yellow,
            error: Color::Red,
            muted: Color::DarkGray,
        }
    }

    fn block(&self, title: impl Into<String>) -> Block<'static> {
        Block::default()
            .borders(Borders::ALL)
            .border_type(self.border)
            .title(title.into())
    }

    fn error_line(&self, message: &str) -> Line<'static> {
        Line::from(Span::styled(
            format!("Error: {message}"),
            Style::default().fg(self.error),
        ))
    }

    fn muted_line(&self, text: impl Into<String>) -> Line<'static> {
        Line::from(Span::styled(text.into(), Style::default().fg(self.muted)))
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::new(ThemeName::Unicode, boba_core::config::DEFAULT_MAX_COLUMN_WIDTH)
    }
}

/// Sends copied text to the host terminal's clipboard with an OSC 52 sequence.
#[derive(Debug, Default)]
pub struct Osc52Clipboard;

impl ClipboardSink for Osc52Clipboard {
    fn set_text(&mut self, text: &str) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(osc52_sequence(text).as_bytes())?;
        stdout.flush()
    }
}

#[must_use]
pub fn osc52_sequence(text: &str) -> String {
    format!("\x1b]52;c;{}\x07", STANDARD.encode(text))
}

pub fn run<B: QueryBackend>(driver: &mut SessionDriver<B>, theme: &Theme) -> Result<(), TuiError> {
    let mut terminal = setup_terminal()?;
    tracing::info!(view = driver.session().view().name(), "terminal ui started");
    let run_result = run_loop(&mut terminal, driver, theme);
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    tracing::info!("terminal ui stopped");
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop<B: QueryBackend>(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    driver: &mut SessionDriver<B>,
    theme: &Theme,
) -> Result<(), TuiError> {
    loop {
        driver.drain_completions();
        let status = driver.connection_status();
        terminal.draw(|frame| render(frame, driver.session(), &status, theme))?;

        if driver.session().should_quit() {
            break;
        }

        if event::poll(TICK_RATE)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(key) = map_key_event(key) {
                        driver.dispatch(SessionEvent::Key(key));
                    }
                }
            }
        }
    }

    Ok(())
}

fn render(frame: &mut Frame<'_>, session: &SessionState, status: &ConnectionStatus, theme: &Theme) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4),
        ])
        .split(frame.area());

    frame.render_widget(
        Paragraph::new(header_line(session, status, theme)).block(theme.block("boba")),
        chunks[0],
    );

    let base = session.view().base();
    let body = Paragraph::new(body_lines(session, base, theme))
        .block(theme.block(base.name()))
        .alignment(Alignment::Left);
    frame.render_widget(body, chunks[1]);

    let mut footer = vec![Line::from(key_hints(session.view()))];
    if let Some(notice) = session.notice() {
        footer.push(Line::from(Span::styled(
            notice.to_string(),
            Style::default().fg(theme.accent),
        )));
    }
    frame.render_widget(Paragraph::new(footer).block(theme.block("Keys")), chunks[2]);

    if let Some((title, lines)) = overlay_lines(session, theme) {
        let area = centered_rect(70, 60, frame.area());
        frame.render_widget(Clear, area);
        frame.render_widget(Paragraph::new(lines).block(theme.block(title)), area);
    }
}

fn header_line(session: &SessionState, status: &ConnectionStatus, theme: &Theme) -> Line<'static> {
    let connection = match (&status.target, &status.user) {
        (Some(target), Some(user)) if status.is_connected => format!("{user}@{target}"),
        _ => "not connected".to_string(),
    };
    let latency = status
        .last_latency
        .map(|latency| format!(" ({} ms)", latency.as_millis()))
        .unwrap_or_default();
    let activity = if session.is_busy() { "running" } else { "idle" };

    let mut spans = vec![
        Span::styled(
            format!(" {} ", session.view().name()),
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!("{connection}{latency}")),
        Span::raw(" | "),
        Span::raw(activity),
    ];
    if let Some(position) = page_position(session.view().base()) {
        spans.push(Span::raw(" | "));
        spans.push(Span::raw(position));
    }
    Line::from(spans)
}

fn page_position(view: &SessionView) -> Option<String> {
    match view {
        SessionView::FreeQuery(FreeQueryView {
            outcome: Some(FreeQueryOutcome::Rows { result, window }),
            ..
        }) => Some(window_summary(window, result.window(window.offset(), window.limit()).len())),
        SessionView::TableBrowse(TableBrowseView {
            window,
            result: Some(result),
            ..
        }) => Some(window_summary(window, result.row_count())),
        _ => None,
    }
}

fn window_summary(window: &PaginationWindow, rows_shown: usize) -> String {
    let (first, last) = window.display_range(rows_shown);
    format!(
        "rows {first}-{last} of {} (page {}/{})",
        window.total(),
        window.page_number(),
        window.page_count()
    )
}

fn marker(selected: bool) -> &'static str {
    if selected {
        ">"
    } else {
        " "
    }
}

fn body_lines(session: &SessionState, view: &SessionView, theme: &Theme) -> Vec<Line<'static>> {
    match view {
        SessionView::Connecting { form, error } => {
            let mut lines = vec![
                Line::from("Connect to a MySQL server"),
                Line::from(""),
            ];
            for field in ConnectField::ALL {
                let label = format!("{}:", field.label());
                lines.push(Line::from(format!(
                    "{} {label:<9} {}",
                    marker(form.active == field),
                    form.display_value(field)
                )));
            }
            lines.push(Line::from(""));
            if session.is_busy() {
                lines.push(theme.muted_line("Connecting..."));
            }
            if let Some(error) = error {
                lines.push(theme.error_line(error));
            }
            lines
        }
        SessionView::MainMenu { selected } => MenuItem::ALL
            .iter()
            .enumerate()
            .map(|(index, item)| Line::from(format!("{} {}", marker(index == *selected), item.label())))
            .collect(),
        SessionView::FreeQuery(view) => free_query_lines(session, view, theme),
        SessionView::TableList(view) => table_list_lines(session, view, theme),
        SessionView::TableBrowse(view) => table_browse_lines(session, view, theme),
        SessionView::HistoryView { return_to, .. }
        | SessionView::CopyExportMenu { return_to, .. }
        | SessionView::HelpView { return_to } => body_lines(session, return_to, theme),
    }
}

fn table_text_lines(columns: &[String], rows: &[Vec<String>], theme: &Theme) -> Vec<Line<'static>> {
    render_table(columns, rows, &theme.table)
        .lines()
        .map(|line| Line::from(line.to_string()))
        .collect()
}

fn free_query_lines(session: &SessionState, view: &FreeQueryView, theme: &Theme) -> Vec<Line<'static>> {
    let mut lines = vec![
        Line::from(vec![
            Span::styled("SQL> ", Style::default().fg(theme.accent)),
            Span::raw(format!("{}_", view.input)),
        ]),
        Line::from(""),
    ];

    if matches!(session.pending_query(), Some(QueryPurpose::FreeQuery)) {
        lines.push(theme.muted_line("Running..."));
    }
    if let Some(error) = &view.error {
        lines.push(theme.error_line(error));
    }

    match &view.outcome {
        Some(FreeQueryOutcome::Rows { result, window }) => {
            let rows = result.window(window.offset(), window.limit());
            lines.extend(table_text_lines(result.columns(), rows, theme));
            if !result.is_empty() {
                lines.push(theme.muted_line(format!("{} rows returned", result.row_count())));
            }
        }
        Some(FreeQueryOutcome::Write(summary)) => {
            lines.push(Line::from(format!(
                "Query OK, {} rows affected",
                summary.rows_affected
            )));
            if let Some(id) = summary.last_insert_id {
                lines.push(Line::from(format!("Last insert id: {id}")));
            }
        }
        None => {}
    }
    lines
}

fn table_list_lines(session: &SessionState, view: &TableListView, theme: &Theme) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    if matches!(session.pending_query(), Some(QueryPurpose::TableList)) {
        lines.push(theme.muted_line("Loading tables..."));
    }
    if let Some(error) = &view.error {
        lines.push(theme.error_line(error));
    }
    if view.tables.is_empty() && !session.is_busy() && view.error.is_none() {
        lines.push(theme.muted_line("No tables in this database"));
    }
    lines.extend(
        view.tables
            .iter()
            .enumerate()
            .map(|(index, table)| Line::from(format!("{} {table}", marker(index == view.selected)))),
    );
    lines
}

fn table_browse_lines(session: &SessionState, view: &TableBrowseView, theme: &Theme) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(Span::styled(
        format!("Table `{}`", view.table),
        Style::default().add_modifier(Modifier::BOLD),
    ))];
    if matches!(
        session.pending_query(),
        Some(QueryPurpose::TableCount { .. } | QueryPurpose::TablePage { .. })
    ) {
        lines.push(theme.muted_line("Loading..."));
    }
    if let Some(error) = &view.error {
        lines.push(theme.error_line(error));
    }
    if let Some(result) = &view.result {
        lines.extend(table_text_lines(result.columns(), result.rows(), theme));
    }
    lines
}

fn overlay_lines(session: &SessionState, theme: &Theme) -> Option<(&'static str, Vec<Line<'static>>)> {
    match session.view() {
        SessionView::HistoryView { selected, .. } => {
            let entries = session.history().all();
            let lines = if entries.is_empty() {
                vec![theme.muted_line("No queries yet")]
            } else {
                entries
                    .iter()
                    .map(|entry| {
                        Line::from(format!(
                            "{} {:>3}  {}",
                            marker(entry.index == *selected),
                            entry.index + 1,
                            entry.text
                        ))
                    })
                    .collect()
            };
            Some(("History", lines))
        }
        SessionView::CopyExportMenu {
            selected, snapshot, ..
        } => Some(("Copy / export", transfer_lines(*selected, snapshot, theme))),
        SessionView::HelpView { .. } => Some(("Help", help_lines())),
        _ => None,
    }
}

fn transfer_lines(selected: usize, snapshot: &QueryResult, theme: &Theme) -> Vec<Line<'static>> {
    let mut lines = vec![
        theme.muted_line(format!("{} rows from the last result", snapshot.row_count())),
        Line::from(""),
    ];
    lines.extend(
        TransferAction::ALL
            .iter()
            .enumerate()
            .map(|(index, action)| Line::from(format!("{} {}", marker(index == selected), action.label()))),
    );
    lines
}

fn help_lines() -> Vec<Line<'static>> {
    [
        "Ctrl+Q: quit from anywhere (q in menus and lists)",
        "F1 or ?: toggle this help",
        "Esc: back to the previous view",
        "Connect: Tab/arrows switch field, Enter connects",
        "Query: Enter runs, PgUp/PgDn pages, Ctrl+L clears",
        "Query: Ctrl+R history, Ctrl+E copy/export",
        "Tables: Enter browses, d describes, r reloads",
        "Browse: n/p or PgDn/PgUp pages, r refreshes, e copy/export",
    ]
    .into_iter()
    .map(Line::from)
    .collect()
}

fn key_hints(view: &SessionView) -> &'static str {
    match view {
        SessionView::Connecting { .. } => "Tab/↑↓ field | Enter connect | Esc back | F1 help | Ctrl+Q quit",
        SessionView::MainMenu { .. } => "↑↓ select | Enter open | ? help | q quit",
        SessionView::FreeQuery(_) => {
            "Enter run | PgUp/PgDn page | Ctrl+E copy/export | Ctrl+R history | Ctrl+L clear | Esc menu"
        }
        SessionView::TableList(_) => "↑↓ select | Enter browse | d describe | r reload | Esc menu | q quit",
        SessionView::TableBrowse(_) => {
            "n/PgDn next | p/PgUp prev | r refresh | e copy/export | Esc menu | q quit"
        }
        SessionView::HistoryView { .. } => "↑↓ select | Enter use | Esc back",
        SessionView::CopyExportMenu { .. } => "↑↓ select | Enter run | Esc back",
        SessionView::HelpView { .. } => "Esc close",
    }
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent) -> Option<Key> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char(ch) if ctrl => Some(Key::Ctrl(ch.to_ascii_lowercase())),
        KeyCode::Char(ch) => Some(Key::Char(ch)),
        KeyCode::Enter => Some(Key::Enter),
        KeyCode::Backspace => Some(Key::Backspace),
        KeyCode::Esc => Some(Key::Esc),
        KeyCode::Tab => Some(Key::Tab),
        KeyCode::BackTab => Some(Key::BackTab),
        KeyCode::Up => Some(Key::Up),
        KeyCode::Down => Some(Key::Down),
        KeyCode::Left => Some(Key::Left),
        KeyCode::Right => Some(Key::Right),
        KeyCode::PageUp => Some(Key::PageUp),
        KeyCode::PageDown => Some(Key::PageDown),
        KeyCode::F(number) => Some(Key::F(number)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use boba_core::config::{ConnectionConfig, ThemeName};
    use boba_core::connection_manager::ConnectionStatus;
    use boba_core::formatter::BorderSet;
    use boba_core::query_executor::{QueryOutcome, QueryResult};
    use boba_core::session::{Effect, Key, SessionEvent, SessionState};
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    use super::{centered_rect, map_key_event, osc52_sequence, render, Theme};

    fn screen_text(session: &SessionState, status: &ConnectionStatus) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 40)).expect("test terminal");
        terminal
            .draw(|frame| render(frame, session, status, &Theme::default()))
            .expect("draw");
        let buffer = terminal.backend().buffer();
        let width = usize::from(buffer.area.width);
        buffer
            .content()
            .chunks(width)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn connected() -> (SessionState, ConnectionStatus) {
        let config = ConnectionConfig::new("db.local", "app_user", "shop");
        let mut session = SessionState::new(config, 20);
        let effects = session.handle(SessionEvent::Key(Key::Enter));
        let Some(Effect::Connect { ticket, .. }) = effects.first() else {
            panic!("expected connect effect");
        };
        session.handle(SessionEvent::Connected {
            ticket: *ticket,
            result: Ok(Duration::from_millis(4)),
        });
        let status = ConnectionStatus {
            is_connected: true,
            target: Some("db.local:3306/shop".to_string()),
            user: Some("app_user".to_string()),
            last_latency: Some(Duration::from_millis(4)),
        };
        (session, status)
    }

    #[test]
    fn keymap_translates_control_and_plain_keys() {
        assert_eq!(
            map_key_event(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::CONTROL)),
            Some(Key::Ctrl('q'))
        );
        assert_eq!(
            map_key_event(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE)),
            Some(Key::Char('q'))
        );
        assert_eq!(
            map_key_event(KeyEvent::new(KeyCode::Char('E'), KeyModifiers::CONTROL | KeyModifiers::SHIFT)),
            Some(Key::Ctrl('e'))
        );
        assert_eq!(
            map_key_event(KeyEvent::new(KeyCode::F(5), KeyModifiers::NONE)),
            Some(Key::F(5))
        );
        assert_eq!(
            map_key_event(KeyEvent::new(KeyCode::Insert, KeyModifiers::NONE)),
            None
        );
    }

    #[test]
    fn osc52_wraps_base64_payload() {
        let sequence = osc52_sequence("id,name\n1,ada\n");
        let payload = sequence
            .strip_prefix("\x1b]52;c;")
            .and_then(|rest| rest.strip_suffix('\x07'))
            .expect("osc52 framing");
        let decoded = STANDARD.decode(payload).expect("valid base64");
        assert_eq!(decoded, b"id,name\n1,ada\n");
    }

    #[test]
    fn ascii_theme_uses_ascii_table_borders() {
        let theme = Theme::new(ThemeName::Ascii, 40);
        assert_eq!(theme.table.borders, BorderSet::ASCII);
        assert_eq!(theme.table.max_column_width, 40);
    }

    #[test]
    fn centered_rect_stays_inside_area() {
        let area = ratatui::layout::Rect::new(0, 0, 100, 40);
        let popup = centered_rect(70, 60, area);
        assert!(popup.width <= 70 && popup.height <= 24);
        assert!(popup.x >= 15 && popup.y >= 8);
    }

    #[test]
    fn connect_screen_masks_password() {
        let mut config = ConnectionConfig::new("db.local", "app_user", "shop");
        config.password = Some("hunter2".to_string());
        let session = SessionState::new(config, 20);
        let text = screen_text(&session, &ConnectionStatus::disconnected());

        assert!(text.contains("not connected"));
        assert!(text.contains("*******"));
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn main_menu_shows_items_and_connection_header() {
        let (session, status) = connected();
        let text = screen_text(&session, &status);
        assert!(text.contains("app_user@db.local:3306/shop"));
        assert!(text.contains("> Run query"));
        assert!(text.contains("Browse tables"));
    }

    #[test]
    fn free_query_renders_rows_and_position() {
        let (mut session, status) = connected();
        session.handle(SessionEvent::Key(Key::Enter));
        for ch in "SELECT id FROM t".chars() {
            session.handle(SessionEvent::Key(Key::Char(ch)));
        }
        let effects = session.handle(SessionEvent::Key(Key::Enter));
        let Some(Effect::RunQuery { ticket, .. }) = effects.first() else {
            panic!("expected query effect");
        };
        let rows = (1..=25).map(|n| vec![n.to_string()]).collect();
        session.handle(SessionEvent::QueryFinished {
            ticket: *ticket,
            result: Ok(QueryOutcome::Read(
                QueryResult::new(vec!["id".to_string()], rows).expect("valid result"),
            )),
        });

        let text = screen_text(&session, &status);
        assert!(text.contains("SQL> SELECT id FROM t_"));
        assert!(text.contains("rows 1-20 of 25 (page 1/2)"));
        assert!(text.contains("25 rows returned"));
    }

    #[test]
    fn empty_read_shows_only_no_rows_message() {
        let (mut session, status) = connected();
        session.handle(SessionEvent::Key(Key::Enter));
        for ch in "SELECT id FROM t WHERE 1 = 0".chars() {
            session.handle(SessionEvent::Key(Key::Char(ch)));
        }
        let effects = session.handle(SessionEvent::Key(Key::Enter));
        let Some(Effect::RunQuery { ticket, .. }) = effects.first() else {
            panic!("expected query effect");
        };
        session.handle(SessionEvent::QueryFinished {
            ticket: *ticket,
            result: Ok(QueryOutcome::Read(
                QueryResult::new(vec!["id".to_string()], Vec::new()).expect("valid result"),
            )),
        });

        let text = screen_text(&session, &status);
        assert!(text.contains("No rows returned."));
        assert!(!text.contains("0 rows returned"));
    }

    #[test]
    fn help_overlay_is_drawn_over_current_view() {
        let (mut session, status) = connected();
        session.handle(SessionEvent::Key(Key::F(1)));
        let text = screen_text(&session, &status);
        assert!(text.contains("F1 or ?: toggle this help"));
        assert!(text.contains("Esc close"));
    }
}
