use crate::classifier::{EntityStatus, Tier};
use crate::display::{entity_age, status_label};
use crate::monitor::{Monitor, RefreshOutcome};
use crate::reconciliation::{ReconciledEntity, ReconciliationReport};
use crate::summary::{FloorSummary, RoomFilter};
use anyhow::Result;
use chrono::{DateTime, Utc};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Rooms,
    Floors,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Rooms => Page::Floors,
            Page::Floors => Page::Rooms,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Rooms => "Rooms",
            Page::Floors => "Floors",
        }
    }
}

pub struct App {
    monitor: Arc<Monitor>,
    pub report: Option<Arc<ReconciliationReport>>,
    pub visible: Vec<ReconciledEntity>,
    pub floors: Vec<FloorSummary>,
    pub state: TableState,
    pub floor_state: TableState,
    pub current_page: Page,
    pub filter: RoomFilter,

    /// Result of the last refresh, shown in the status bar
    pub message: Option<(String, Color)>,
}

impl App {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        let mut app = Self {
            monitor,
            report: None,
            visible: Vec::new(),
            floors: Vec::new(),
            state: TableState::default(),
            floor_state: TableState::default(),
            current_page: Page::Rooms,
            filter: RoomFilter::All,
            message: None,
        };
        app.reload();
        app
    }

    /// Run a cycle on the monitor and pick up whatever report it now holds
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.message = Some(match self.monitor.refresh(now) {
            RefreshOutcome::Updated(report) => (
                format!("Updated {}", report.reconciled_at.format("%H:%M:%S")),
                Color::Green,
            ),
            RefreshOutcome::Skipped => ("Refresh already in progress".to_string(), Color::Yellow),
            RefreshOutcome::Failed(failure) => {
                let text = match failure.hint {
                    Some(hint) => format!("Failed: {} ({})", failure.message, hint),
                    None => format!("Failed: {}", failure.message),
                };
                (text, Color::Red)
            }
        });
        self.reload();
    }

    pub fn reload(&mut self) {
        self.report = self.monitor.current();
        self.floors = self
            .report
            .as_ref()
            .map(|r| FloorSummary::from_entities(&r.entities))
            .unwrap_or_default();

        // Stay on the same room across refreshes; fall back to the same row
        let selected_id = self.selected_room().map(|room| room.id.clone());
        let selected_row = self.state.selected().unwrap_or(0);
        self.visible = self.filtered_rooms();
        let row = selected_id
            .and_then(|id| self.visible.iter().position(|room| room.id == id))
            .unwrap_or(selected_row);
        self.state
            .select(if self.visible.is_empty() { None } else { Some(row.min(self.visible.len() - 1)) });

        let selected = self.floor_state.selected().unwrap_or(0);
        self.floor_state
            .select(if self.floors.is_empty() { None } else { Some(selected.min(self.floors.len() - 1)) });
    }

    pub fn apply_filter(&mut self, filter: RoomFilter) {
        self.filter = filter;
        self.visible = self.filtered_rooms();

        // Reset selection to first item
        if !self.visible.is_empty() {
            self.state.select(Some(0));
        } else {
            self.state.select(None);
        }
    }

    fn filtered_rooms(&self) -> Vec<ReconciledEntity> {
        self.report
            .as_ref()
            .map(|r| self.filter.apply(&r.entities))
            .unwrap_or_default()
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    fn rows_on_page(&self) -> usize {
        match self.current_page {
            Page::Rooms => self.visible.len(),
            Page::Floors => self.floors.len(),
        }
    }

    fn page_state(&mut self) -> &mut TableState {
        match self.current_page {
            Page::Rooms => &mut self.state,
            Page::Floors => &mut self.floor_state,
        }
    }

    pub fn next(&mut self) {
        let len = self.rows_on_page();
        if len == 0 {
            return;
        }
        let state = self.page_state();
        let i = match state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.rows_on_page();
        if len == 0 {
            return;
        }
        let state = self.page_state();
        let i = match state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        state.select(Some(i));
    }

    pub fn selected_room(&self) -> Option<&ReconciledEntity> {
        self.state.selected().and_then(|i| self.visible.get(i))
    }
}

pub fn run_ui(app: &mut App, refresh_interval: Duration) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app, refresh_interval);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    refresh_interval: Duration,
) -> io::Result<()> {
    let mut last_refresh = Instant::now();

    loop {
        terminal.draw(|f| ui(f, app))?;

        let timeout = refresh_interval.saturating_sub(last_refresh.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
                    KeyCode::Tab => app.next_page(),
                    KeyCode::Char('r') => {
                        app.refresh(Utc::now());
                        last_refresh = Instant::now();
                    }
                    KeyCode::Char('1') => app.apply_filter(RoomFilter::All),
                    KeyCode::Char('2') => app.apply_filter(RoomFilter::Occupied),
                    KeyCode::Char('3') => app.apply_filter(RoomFilter::Empty),
                    KeyCode::Down | KeyCode::Char('j') => app.next(),
                    KeyCode::Up | KeyCode::Char('k') => app.previous(),
                    _ => {}
                }
            }
        }

        if last_refresh.elapsed() >= refresh_interval {
            app.refresh(Utc::now());
            last_refresh = Instant::now();
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Rooms => render_rooms(f, chunks[1], app),
        Page::Floors => render_floors(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn tier_color(tier: Tier) -> Color {
    match tier {
        Tier::Empty => Color::Green,
        Tier::Light => Color::Cyan,
        Tier::Moderate => Color::Yellow,
        Tier::Busy => Color::Red,
    }
}

fn status_color(status: EntityStatus) -> Color {
    match status {
        EntityStatus::NoData => Color::DarkGray,
        EntityStatus::Stale(_) => Color::Magenta,
        EntityStatus::Fresh(tier) => tier_color(tier),
    }
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut tab_spans = vec![];
    for (i, page) in [Page::Rooms, Page::Floors].iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title(), style));
    }

    if let Some(report) = &app.report {
        let summary = &report.summary;
        tab_spans.push(Span::raw("  |  "));
        tab_spans.push(Span::styled(
            format!("👥 {}", summary.total_occupancy),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ));
        tab_spans.push(Span::raw("  |  "));
        tab_spans.push(Span::styled(
            format!("Active {}/{}", summary.active, summary.registered),
            Style::default().fg(Color::Cyan),
        ));
        tab_spans.push(Span::raw("  "));
        tab_spans.push(Span::styled(format!("Busy {}", summary.busy), Style::default().fg(Color::Red)));
        tab_spans.push(Span::raw("  "));
        tab_spans.push(Span::styled(
            format!("Empty {}", summary.empty),
            Style::default().fg(Color::Green),
        ));
        if summary.stale > 0 {
            tab_spans.push(Span::raw("  "));
            tab_spans.push(Span::styled(
                format!("Stale {}", summary.stale),
                Style::default().fg(Color::Magenta),
            ));
        }
    } else {
        tab_spans.push(Span::raw("  |  "));
        tab_spans.push(Span::styled("Waiting for data", Style::default().fg(Color::DarkGray)));
    }

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });
    Row::new(cells).style(Style::default().bg(Color::DarkGray)).height(1)
}

fn render_rooms(f: &mut Frame, area: Rect, app: &mut App) {
    let now = Utc::now();
    let header = header_row(&["Floor", "Room", "People", "Load", "Status", "Updated"]);

    // Floor label only on the first room of each group
    let mut previous_floor = None;
    let rows: Vec<Row> = app
        .visible
        .iter()
        .map(|room| {
            let status = room.status();
            let color = status_color(status);
            let floor = if previous_floor == Some(room.group_key) {
                String::new()
            } else {
                room.group_label.clone()
            };
            previous_floor = Some(room.group_key);

            let people = if room.has_reading { room.count.to_string() } else { "-".to_string() };

            Row::new(vec![
                Cell::from(floor).style(Style::default().fg(Color::Cyan)),
                Cell::from(truncate(&room.display_name, 26)),
                Cell::from(people).style(Style::default().fg(color)),
                Cell::from(capacity_bar(room.capacity_percent, 10)).style(Style::default().fg(color)),
                Cell::from(status_label(status)).style(Style::default().fg(color)),
                Cell::from(entity_age(room, now)),
            ])
            .height(1)
        })
        .collect();

    let title = format!(" Rooms - {} ({}) ", app.filter.name(), app.visible.len());
    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(28),
            Constraint::Length(8),
            Constraint::Length(12),
            Constraint::Length(18),
            Constraint::Length(12),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(title),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_floors(f: &mut Frame, area: Rect, app: &mut App) {
    let header = header_row(&["Floor", "Rooms", "People", "Active", "Busy", "Status"]);

    let rows: Vec<Row> = app
        .floors
        .iter()
        .map(|floor| {
            let color = tier_color(floor.status);
            Row::new(vec![
                Cell::from(floor.group_label.clone()),
                Cell::from(floor.rooms.to_string()),
                Cell::from(floor.occupancy.to_string()),
                Cell::from(floor.active.to_string()),
                Cell::from(floor.busy.to_string()).style(Style::default().fg(Color::Red)),
                Cell::from(floor.status.label()).style(Style::default().fg(color)),
            ])
            .height(1)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(14),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(12),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Floors - Summary by Floor "),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.floor_state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let mut status_spans = vec![];

    if let Some((text, color)) = &app.message {
        status_spans.push(Span::styled(format!(" {} ", text), Style::default().fg(*color)));
        status_spans.push(Span::raw(" | "));
    }

    if let Some(room) = app.selected_room().filter(|_| app.current_page == Page::Rooms) {
        status_spans.push(Span::styled(
            format!("{} ", room.id),
            Style::default().fg(Color::Cyan),
        ));
        status_spans.push(Span::raw("| "));
    }

    status_spans.push(Span::styled("1/2/3", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" All/Occupied/Empty | "));
    status_spans.push(Span::styled("r", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Refresh | "));
    status_spans.push(Span::styled("Tab", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Page | "));
    status_spans.push(Span::styled("↑/↓", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Nav | "));
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn capacity_bar(percent: u8, width: usize) -> String {
    let filled = (percent as usize * width + 50) / 100;
    format!("{}{}", "█".repeat(filled.min(width)), "░".repeat(width - filled.min(width)))
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
