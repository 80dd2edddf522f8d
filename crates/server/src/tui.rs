use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table, TableState};

use tickwire::{ClientSummary, ConnectionState, SlotIndex};

use crate::host::HostStats;

const MAX_LOG_LINES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

pub struct TuiState {
    logs: VecDeque<(LogLevel, String)>,
    table: TableState,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            logs: VecDeque::new(),
            table: TableState::default(),
        }
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.push_log(LogLevel::Info, message.into());
    }

    pub fn log_warn(&mut self, message: impl Into<String>) {
        self.push_log(LogLevel::Warn, message.into());
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.push_log(LogLevel::Error, message.into());
    }

    fn push_log(&mut self, level: LogLevel, message: String) {
        if self.logs.len() >= MAX_LOG_LINES {
            self.logs.pop_front();
        }
        self.logs.push_back((level, message));
    }

    pub fn select_next(&mut self, count: usize) {
        if count == 0 {
            self.table.select(None);
            return;
        }
        let next = self.table.selected().map_or(0, |i| (i + 1) % count);
        self.table.select(Some(next));
    }

    pub fn select_prev(&mut self, count: usize) {
        if count == 0 {
            self.table.select(None);
            return;
        }
        let prev = self
            .table
            .selected()
            .map_or(count - 1, |i| (i + count - 1) % count);
        self.table.select(Some(prev));
    }

    /// Slot of the highlighted row, if it still exists.
    pub fn selected_slot(&self, clients: &[ClientSummary]) -> Option<SlotIndex> {
        self.table
            .selected()
            .and_then(|i| clients.get(i))
            .map(|c| c.slot)
    }
}

pub fn render(frame: &mut Frame, state: &mut TuiState, stats: &HostStats, clients: &[ClientSummary]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(8),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], stats);
    render_capacity(frame, chunks[1], stats);
    render_slots(frame, chunks[2], state, clients);
    render_log(frame, chunks[3], state);
    render_help(frame, chunks[4]);
}

fn render_header(frame: &mut Frame, area: Rect, stats: &HostStats) {
    let title = format!(
        " {} - Uptime: {} ",
        stats.name,
        format_duration(stats.uptime_secs)
    );
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let mut text = format!(
        "Tick: {}  |  Entities: {}  |  Announced: {}",
        stats.tick, stats.entity_count, stats.announcements
    );
    if !stats.net_enabled {
        text.push_str("  |  NETWORK DISABLED");
    }

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));
    frame.render_widget(paragraph, area);
}

fn render_capacity(frame: &mut Frame, area: Rect, stats: &HostStats) {
    let block = Block::default()
        .title(" Slots ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let ratio = stats.occupied as f64 / stats.capacity.max(1) as f64;
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio.min(1.0))
        .label(format!(
            "{}/{} occupied, {} in game",
            stats.occupied, stats.capacity, stats.ready
        ));
    frame.render_widget(gauge, area);
}

fn render_slots(frame: &mut Frame, area: Rect, state: &mut TuiState, clients: &[ClientSummary]) {
    let header = Row::new([
        "Slot", "Name", "State", "Ping", "Ack", "BW", "Pending", "Age", "Demo",
    ])
        .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD));

    let rows = clients.iter().map(|c| {
        Row::new(vec![
            Cell::from(c.slot.to_string()),
            Cell::from(c.name.clone()),
            Cell::from(c.state.as_str()).style(Style::default().fg(state_color(c.state))),
            Cell::from(format_ms(c.ping_ms)),
            Cell::from(format_ms(c.ack_rtt_ms)),
            Cell::from(c.bandwidth.to_string()),
            Cell::from(c.pending_deltas.to_string()),
            Cell::from(c.age_ticks.to_string()),
            Cell::from(if c.recording { "rec" } else { "" }),
        ])
    });

    let widths = [
        Constraint::Length(5),
        Constraint::Min(12),
        Constraint::Length(12),
        Constraint::Length(8),
        Constraint::Length(8),
        Constraint::Length(4),
        Constraint::Length(8),
        Constraint::Length(6),
        Constraint::Length(5),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .title(" Clients ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow)),
        )
        .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    frame.render_stateful_widget(table, area, &mut state.table);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = state
        .logs
        .iter()
        .skip(state.logs.len().saturating_sub(visible))
        .map(|(level, message)| {
            let color = match level {
                LogLevel::Info => Color::White,
                LogLevel::Warn => Color::Yellow,
                LogLevel::Error => Color::Red,
            };
            Line::from(Span::styled(message.clone(), Style::default().fg(color)))
        })
        .collect();

    let block = Block::default()
        .title(" Events ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("q/Esc quit  |  Up/Down select  |  k kick  |  r toggle demo")
        .block(block)
        .style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        );
    frame.render_widget(text, area);
}

fn state_color(state: ConnectionState) -> Color {
    match state {
        ConnectionState::Ready => Color::Green,
        ConnectionState::Connecting | ConnectionState::Handshaking => Color::Yellow,
        ConnectionState::Leaving | ConnectionState::Disconnected => Color::DarkGray,
    }
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_ms(ms: Option<u32>) -> String {
    ms.map_or_else(|| "-".to_string(), |ms| format!("{}ms", ms))
}
