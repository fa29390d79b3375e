//! Application shell: themed dashboard, key handling, channel drain.
//!
//! All widget state lives here, on the UI task. Measurement runs happen on
//! their own tokio task and talk back only through the update channel, which
//! is drained exhaustively on every 100 ms tick.

use crate::engine::SpeedtestClient;
use crate::history::{format_speed, HistoryStore};
use crate::model::{ProgressEvent, RunConfig};
use crate::runner;
use crate::theme::{Theme, ThemeName, Themes};
use anyhow::{Context, Result};
use crossterm::event::{Event, EventStream, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use futures::StreamExt;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Gauge, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use std::time::Duration;
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

const TICK: Duration = Duration::from_millis(100);

struct Shell {
    cfg: RunConfig,
    themes: Themes,
    theme: ThemeName,
    history: HistoryStore,

    running: bool,
    run_handle: Option<JoinHandle<()>>,

    status: String,
    server: Option<String>,
    download_bps: Option<f64>,
    upload_bps: Option<f64>,
    ping_ms: Option<f64>,
    progress: u8,
    error: Option<String>,
}

impl Shell {
    fn new(cfg: RunConfig, themes: Themes, history: HistoryStore) -> Self {
        Self {
            cfg,
            themes,
            theme: ThemeName::Dark,
            history,
            running: false,
            run_handle: None,
            status: "Ready to test".into(),
            server: None,
            download_bps: None,
            upload_bps: None,
            ping_ms: None,
            progress: 0,
            error: None,
        }
    }

    fn theme(&self) -> &Theme {
        self.themes.get(self.theme)
    }

    /// Start a run unless one is active. A second request while Running is
    /// a no-op.
    fn start_test(&mut self, tx: &UnboundedSender<ProgressEvent>) {
        if self.running {
            return;
        }
        let client = match SpeedtestClient::new(&self.cfg) {
            Ok(client) => client,
            Err(e) => {
                self.error = Some(format!("Test failed: {e:#}"));
                self.status = "Test Failed".into();
                return;
            }
        };

        self.running = true;
        self.server = None;
        self.download_bps = None;
        self.upload_bps = None;
        self.ping_ms = None;
        self.progress = 0;

        let tx = tx.clone();
        self.run_handle = Some(tokio::spawn(async move {
            runner::run(&client, &tx).await;
        }));
    }

    /// Abort the active run, if any. Best-effort: the runner may still be
    /// mid-request when the task is torn down.
    fn cancel_test(&mut self) {
        let Some(handle) = self.run_handle.take() else {
            return;
        };
        handle.abort();
        self.running = false;
        self.status = "Test cancelled".into();
        self.progress = 0;
    }

    fn toggle_theme(&mut self) {
        self.theme = self.theme.toggled();
    }

    fn clear_history(&mut self) {
        self.history.clear();
    }

    fn apply_event(&mut self, ev: ProgressEvent) {
        match ev {
            ProgressEvent::Status(text) => self.status = text,
            ProgressEvent::Server(text) => self.server = Some(text),
            ProgressEvent::Download(bps) => self.download_bps = Some(bps),
            ProgressEvent::Upload(bps) => self.upload_bps = Some(bps),
            ProgressEvent::Ping(ms) => self.ping_ms = Some(ms),
            ProgressEvent::Progress(pct) => self.progress = pct.min(100),
            ProgressEvent::Complete(result) => {
                self.history.append(result);
                self.finish_run();
            }
            ProgressEvent::Error(message) => {
                self.error = Some(message);
                self.finish_run();
            }
        }
    }

    fn finish_run(&mut self) {
        self.running = false;
        self.run_handle = None;
    }
}

pub async fn run(cfg: RunConfig) -> Result<()> {
    let history = HistoryStore::load();
    let mut shell = Shell::new(cfg, Themes::builtin(), history);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ProgressEvent>();

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let res = event_loop(&mut terminal, &mut shell, &event_tx, &mut event_rx).await;

    disable_raw_mode().ok();
    execute!(io::stdout(), LeaveAlternateScreen).ok();
    res
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    shell: &mut Shell,
    event_tx: &UnboundedSender<ProgressEvent>,
    event_rx: &mut UnboundedReceiver<ProgressEvent>,
) -> Result<()> {
    let mut tick = tokio::time::interval(TICK);
    let mut input = EventStream::new();

    loop {
        tokio::select! {
            _ = tick.tick() => {
                while let Ok(ev) = event_rx.try_recv() {
                    shell.apply_event(ev);
                }
                terminal.draw(|f| draw(f, shell)).ok();
            }
            maybe_event = input.next() => {
                let Some(event) = maybe_event else { break };
                let Ok(Event::Key(key)) = event else { continue };
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                // An open error dialog swallows the next key press.
                if shell.error.take().is_some() {
                    continue;
                }
                match (key.modifiers, key.code) {
                    (KeyModifiers::CONTROL, KeyCode::Char('c')) | (_, KeyCode::Char('q')) => {
                        break;
                    }
                    (_, KeyCode::Char('s')) => shell.start_test(event_tx),
                    (_, KeyCode::Char('c')) => shell.cancel_test(),
                    (_, KeyCode::Char('t')) => shell.toggle_theme(),
                    (_, KeyCode::Char('x')) => shell.clear_history(),
                    _ => {}
                }
            }
        }
    }

    if let Some(handle) = shell.run_handle.take() {
        handle.abort();
    }
    Ok(())
}

fn draw(f: &mut ratatui::Frame, shell: &Shell) {
    let theme = *shell.theme();
    let area = f.area();
    f.render_widget(
        Block::default().style(Style::default().bg(theme.bg).fg(theme.fg)),
        area,
    );

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // title + clock
            Constraint::Length(1), // server line
            Constraint::Length(3), // readouts
            Constraint::Length(3), // progress gauge
            Constraint::Length(1), // status line
            Constraint::Length(7), // history
            Constraint::Min(0),
            Constraint::Length(1), // key hints
        ])
        .split(area);

    let header = Paragraph::new(vec![
        Line::from(Span::styled(
            "Internet Speed Test",
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(clock_text()),
    ])
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(header, chunks[0]);

    let server_line = shell
        .server
        .as_deref()
        .map(|s| format!("Server: {s}"))
        .unwrap_or_default();
    f.render_widget(
        Paragraph::new(server_line).alignment(Alignment::Center),
        chunks[1],
    );

    let readouts = Paragraph::new(vec![
        readout_line("Download Speed:", speed_text(shell.download_bps), &theme),
        readout_line("Upload Speed:", speed_text(shell.upload_bps), &theme),
        readout_line("Ping:", ping_text(shell.ping_ms), &theme),
    ])
    .alignment(Alignment::Center);
    f.render_widget(readouts, chunks[2]);

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL))
        .gauge_style(
            Style::default()
                .fg(theme.accent)
                .bg(ratatui::style::Color::Rgb(0x33, 0x33, 0x33)),
        )
        .percent(u16::from(shell.progress))
        .label(format!("{}%", shell.progress));
    f.render_widget(gauge, chunks[3]);

    f.render_widget(
        Paragraph::new(shell.status.as_str()).alignment(Alignment::Center),
        chunks[4],
    );

    let history_lines: Vec<Line> = shell
        .history
        .render()
        .into_iter()
        .map(Line::from)
        .collect();
    let history = Paragraph::new(history_lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Previous Tests"),
    );
    f.render_widget(history, chunks[5]);

    let hints = Line::from(vec![
        key_hint("s", "start", &theme),
        Span::raw("  "),
        key_hint("c", "cancel", &theme),
        Span::raw("  "),
        key_hint("t", format!("theme ({})", shell.theme.label()), &theme),
        Span::raw("  "),
        key_hint("x", "clear history", &theme),
        Span::raw("  "),
        key_hint("q", "quit", &theme),
    ]);
    f.render_widget(
        Paragraph::new(hints).alignment(Alignment::Center),
        chunks[7],
    );

    if let Some(message) = shell.error.as_deref() {
        draw_error_dialog(f, area, &theme, message);
    }
}

fn readout_line(label: &str, value: String, theme: &Theme) -> Line<'static> {
    Line::from(vec![
        Span::raw(format!("{label:<16} ")),
        Span::styled(
            value,
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD),
        ),
    ])
}

fn key_hint(key: &str, action: impl Into<String>, theme: &Theme) -> Span<'static> {
    Span::styled(
        format!("{key} {}", action.into()),
        Style::default().fg(theme.accent),
    )
}

fn speed_text(bps: Option<f64>) -> String {
    bps.map(format_speed).unwrap_or_else(|| "-- Mbps".into())
}

fn ping_text(ms: Option<f64>) -> String {
    ms.map(|v| format!("{v:.2} ms"))
        .unwrap_or_else(|| "-- ms".into())
}

fn clock_text() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default()
}

fn draw_error_dialog(f: &mut ratatui::Frame, area: Rect, theme: &Theme, message: &str) {
    let rect = centered_rect(60, 40, area);
    f.render_widget(Clear, rect);
    let dialog = Paragraph::new(vec![
        Line::from(message.to_string()),
        Line::from(""),
        Line::from(Span::styled(
            "press any key to dismiss",
            Style::default().add_modifier(Modifier::DIM),
        )),
    ])
    .wrap(Wrap { trim: true })
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Error")
            .style(Style::default().bg(theme.bg_alt).fg(theme.fg)),
    );
    f.render_widget(dialog, rect);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestResult;

    fn shell_with_tempdir() -> (Shell, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryStore::load_from(dir.path().join("history.json"));
        let shell = Shell::new(RunConfig::default(), Themes::builtin(), history);
        (shell, dir)
    }

    #[tokio::test]
    async fn start_is_a_noop_while_running() {
        let (mut shell, _dir) = shell_with_tempdir();
        let (tx, _rx) = mpsc::unbounded_channel();
        shell.running = true;
        shell.start_test(&tx);
        assert!(shell.run_handle.is_none());
    }

    #[test]
    fn complete_event_appends_history_and_returns_to_idle() {
        let (mut shell, _dir) = shell_with_tempdir();
        shell.running = true;
        shell.progress = 100;
        shell.apply_event(ProgressEvent::Complete(TestResult::new(
            93_500_000.0,
            11_200_000.0,
            18.0,
        )));
        assert!(!shell.running);
        assert_eq!(shell.history.entries().len(), 1);
        // Progress keeps its final value on success; only error and cancel reset it.
        assert_eq!(shell.progress, 100);
    }

    #[test]
    fn error_event_opens_dialog_and_returns_to_idle() {
        let (mut shell, _dir) = shell_with_tempdir();
        shell.running = true;
        shell.apply_event(ProgressEvent::Error("Test failed: offline".into()));
        assert!(!shell.running);
        assert_eq!(shell.error.as_deref(), Some("Test failed: offline"));
        assert!(shell.history.is_empty());
    }

    #[test]
    fn events_update_live_readouts() {
        let (mut shell, _dir) = shell_with_tempdir();
        shell.apply_event(ProgressEvent::Status("Testing download speed…".into()));
        shell.apply_event(ProgressEvent::Server("Cloudflare Amsterdam (NL)".into()));
        shell.apply_event(ProgressEvent::Download(93_500_000.0));
        shell.apply_event(ProgressEvent::Progress(60));

        assert_eq!(shell.status, "Testing download speed…");
        assert_eq!(shell.server.as_deref(), Some("Cloudflare Amsterdam (NL)"));
        assert_eq!(shell.progress, 60);
        assert_eq!(speed_text(shell.download_bps), "93.50 Mbps");
        assert_eq!(speed_text(shell.upload_bps), "-- Mbps");
        assert_eq!(ping_text(shell.ping_ms), "-- ms");
    }

    #[test]
    fn cancel_without_a_run_is_a_noop() {
        let (mut shell, _dir) = shell_with_tempdir();
        let status_before = shell.status.clone();
        shell.cancel_test();
        assert_eq!(shell.status, status_before);
    }

    #[tokio::test]
    async fn cancel_resets_progress_and_status() {
        let (mut shell, _dir) = shell_with_tempdir();
        shell.running = true;
        shell.progress = 30;
        shell.run_handle = Some(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }));
        shell.cancel_test();
        assert!(!shell.running);
        assert_eq!(shell.progress, 0);
        assert_eq!(shell.status, "Test cancelled");
        assert!(shell.run_handle.is_none());
    }

    #[test]
    fn theme_toggle_round_trips() {
        let (mut shell, _dir) = shell_with_tempdir();
        assert_eq!(shell.theme, ThemeName::Dark);
        shell.toggle_theme();
        assert_eq!(shell.theme, ThemeName::Light);
        shell.toggle_theme();
        assert_eq!(shell.theme, ThemeName::Dark);
    }

    #[test]
    fn clear_history_empties_the_panel() {
        let (mut shell, _dir) = shell_with_tempdir();
        shell.apply_event(ProgressEvent::Complete(TestResult::new(
            1_000_000.0,
            1_000_000.0,
            5.0,
        )));
        assert_eq!(shell.history.entries().len(), 1);
        shell.clear_history();
        assert_eq!(shell.history.render(), vec!["No tests yet".to_string()]);
    }
}
