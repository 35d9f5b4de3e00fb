use std::io;
use std::panic;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::core::{CheckResult, CheckStatus, ReportInfo, Severity};
use crate::engine::Engine;
use crate::pipeline::{DashboardState, Pipeline, PipelineEvent, Stage};

const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

pub fn run(engine: Engine, color: bool, log_hint: Option<String>) -> Result<()> {
    enable_raw_mode().context("raw mode の有効化")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("代替画面への切り替え")?;

    let mut tui = Tui {
        terminal: Terminal::new(CrosstermBackend::new(stdout)).context("ターミナルの初期化")?,
    };
    tui.terminal.clear().ok();

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        run_app(&mut tui.terminal, &engine, color, log_hint)
    }));

    let _ = tui.terminal.show_cursor();
    let _ = disable_raw_mode();
    let mut stdout = io::stdout();
    let _ = execute!(stdout, LeaveAlternateScreen);

    match res {
        Ok(res) => res,
        Err(_) => Err(anyhow::anyhow!(
            "TUI 内部で panic が発生しました（端末状態は復旧済みのはずです）"
        )),
    }
}

struct Tui {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Dashboard,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Hosts,
    Reports,
    Checks,
}

impl Focus {
    fn next(self) -> Self {
        match self {
            Focus::Hosts => Focus::Reports,
            Focus::Reports => Focus::Checks,
            Focus::Checks => Focus::Hosts,
        }
    }

    fn prev(self) -> Self {
        match self {
            Focus::Hosts => Focus::Checks,
            Focus::Reports => Focus::Hosts,
            Focus::Checks => Focus::Reports,
        }
    }
}

struct App {
    color: bool,
    backend: String,
    log_hint: Option<String>,

    screen: Screen,
    focus: Focus,
    show_evidence: bool,
    status_filter: Option<CheckStatus>,

    filter: String,
    filter_mode: bool,

    hosts_state: ListState,
    reports_state: ListState,
    checks_state: ListState,

    updated_at: Option<OffsetDateTime>,
    tick: u64,
}

impl App {
    fn new(color: bool, backend: String, log_hint: Option<String>) -> Self {
        Self {
            color,
            backend,
            log_hint,
            screen: Screen::Dashboard,
            focus: Focus::Hosts,
            show_evidence: false,
            status_filter: None,
            filter: String::new(),
            filter_mode: false,
            hosts_state: ListState::default(),
            reports_state: ListState::default(),
            checks_state: ListState::default(),
            updated_at: None,
            tick: 0,
        }
    }

    /// Keeps list cursors on the pipeline's selections after a stage lands.
    fn on_events(&mut self, events: &[PipelineEvent], state: &DashboardState) {
        for ev in events {
            match ev {
                PipelineEvent::Applied(stage) => {
                    self.updated_at = Some(OffsetDateTime::now_utc());
                    match stage {
                        Stage::Hosts => {
                            sync_list(&mut self.hosts_state, state.hosts.len(), state.host_index())
                        }
                        Stage::Reports => sync_list(
                            &mut self.reports_state,
                            state.reports.len(),
                            state.report_index(),
                        ),
                        Stage::Payload => self.checks_state.select(Some(0)),
                    }
                }
                PipelineEvent::Failed(Stage::Reports, _) => self.reports_state.select(None),
                PipelineEvent::Failed(Stage::Payload, _) => self.checks_state.select(None),
                PipelineEvent::Failed(Stage::Hosts, _) | PipelineEvent::Discarded(_) => {}
            }
        }
        self.clamp_checks(state);
    }

    fn visible_checks(&self, checks: &[CheckResult]) -> Vec<usize> {
        visible_check_indices(checks, self.status_filter, &self.filter)
    }

    fn clamp_checks(&mut self, state: &DashboardState) {
        let len = self.visible_checks(&state.checks).len();
        App::move_list_selection(&mut self.checks_state, len, 0);
    }

    fn move_cursor(&mut self, state: &DashboardState, delta: i32) {
        match self.focus {
            Focus::Hosts => App::move_list_selection(&mut self.hosts_state, state.hosts.len(), delta),
            Focus::Reports => {
                App::move_list_selection(&mut self.reports_state, state.reports.len(), delta)
            }
            Focus::Checks => {
                let len = self.visible_checks(&state.checks).len();
                App::move_list_selection(&mut self.checks_state, len, delta)
            }
        }
    }

    /// Enter: commit the cursor of the focused pane as the new selection.
    fn activate(&mut self, pipeline: &mut Pipeline) {
        match self.focus {
            Focus::Hosts => {
                let id = self
                    .hosts_state
                    .selected()
                    .and_then(|i| pipeline.state().hosts.get(i))
                    .map(|h| h.host_id.clone());
                if let Some(id) = id {
                    if pipeline.select_host(&id) {
                        self.reports_state.select(None);
                        self.checks_state.select(None);
                    }
                }
            }
            Focus::Reports => {
                let id = self
                    .reports_state
                    .selected()
                    .and_then(|i| pipeline.state().reports.get(i))
                    .map(|r| r.id);
                if let Some(id) = id {
                    if pipeline.select_report(id) {
                        self.checks_state.select(None);
                    }
                }
            }
            Focus::Checks => self.show_evidence = !self.show_evidence,
        }
    }

    fn cycle_status_filter(&mut self) {
        self.status_filter = match self.status_filter {
            None => Some(CheckStatus::Fail),
            Some(CheckStatus::Fail) => Some(CheckStatus::Error),
            Some(CheckStatus::Error) => Some(CheckStatus::Pass),
            Some(CheckStatus::Pass) => None,
        };
    }

    fn has_check_filter(&self) -> bool {
        self.status_filter.is_some() || !self.filter.trim().is_empty()
    }

    fn move_list_selection(state: &mut ListState, len: usize, delta: i32) {
        if len == 0 {
            state.select(None);
            return;
        }
        let selected = state.selected().unwrap_or(0) as i32;
        let next = (selected + delta).clamp(0, (len as i32).saturating_sub(1));
        state.select(Some(next as usize));
    }
}

fn sync_list(state: &mut ListState, len: usize, selected: Option<usize>) {
    if len == 0 {
        state.select(None);
        return;
    }
    state.select(Some(selected.unwrap_or(0).min(len - 1)));
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    engine: &Engine,
    color: bool,
    log_hint: Option<String>,
) -> Result<()> {
    let mut pipeline = engine.pipeline();
    let mut app = App::new(color, engine.base_url().to_string(), log_hint);
    tracing::info!(backend = engine.base_url(), "dashboard started");
    pipeline.start();

    let tick_rate = Duration::from_millis(200);
    let mut last_tick = Instant::now();

    loop {
        let events = pipeline.poll();
        if !events.is_empty() {
            app.on_events(&events, pipeline.state());
        }

        terminal
            .draw(|f| draw(f, &mut app, &pipeline))
            .context("画面描画")?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout).context("イベント待ち")? {
            if let Event::Key(key) = event::read().context("イベント読み取り")? {
                if key.kind == KeyEventKind::Press && handle_key(&mut app, &mut pipeline, key) {
                    break;
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.tick = app.tick.wrapping_add(1);
            last_tick = Instant::now();
        }
    }

    tracing::info!(in_flight = pipeline.in_flight(), "dashboard closed");
    Ok(())
}

/// Returns `true` when the app should exit.
fn handle_key(app: &mut App, pipeline: &mut Pipeline, key: KeyEvent) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }

    if app.filter_mode {
        match key.code {
            KeyCode::Enter | KeyCode::Esc => {
                app.filter_mode = false;
                app.filter = app.filter.trim().to_string();
            }
            KeyCode::Backspace => {
                app.filter.pop();
            }
            KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                app.filter.clear();
            }
            KeyCode::Char(c) => {
                if !key.modifiers.contains(KeyModifiers::CONTROL)
                    && !key.modifiers.contains(KeyModifiers::ALT)
                {
                    app.filter.push(c);
                }
            }
            _ => {}
        }
        app.clamp_checks(pipeline.state());
        return false;
    }

    match app.screen {
        Screen::Help => match key.code {
            KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('?') => {
                app.screen = Screen::Dashboard;
            }
            _ => {}
        },
        Screen::Dashboard => match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Esc => {
                if !app.has_check_filter() {
                    return true;
                }
                app.filter.clear();
                app.status_filter = None;
                app.clamp_checks(pipeline.state());
            }
            KeyCode::Char('?') => app.screen = Screen::Help,
            KeyCode::Tab => app.focus = app.focus.next(),
            KeyCode::BackTab => app.focus = app.focus.prev(),
            KeyCode::Up | KeyCode::Char('k') => app.move_cursor(pipeline.state(), -1),
            KeyCode::Down | KeyCode::Char('j') => app.move_cursor(pipeline.state(), 1),
            KeyCode::Enter => app.activate(pipeline),
            KeyCode::Char('r') => {
                tracing::info!("refresh requested");
                pipeline.refresh();
            }
            KeyCode::Char('/') => {
                app.filter_mode = true;
                app.focus = Focus::Checks;
            }
            KeyCode::Char('s') => {
                app.cycle_status_filter();
                app.clamp_checks(pipeline.state());
            }
            KeyCode::Char('e') => app.show_evidence = !app.show_evidence,
            _ => {}
        },
    }
    false
}

fn draw(f: &mut ratatui::Frame, app: &mut App, pipeline: &Pipeline) {
    let size = f.size();
    let state = pipeline.state();
    let banner_height = if state.error.is_some() { 3 } else { 0 };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(banner_height),
            Constraint::Min(1),
            Constraint::Length(2),
        ])
        .split(size);

    draw_header(f, chunks[0], app, pipeline);
    if let Some(err) = &state.error {
        draw_error_banner(f, chunks[1], err, app.color);
    }
    match app.screen {
        Screen::Dashboard => draw_dashboard(f, chunks[2], app, pipeline),
        Screen::Help => draw_help(f, chunks[2]),
    }
    draw_footer(f, chunks[3], app);
}

fn draw_header(f: &mut ratatui::Frame, area: Rect, app: &App, pipeline: &Pipeline) {
    let state = pipeline.state();
    let stats = pipeline.statistics();

    let mut spans = vec![
        Span::styled("cisdash", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(" "),
        Span::styled(app.backend.clone(), Style::default().fg(Color::DarkGray)),
    ];
    if let Some(host) = state.selected_host() {
        spans.push(Span::raw("  "));
        spans.push(Span::raw(format!("ホスト: {}", host.display_name())));
    }
    if state.selected_report.is_some() {
        spans.push(Span::raw("  "));
        spans.push(Span::raw("スコア: "));
        spans.push(Span::styled(
            format!("{}%", stats.score),
            score_style(stats.score, app.color),
        ));
    }
    if !pipeline.is_idle() {
        let frame = SPINNER[(app.tick as usize) % SPINNER.len()];
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            format!("{frame} 取得中"),
            Style::default().fg(Color::Cyan),
        ));
    }
    if let Some(at) = app.updated_at {
        if let Ok(s) = at.format(format_description!("[hour]:[minute]:[second]")) {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(
                format!("更新 {s} UTC"),
                Style::default().fg(Color::DarkGray),
            ));
        }
    }
    spans.push(Span::raw("  "));
    spans.push(Span::styled(
        format!("v{}", env!("CARGO_PKG_VERSION")),
        Style::default().fg(Color::DarkGray),
    ));

    let w = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(w, area);
}

fn draw_error_banner(f: &mut ratatui::Frame, area: Rect, err: &str, color: bool) {
    let style = if color {
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
    } else {
        Style::default().add_modifier(Modifier::BOLD)
    };
    let w = Paragraph::new(Line::from(Span::styled(err.to_string(), style)))
        .block(Block::default().borders(Borders::ALL).title("エラー"))
        .wrap(Wrap { trim: true });
    f.render_widget(w, area);
}

fn draw_dashboard(f: &mut ratatui::Frame, area: Rect, app: &mut App, pipeline: &Pipeline) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(area);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(columns[0]);
    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(1)])
        .split(columns[1]);
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(right[1]);

    let state = pipeline.state();
    draw_hosts(f, left[0], app, state);
    draw_reports(f, left[1], app, state);
    draw_stat_cards(f, right[0], app, pipeline);
    draw_checks(f, body[0], app, state);
    draw_detail(f, body[1], app, state);
}

fn pane_block(title: String, focused: bool, color: bool) -> Block<'static> {
    let border = if focused && color {
        Style::default().fg(Color::Yellow)
    } else if focused {
        Style::default().add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    Block::default()
        .borders(Borders::ALL)
        .border_style(border)
        .title(title)
}

fn draw_hosts(f: &mut ratatui::Frame, area: Rect, app: &mut App, state: &DashboardState) {
    let items: Vec<ListItem> = if state.hosts.is_empty() {
        vec![ListItem::new(Line::from("ホストがありません。"))]
    } else {
        state
            .hosts
            .iter()
            .map(|host| {
                let selected = state.selected_host.as_deref() == Some(host.host_id.as_str());
                let marker = if selected { "● " } else { "  " };
                ListItem::new(Line::from(vec![
                    Span::raw(marker),
                    Span::raw(host.display_name().to_string()),
                    Span::raw(" "),
                    Span::styled(
                        format!("({})", host.host_id),
                        Style::default().fg(Color::DarkGray),
                    ),
                ]))
            })
            .collect()
    };

    let list = List::new(items)
        .block(pane_block(
            format!("ホスト（{}）", state.hosts.len()),
            app.focus == Focus::Hosts,
            app.color,
        ))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    f.render_stateful_widget(list, area, &mut app.hosts_state);
}

fn draw_reports(f: &mut ratatui::Frame, area: Rect, app: &mut App, state: &DashboardState) {
    let items: Vec<ListItem> = if state.reports.is_empty() {
        let msg = if state.selected_host.is_none() {
            "ホストが選択されていません。"
        } else {
            "レポートがありません。"
        };
        vec![ListItem::new(Line::from(msg))]
    } else {
        state
            .reports
            .iter()
            .enumerate()
            .map(|(i, report)| {
                let selected = state.selected_report == Some(report.id);
                let marker = if selected { "● " } else { "  " };
                let mut spans = vec![
                    Span::raw(marker),
                    Span::styled(format!("#{}", report.id), Style::default().fg(Color::Cyan)),
                    Span::raw(" "),
                    Span::raw(report.created_at.clone()),
                ];
                if i == 0 {
                    spans.push(Span::styled(" 最新", Style::default().fg(Color::DarkGray)));
                }
                ListItem::new(Line::from(spans))
            })
            .collect()
    };

    let list = List::new(items)
        .block(pane_block(
            format!("レポート（{}）", state.reports.len()),
            app.focus == Focus::Reports,
            app.color,
        ))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    f.render_stateful_widget(list, area, &mut app.reports_state);
}

fn draw_stat_cards(f: &mut ratatui::Frame, area: Rect, app: &App, pipeline: &Pipeline) {
    let stats = pipeline.statistics();
    let cards = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Ratio(1, 4),
            Constraint::Ratio(1, 4),
            Constraint::Ratio(1, 4),
            Constraint::Ratio(1, 4),
        ])
        .split(area);

    let values = [
        ("PASS", stats.pass, status_style(CheckStatus::Pass, app.color)),
        ("FAIL", stats.fail, status_style(CheckStatus::Fail, app.color)),
        ("ERROR", stats.error, status_style(CheckStatus::Error, app.color)),
        ("TOTAL", stats.total, Style::default()),
    ];
    for ((label, value, style), area) in values.into_iter().zip(cards.iter()) {
        let w = Paragraph::new(Line::from(Span::styled(
            value.to_string(),
            style.add_modifier(Modifier::BOLD),
        )))
        .block(Block::default().borders(Borders::ALL).title(label));
        f.render_widget(w, *area);
    }
}

fn draw_checks(f: &mut ratatui::Frame, area: Rect, app: &mut App, state: &DashboardState) {
    let indices = app.visible_checks(&state.checks);
    App::move_list_selection(&mut app.checks_state, indices.len(), 0);

    let items: Vec<ListItem> = if state.loading {
        let frame = SPINNER[(app.tick as usize) % SPINNER.len()];
        vec![ListItem::new(Line::from(format!("{frame} 読み込み中...")))]
    } else if indices.is_empty() {
        if state.checks.is_empty() {
            vec![ListItem::new(Line::from("チェック結果がありません。"))]
        } else {
            vec![
                ListItem::new(Line::from("一致するチェックがありません。")),
                ListItem::new(Line::from(Span::styled(
                    "ヒント: 's' で結果フィルタ、'/' で文字フィルタを変更できます。",
                    Style::default().fg(Color::DarkGray),
                ))),
            ]
        }
    } else {
        indices
            .iter()
            .filter_map(|idx| state.checks.get(*idx))
            .map(|check| {
                ListItem::new(Line::from(vec![
                    Span::styled(
                        format!("{:<5}", check.status.as_str()),
                        status_style(check.status, app.color),
                    ),
                    Span::raw(" "),
                    Span::styled(
                        format!("{:<6}", check.severity.as_str()),
                        severity_style(check.severity, app.color),
                    ),
                    Span::raw(" "),
                    Span::raw(check.check_id.clone()),
                    Span::raw(" "),
                    Span::styled(check.title.clone(), Style::default().fg(Color::Gray)),
                ]))
            })
            .collect()
    };

    let mut title = if app.has_check_filter() {
        format!("チェック（{}/{}）", indices.len(), state.checks.len())
    } else {
        format!("チェック（{}）", state.checks.len())
    };
    if let Some(status) = app.status_filter {
        title.push_str(&format!(" [{status}]"));
    }
    let filter = app.filter.trim();
    if !filter.is_empty() {
        title.push_str(&format!(" /{}", truncate_chars(filter, 20)));
    }

    let list = List::new(items)
        .block(pane_block(title, app.focus == Focus::Checks, app.color))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    if state.loading {
        f.render_widget(list, area);
    } else {
        f.render_stateful_widget(list, area, &mut app.checks_state);
    }
}

fn draw_detail(f: &mut ratatui::Frame, area: Rect, app: &App, state: &DashboardState) {
    let indices = app.visible_checks(&state.checks);
    let check = app
        .checks_state
        .selected()
        .and_then(|sel| indices.get(sel))
        .and_then(|idx| state.checks.get(*idx));

    let mut lines = match check {
        Some(check) if !state.loading => check_detail(check, app.show_evidence, app.color),
        _ => vec![Line::from("チェックが選択されていません。")],
    };
    if let Some(info) = &state.report_info {
        lines.push(Line::from(""));
        lines.extend(report_info_lines(info));
    }

    let w = Paragraph::new(Text::from(lines))
        .block(Block::default().borders(Borders::ALL).title("詳細"))
        .wrap(Wrap { trim: false });
    f.render_widget(w, area);
}

fn label(s: &'static str) -> Span<'static> {
    Span::styled(s, Style::default().fg(Color::DarkGray))
}

fn check_detail(check: &CheckResult, show_evidence: bool, color: bool) -> Vec<Line<'static>> {
    let mut lines = vec![
        Line::from(vec![label("id: "), Span::raw(check.check_id.clone())]),
        Line::from(vec![
            label("結果: "),
            Span::styled(check.status.to_string(), status_style(check.status, color)),
            Span::raw("  "),
            label("重要度: "),
            Span::styled(
                check.severity.to_string(),
                severity_style(check.severity, color),
            ),
        ]),
    ];
    if !check.title.is_empty() {
        lines.push(Line::from(check.title.clone()));
    }

    lines.push(Line::from(""));
    if show_evidence {
        lines.push(Line::from(Span::styled(
            "根拠:",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        let evidence = check.evidence.trim();
        if evidence.is_empty() {
            lines.push(Line::from("（なし）"));
        } else {
            lines.extend(evidence.lines().map(|l| Line::from(l.to_string())));
        }
    } else {
        lines.push(Line::from(Span::styled(
            "ヒント: 'e' で根拠の表示を切り替えます。",
            Style::default().fg(Color::DarkGray),
        )));
    }
    lines
}

fn report_info_lines(info: &ReportInfo) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(Span::styled(
        "レポート情報:",
        Style::default().add_modifier(Modifier::BOLD),
    ))];
    if let Some(id) = info.id {
        lines.push(Line::from(vec![label("id: "), Span::raw(format!("#{id}"))]));
    }
    if let Some(ts) = info.ts_utc.as_deref().filter(|s| !s.is_empty()) {
        lines.push(Line::from(vec![label("スキャン: "), Span::raw(ts.to_string())]));
    }
    if let Some(created) = info.created_at.as_deref().filter(|s| !s.is_empty()) {
        lines.push(Line::from(vec![label("登録: "), Span::raw(created.to_string())]));
    }
    if let Some(facts) = &info.host {
        let os = format!("{} {}", facts.os, facts.os_version);
        if !os.trim().is_empty() {
            lines.push(Line::from(vec![label("OS: "), Span::raw(os.trim().to_string())]));
        }
        if !facts.kernel.is_empty() {
            lines.push(Line::from(vec![label("カーネル: "), Span::raw(facts.kernel.clone())]));
        }
        if !facts.ip.is_empty() {
            lines.push(Line::from(vec![label("IP: "), Span::raw(facts.ip.clone())]));
        }
    }
    if let Some(agent) = &info.agent {
        let name = format!("{} {}", agent.name, agent.version);
        if !name.trim().is_empty() {
            lines.push(Line::from(vec![
                label("エージェント: "),
                Span::raw(name.trim().to_string()),
            ]));
        }
    }
    if !info.packages.is_empty() {
        lines.push(Line::from(vec![
            label("パッケージ: "),
            Span::raw(format!("{}件", info.packages.len())),
        ]));
    }
    lines
}

fn draw_footer(f: &mut ratatui::Frame, area: Rect, app: &App) {
    if app.filter_mode {
        let filter = truncate_chars(app.filter.trim(), 60);
        let line1 = Line::from(vec![
            Span::styled("フィルタ: ", Style::default().fg(Color::DarkGray)),
            Span::styled(
                if filter.is_empty() {
                    "（空）"
                } else {
                    filter.as_str()
                },
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
        ]);
        let line2 = Line::from("Backspace 削除 | Ctrl-U クリア | Enter/Esc 終了 | Ctrl-C 強制終了");
        let w = Paragraph::new(Text::from(vec![line1, line2]))
            .style(Style::default().fg(Color::DarkGray))
            .wrap(Wrap { trim: true });
        f.render_widget(w, area);
        return;
    }

    let line1 = match app.screen {
        Screen::Dashboard => {
            "Tab ペイン切替 | ↑↓/j/k 移動 | Enter 選択 | r 更新 | / フィルタ | s 結果フィルタ | e 根拠"
                .to_string()
        }
        Screen::Help => "Esc/? 閉じる".to_string(),
    };
    let line2 = match &app.log_hint {
        Some(hint) => format!("q 終了 | ? ヘルプ | ログ: {hint}"),
        None => "q 終了 | ? ヘルプ".to_string(),
    };
    let w = Paragraph::new(Text::from(vec![Line::from(line1), Line::from(line2)]))
        .style(Style::default().fg(Color::DarkGray))
        .wrap(Wrap { trim: true });
    f.render_widget(w, area);
}

fn draw_help(f: &mut ratatui::Frame, area: Rect) {
    let text = Text::from(vec![
        Line::from(Span::styled(
            "cisdash ダッシュボード",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from("  Tab / Shift-Tab : ペイン切替（ホスト → レポート → チェック）"),
        Line::from("  ↑↓ / j/k         : カーソル移動"),
        Line::from("  Enter           : ホスト/レポートを選択（チェックでは根拠の切替）"),
        Line::from("  r               : 全体を再取得（選択中ホストは維持、最新レポートに戻る）"),
        Line::from("  /               : 文字フィルタ（id/タイトル/根拠）"),
        Line::from("  s               : 結果フィルタ（FAIL → ERROR → PASS → なし）"),
        Line::from("  e               : 根拠の表示切替"),
        Line::from("  Esc             : フィルタ解除（フィルタがなければ終了）"),
        Line::from("  q               : 終了"),
        Line::from("  Ctrl-C          : 強制終了（どの画面でも）"),
        Line::from(""),
        Line::from("フィルタ入力:"),
        Line::from("  Enter/Esc: 入力終了  Backspace: 削除  Ctrl-U: クリア"),
        Line::from(""),
        Line::from("スコアは表示中レポートの全チェックに対する PASS の割合です（フィルタの影響を受けません）。"),
    ]);

    let w = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("ヘルプ"))
        .wrap(Wrap { trim: false });
    f.render_widget(w, centered_rect(70, 70, area));
}

fn truncate_chars(input: &str, max_chars: usize) -> String {
    let mut s = String::new();
    for (i, ch) in input.chars().enumerate() {
        if i >= max_chars {
            s.push('…');
            break;
        }
        s.push(ch);
    }
    s
}

fn filter_tokens(input: &str) -> Vec<String> {
    input
        .split_whitespace()
        .map(|s| s.to_lowercase())
        .collect()
}

fn visible_check_indices(
    checks: &[CheckResult],
    status: Option<CheckStatus>,
    filter: &str,
) -> Vec<usize> {
    let tokens = filter_tokens(filter);
    checks
        .iter()
        .enumerate()
        .filter(|(_, c)| status.is_none_or(|s| c.status == s))
        .filter(|(_, c)| tokens.iter().all(|t| c.matches_text(t)))
        .map(|(i, _)| i)
        .collect()
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
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
        .split(popup_layout[1])[1]
}

fn status_style(status: CheckStatus, enabled: bool) -> Style {
    if !enabled {
        return Style::default();
    }
    match status {
        CheckStatus::Pass => Style::default().fg(Color::Green),
        CheckStatus::Fail => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        CheckStatus::Error => Style::default().fg(Color::Yellow),
    }
}

fn severity_style(severity: Severity, enabled: bool) -> Style {
    if !enabled {
        return Style::default();
    }
    match severity {
        Severity::Low => Style::default().fg(Color::DarkGray),
        Severity::Medium => Style::default().fg(Color::Yellow),
        Severity::High => Style::default().fg(Color::Red),
    }
}

fn score_style(score: u8, enabled: bool) -> Style {
    let style = Style::default().add_modifier(Modifier::BOLD);
    if !enabled {
        return style;
    }
    match score {
        80..=100 => style.fg(Color::Green),
        50..=79 => style.fg(Color::Yellow),
        _ => style.fg(Color::Red),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, ComplianceApi, HealthStatus};
    use crate::core::{Host, ReportDocument, ReportMeta, ReportPayload};
    use crate::pipeline::PipelineOptions;
    use async_trait::async_trait;
    use ratatui::backend::TestBackend;
    use std::sync::Arc;

    struct StaticApi;

    #[async_trait]
    impl ComplianceApi for StaticApi {
        async fn list_hosts(&self) -> Result<Vec<Host>, ApiError> {
            Ok(vec![
                Host {
                    host_id: "h1".to_string(),
                    hostname: "web1".to_string(),
                },
                Host {
                    host_id: "h2".to_string(),
                    hostname: "db1".to_string(),
                },
            ])
        }

        async fn list_reports(
            &self,
            host_id: &str,
            _limit: usize,
        ) -> Result<Vec<ReportMeta>, ApiError> {
            let id = if host_id == "h1" { 42 } else { 77 };
            Ok(vec![ReportMeta {
                id,
                created_at: "2024-05-01".to_string(),
                ts_utc: None,
            }])
        }

        async fn get_report(&self, report_id: u64) -> Result<ReportDocument, ApiError> {
            Ok(ReportDocument {
                info: ReportInfo {
                    id: Some(report_id),
                    ..ReportInfo::default()
                },
                payload: ReportPayload {
                    checks: vec![
                        check("CIS-1", CheckStatus::Pass, "ok"),
                        check("CIS-2", CheckStatus::Fail, "PermitRootLogin yes"),
                    ],
                },
            })
        }

        async fn health(&self) -> Result<HealthStatus, ApiError> {
            Ok(HealthStatus {
                status: "ok".to_string(),
                time: String::new(),
            })
        }
    }

    fn check(id: &str, status: CheckStatus, evidence: &str) -> CheckResult {
        CheckResult {
            check_id: id.to_string(),
            title: format!("title {id}"),
            status,
            severity: Severity::High,
            evidence: evidence.to_string(),
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    async fn loaded() -> (App, Pipeline) {
        let mut pipeline = Pipeline::new(Arc::new(StaticApi), PipelineOptions::default());
        let mut app = App::new(false, "http://127.0.0.1:8000".to_string(), None);
        pipeline.start();
        let events = pipeline.settle().await;
        app.on_events(&events, pipeline.state());
        (app, pipeline)
    }

    fn render(app: &mut App, pipeline: &Pipeline) -> String {
        let mut terminal = Terminal::new(TestBackend::new(140, 40)).expect("terminal");
        terminal.draw(|f| draw(f, app, pipeline)).expect("draw");
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|c| c.symbol())
            .collect()
    }

    #[test]
    fn visible_checks_apply_status_and_all_tokens() {
        let checks = vec![
            check("CIS-SSH-1", CheckStatus::Fail, "PermitRootLogin yes"),
            check("CIS-SSH-2", CheckStatus::Pass, ""),
            check("CIS-FW-1", CheckStatus::Fail, "ufw inactive"),
        ];
        assert_eq!(visible_check_indices(&checks, None, ""), vec![0, 1, 2]);
        assert_eq!(
            visible_check_indices(&checks, Some(CheckStatus::Fail), ""),
            vec![0, 2]
        );
        assert_eq!(visible_check_indices(&checks, None, "ssh"), vec![0, 1]);
        assert_eq!(visible_check_indices(&checks, None, "ssh root"), vec![0]);
        assert!(visible_check_indices(&checks, Some(CheckStatus::Error), "").is_empty());
    }

    #[test]
    fn focus_and_status_filter_cycle() {
        assert_eq!(Focus::Hosts.next().next().next(), Focus::Hosts);
        assert_eq!(Focus::Hosts.prev(), Focus::Checks);

        let mut app = App::new(false, String::new(), None);
        let mut seen = Vec::new();
        for _ in 0..4 {
            app.cycle_status_filter();
            seen.push(app.status_filter);
        }
        assert_eq!(
            seen,
            vec![
                Some(CheckStatus::Fail),
                Some(CheckStatus::Error),
                Some(CheckStatus::Pass),
                None
            ]
        );
    }

    #[tokio::test]
    async fn cursors_follow_auto_selection() {
        let (app, pipeline) = loaded().await;
        assert_eq!(pipeline.state().selected_host.as_deref(), Some("h1"));
        assert_eq!(app.hosts_state.selected(), Some(0));
        assert_eq!(app.reports_state.selected(), Some(0));
        assert_eq!(app.checks_state.selected(), Some(0));
        assert!(app.updated_at.is_some());
    }

    #[tokio::test]
    async fn enter_on_hosts_pane_switches_host() {
        let (mut app, mut pipeline) = loaded().await;

        assert!(!handle_key(&mut app, &mut pipeline, key(KeyCode::Char('j'))));
        assert!(!handle_key(&mut app, &mut pipeline, key(KeyCode::Enter)));
        assert_eq!(pipeline.state().selected_host.as_deref(), Some("h2"));
        assert_eq!(app.reports_state.selected(), None);

        let events = pipeline.settle().await;
        app.on_events(&events, pipeline.state());
        assert_eq!(pipeline.state().selected_report, Some(77));
        assert_eq!(app.reports_state.selected(), Some(0));
    }

    #[tokio::test]
    async fn filter_mode_edits_and_trims() {
        let (mut app, mut pipeline) = loaded().await;

        handle_key(&mut app, &mut pipeline, key(KeyCode::Char('/')));
        assert!(app.filter_mode);
        assert_eq!(app.focus, Focus::Checks);
        for c in " cis-2 ".chars() {
            handle_key(&mut app, &mut pipeline, key(KeyCode::Char(c)));
        }
        // 'q' is text while editing.
        assert!(!handle_key(&mut app, &mut pipeline, key(KeyCode::Char('q'))));
        handle_key(&mut app, &mut pipeline, key(KeyCode::Backspace));
        handle_key(&mut app, &mut pipeline, key(KeyCode::Enter));
        assert!(!app.filter_mode);
        assert_eq!(app.filter, "cis-2");
        assert_eq!(app.visible_checks(&pipeline.state().checks), vec![1]);

        // Esc clears filters first, then quits.
        assert!(!handle_key(&mut app, &mut pipeline, key(KeyCode::Esc)));
        assert!(app.filter.is_empty());
        assert!(handle_key(&mut app, &mut pipeline, key(KeyCode::Esc)));
    }

    #[tokio::test]
    async fn quit_and_help_keys() {
        let (mut app, mut pipeline) = loaded().await;

        handle_key(&mut app, &mut pipeline, key(KeyCode::Char('?')));
        assert_eq!(app.screen, Screen::Help);
        assert!(!handle_key(&mut app, &mut pipeline, key(KeyCode::Char('q'))));
        assert_eq!(app.screen, Screen::Dashboard);

        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(handle_key(&mut app, &mut pipeline, ctrl_c));
        assert!(handle_key(&mut app, &mut pipeline, key(KeyCode::Char('q'))));
    }

    #[tokio::test]
    async fn dashboard_renders_score_and_checks() {
        let (mut app, pipeline) = loaded().await;
        let screen = render(&mut app, &pipeline);

        assert!(screen.contains("cisdash"), "{screen}");
        assert!(screen.contains("web1"), "{screen}");
        assert!(screen.contains("50%"), "{screen}");
        assert!(screen.contains("CIS-2"), "{screen}");
        assert!(screen.contains("TOTAL"), "{screen}");
        assert!(!screen.contains("PermitRootLogin"), "{screen}");

        app.show_evidence = true;
        app.checks_state.select(Some(1));
        let screen = render(&mut app, &pipeline);
        assert!(screen.contains("PermitRootLogin"), "{screen}");
    }
}
