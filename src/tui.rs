use anyhow::Result;
use crossterm::{
    ExecutableCommand,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    widgets::{
        Bar, BarChart, BarGroup, Block, Borders, Cell, Clear, Gauge, List, ListItem, ListState,
        Paragraph, Row, Table, Wrap,
    },
};
use std::io::stdout;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::analysis::{AnalysisGateway, AnalysisResponse};
use crate::app::{AnalysisTicket, App, ResultsView, View};
use crate::backends::Backends;
use crate::calc::{self, format_usd};
use crate::config::BackendMode;
use crate::error::AnalysisError;
use crate::input::{FIELD_COUNT, FIELD_LABELS, FormFields};
use crate::models::{AnalysisResult, Decision, GroundingChunk, Trend, User};
use crate::validator::{self, CompleteAnalysis};

const TICK: Duration = Duration::from_millis(100);
const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

type Outcome = (AnalysisTicket, Result<AnalysisResponse, AnalysisError>);

struct UiState {
    form: FormFields,
    focus: usize,
    cursor: usize,
    selected: Vec<String>,
    confirm_delete: Option<String>,
    tick: usize,
    quit: bool,
}

impl UiState {
    fn new() -> Self {
        Self {
            form: FormFields::default(),
            focus: 0,
            cursor: 0,
            selected: Vec::new(),
            confirm_delete: None,
            tick: 0,
            quit: false,
        }
    }

    fn next_field(&mut self) {
        self.focus = (self.focus + 1) % FIELD_COUNT;
    }

    fn prev_field(&mut self) {
        self.focus = (self.focus + FIELD_COUNT - 1) % FIELD_COUNT;
    }

    fn next_row(&mut self, rows: usize) {
        if rows > 0 && self.cursor < rows - 1 {
            self.cursor += 1;
        }
    }

    fn prev_row(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    fn toggle(&mut self, id: &str) {
        if let Some(pos) = self.selected.iter().position(|s| s == id) {
            self.selected.remove(pos);
        } else {
            self.selected.push(id.to_string());
        }
    }

    fn sync(&mut self, saved: &[AnalysisResult]) {
        self.selected
            .retain(|id| saved.iter().any(|a| a.id.as_deref() == Some(id.as_str())));
        if self.cursor >= saved.len() {
            self.cursor = saved.len().saturating_sub(1);
        }
    }
}

struct Modes {
    analysis: BackendMode,
    account: BackendMode,
}

pub fn run(backends: &Backends) -> Result<()> {
    let mut app = App::new();
    let mut ui = UiState::new();

    let (auth_tx, auth_rx) = mpsc::channel::<Option<User>>();
    let subscription = backends.auth.on_auth_state_changed(Box::new(move |user: Option<&User>| {
        let _ = auth_tx.send(user.cloned());
    }));

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut app, &mut ui, backends, &auth_rx);

    subscription.unsubscribe();

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut App,
    ui: &mut UiState,
    backends: &Backends,
    auth_rx: &Receiver<Option<User>>,
) -> Result<()> {
    let (outcome_tx, outcome_rx) = mpsc::channel::<Outcome>();
    let modes = Modes {
        analysis: backends.analysis_mode(),
        account: backends.auth.mode(),
    };

    loop {
        while let Ok(user) = auth_rx.try_recv() {
            app.on_auth_changed(user, &*backends.store);
            ui.sync(&app.saved_analyses);
        }
        while let Ok((ticket, outcome)) = outcome_rx.try_recv() {
            app.complete_analysis(&ticket, outcome);
        }

        terminal.draw(|frame| draw(frame, app, ui, &modes))?;
        if ui.quit {
            break;
        }

        if event::poll(TICK)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    handle_key(key, app, ui, backends, &outcome_tx);
                    ui.sync(&app.saved_analyses);
                }
            }
        }
        ui.tick = ui.tick.wrapping_add(1);
    }
    Ok(())
}

fn spawn_analysis(gateway: Arc<AnalysisGateway>, ticket: AnalysisTicket, tx: Sender<Outcome>) {
    thread::spawn(move || {
        let outcome = gateway.get_analysis(&ticket.input);
        // The loop may already be gone if the user quit mid-request.
        if tx.send((ticket, outcome)).is_err() {
            debug!("analysis finished after the UI closed");
        }
    });
}

fn handle_key(
    key: KeyEvent,
    app: &mut App,
    ui: &mut UiState,
    backends: &Backends,
    outcome_tx: &Sender<Outcome>,
) {
    let store = &*backends.store;
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    if ctrl && key.code == KeyCode::Char('c') {
        ui.quit = true;
        return;
    }

    // Modal layers first: alert, delete confirmation, auth prompt.
    if app.alert.is_some() {
        if matches!(key.code, KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ')) {
            app.dismiss_alert();
        }
        return;
    }
    if let Some(id) = ui.confirm_delete.take() {
        if matches!(key.code, KeyCode::Char('y') | KeyCode::Char('Y')) {
            app.delete_saved(store, &id);
        }
        return;
    }
    if app.auth_prompt_open {
        match key.code {
            KeyCode::Enter | KeyCode::Char('g') => app.login(&*backends.auth),
            KeyCode::Esc | KeyCode::Char('q') => app.close_auth_prompt(),
            _ => {}
        }
        return;
    }

    if app.view == View::Form {
        handle_form_key(key, ctrl, app, ui, backends, outcome_tx);
        return;
    }

    // An incomplete result offers nothing but starting over.
    if app.view == View::Results && matches!(app.results_view(), ResultsView::Incomplete) {
        match key.code {
            KeyCode::Char('q') => ui.quit = true,
            KeyCode::Char('n') | KeyCode::Enter => app.reset(),
            _ => {}
        }
        return;
    }

    match key.code {
        KeyCode::Char('q') => {
            ui.quit = true;
            return;
        }
        KeyCode::Char('n') => {
            app.reset();
            return;
        }
        KeyCode::Char('d') => {
            app.show_dashboard(store);
            return;
        }
        KeyCode::Char('l') => {
            toggle_login(app, backends);
            return;
        }
        _ => {}
    }

    match app.view {
        View::Form | View::Loading => {
            if key.code == KeyCode::Esc {
                app.reset();
            }
        }
        View::Results => {
            if key.code == KeyCode::Char('s') {
                app.save_current(store);
            }
        }
        View::Dashboard => {
            let rows = app.saved_analyses.len();
            let current_id = app
                .saved_analyses
                .get(ui.cursor)
                .and_then(|a| a.id.clone());
            match key.code {
                KeyCode::Down | KeyCode::Char('j') => ui.next_row(rows),
                KeyCode::Up | KeyCode::Char('k') => ui.prev_row(),
                KeyCode::Char(' ') => {
                    if let Some(id) = current_id {
                        ui.toggle(&id);
                    }
                }
                KeyCode::Enter => {
                    if let Some(id) = current_id {
                        app.view_saved(&id);
                    }
                }
                KeyCode::Char('x') | KeyCode::Delete => ui.confirm_delete = current_id,
                KeyCode::Char('c') => {
                    if app.start_compare(&ui.selected) {
                        ui.selected.clear();
                    }
                }
                _ => {}
            }
        }
        View::Compare => {
            if matches!(key.code, KeyCode::Esc | KeyCode::Char('b')) {
                app.show_dashboard(store);
            }
        }
    }
}

fn handle_form_key(
    key: KeyEvent,
    ctrl: bool,
    app: &mut App,
    ui: &mut UiState,
    backends: &Backends,
    outcome_tx: &Sender<Outcome>,
) {
    if ctrl {
        match key.code {
            KeyCode::Char('d') => app.show_dashboard(&*backends.store),
            KeyCode::Char('l') => toggle_login(app, backends),
            KeyCode::Char('r') => ui.form = FormFields::default(),
            _ => {}
        }
        return;
    }

    match key.code {
        KeyCode::Esc => {
            if app.error.is_some() {
                app.dismiss_error();
            } else {
                ui.quit = true;
            }
        }
        KeyCode::Down | KeyCode::Tab => ui.next_field(),
        KeyCode::Up | KeyCode::BackTab => ui.prev_field(),
        KeyCode::Backspace => ui.form.pop_char(ui.focus),
        KeyCode::Char(c) => ui.form.push_char(ui.focus, c),
        KeyCode::Enter => match ui.form.collect() {
            Ok(input) => {
                if let Some(ticket) = app.submit(input) {
                    spawn_analysis(Arc::clone(&backends.gateway), ticket, outcome_tx.clone());
                }
            }
            Err(e) => app.error = Some(e.to_string()),
        },
        _ => {}
    }
}

fn toggle_login(app: &mut App, backends: &Backends) {
    if app.current_user.is_some() {
        app.logout(&*backends.auth);
    } else {
        app.open_auth_prompt();
    }
}

// --- Drawing ---

fn draw(frame: &mut Frame, app: &App, ui: &UiState, modes: &Modes) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(frame.area());

    draw_header(frame, chunks[0], app, modes);

    match app.view {
        View::Form => draw_form(frame, chunks[1], app, ui),
        View::Loading => draw_loading(frame, chunks[1], ui),
        View::Results => match app.results_view() {
            ResultsView::Complete(analysis) => {
                draw_results(frame, chunks[1], &analysis, &app.citations, app)
            }
            ResultsView::Incomplete => draw_incomplete(frame, chunks[1]),
        },
        View::Dashboard => draw_dashboard(frame, chunks[1], app, ui),
        View::Compare => draw_compare(frame, chunks[1], &app.analyses_to_compare),
    }

    draw_status(frame, chunks[2], app, ui);

    let help = Paragraph::new(help_text(app)).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, chunks[3]);

    if app.auth_prompt_open {
        draw_auth_prompt(frame, modes.account);
    }
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App, modes: &Modes) {
    let mode_style = |mode: BackendMode| match mode {
        BackendMode::Live => Style::default().fg(Color::Green),
        BackendMode::Simulated => Style::default().fg(Color::Yellow),
    };
    let user = match &app.current_user {
        Some(user) => Span::raw(format!("  {}", user.display_name())),
        None => Span::styled("  not signed in", Style::default().fg(Color::DarkGray)),
    };
    let line = Line::from(vec![
        Span::styled(
            " HomeWise AI ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" analysis: "),
        Span::styled(modes.analysis.to_string(), mode_style(modes.analysis)),
        Span::raw("  account: "),
        Span::styled(modes.account.to_string(), mode_style(modes.account)),
        user,
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

fn draw_status(frame: &mut Frame, area: Rect, app: &App, ui: &UiState) {
    let line = if ui.confirm_delete.is_some() {
        Line::from(Span::styled(
            " Are you sure you want to delete this analysis? (y/n)",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ))
    } else if let Some(alert) = &app.alert {
        Line::from(Span::styled(
            format!(" {}  [Enter]", alert),
            Style::default().fg(Color::Black).bg(Color::Yellow),
        ))
    } else {
        Line::from("")
    };
    frame.render_widget(Paragraph::new(line), area);
}

fn help_text(app: &App) -> &'static str {
    if app.auth_prompt_open {
        return " Enter:sign in  Esc:close";
    }
    match app.view {
        View::Form => " Tab/arrows:field  Enter:analyze  ^R:defaults  ^D:dashboard  ^L:login/logout  Esc:quit",
        View::Loading => " Esc:cancel  q:quit",
        View::Results => match app.results_view() {
            ResultsView::Complete(_) => " n:analyze another  s:save  d:dashboard  l:login/logout  q:quit",
            ResultsView::Incomplete => " n:start new analysis  q:quit",
        },
        View::Dashboard => " j/k:move  space:select  c:compare  Enter:view  x:delete  n:new  q:quit",
        View::Compare => " b:back to dashboard  n:new  q:quit",
    }
}

fn decision_color(decision: Decision) -> Color {
    match decision {
        Decision::Good => Color::Green,
        Decision::Borderline => Color::Yellow,
        Decision::Bad => Color::Red,
    }
}

fn trend_label(trend: Trend) -> &'static str {
    match trend {
        Trend::Up => "Upward",
        Trend::Down => "Downward",
        Trend::Stable => "Stable",
    }
}

fn bold(text: impl Into<String>) -> Span<'static> {
    Span::styled(text.into(), Style::default().add_modifier(Modifier::BOLD))
}

fn draw_form(frame: &mut Frame, area: Rect, app: &App, ui: &UiState) {
    let error_height = if app.error.is_some() { 3 } else { 0 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(error_height),
            Constraint::Min(0),
        ])
        .split(area);

    let hero = Paragraph::new(vec![
        Line::from(bold("Make smarter real estate decisions.")),
        Line::from(Span::styled(
            "Enter the property and your finances; the analysis covers affordability, market, cost and location.",
            Style::default().fg(Color::DarkGray),
        )),
    ]);
    frame.render_widget(hero, chunks[0]);

    if let Some(error) = &app.error {
        let error = Paragraph::new(format!("Error: {}", error))
            .style(Style::default().fg(Color::Red))
            .block(Block::default().borders(Borders::ALL))
            .wrap(Wrap { trim: true });
        frame.render_widget(error, chunks[1]);
    }

    let items: Vec<ListItem> = FIELD_LABELS
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let cursor = if i == ui.focus { "_" } else { "" };
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:<38}", label), Style::default().fg(Color::Cyan)),
                Span::raw(format!("{}{}", ui.form.get(i), cursor)),
            ]))
        })
        .collect();

    let mut list_state = ListState::default();
    list_state.select(Some(ui.focus));
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(" Property & Finances "))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");
    frame.render_stateful_widget(list, chunks[2], &mut list_state);
}

fn draw_loading(frame: &mut Frame, area: Rect, ui: &UiState) {
    let spinner = SPINNER[ui.tick % SPINNER.len()];
    let text = vec![
        Line::from(""),
        Line::from(bold(format!("{} Analyzing your property...", spinner))),
        Line::from(""),
        Line::from(Span::styled(
            "Checking market data, affordability and location. This can take a minute.",
            Style::default().fg(Color::DarkGray),
        )),
    ];
    let widget = Paragraph::new(text)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(widget, area);
}

fn draw_incomplete(frame: &mut Frame, area: Rect) {
    let text = vec![
        Line::from(""),
        Line::from(Span::styled(
            "Incomplete Analysis",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from("This analysis is missing required data and cannot be displayed."),
        Line::from("Press n to start a new analysis."),
    ];
    let widget = Paragraph::new(text)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(widget, area);
}

fn draw_results(
    frame: &mut Frame,
    area: Rect,
    analysis: &CompleteAnalysis,
    citations: &[GroundingChunk],
    app: &App,
) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(7),
            Constraint::Length(5),
            Constraint::Min(8),
            Constraint::Length(7),
        ])
        .split(area);

    // Verdict
    let verdict = analysis.verdict;
    let color = decision_color(analysis.decision);
    let mut lines = vec![
        Line::from(vec![
            Span::raw("Verdict: "),
            Span::styled(
                analysis.decision.to_string().to_uppercase(),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!("   {}", analysis.user_input.property_location)),
        ]),
        Line::from(verdict.summary.clone()),
    ];
    for pro in &verdict.pros {
        lines.push(Line::from(Span::styled(format!("+ {}", pro), Style::default().fg(Color::Green))));
    }
    for con in &verdict.cons {
        lines.push(Line::from(Span::styled(format!("- {}", con), Style::default().fg(Color::Red))));
    }
    let title = if app.is_saved() { " Verdict (saved) " } else { " Verdict " };
    frame.render_widget(
        Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: true }),
        rows[0],
    );

    // Gauges
    let gauges = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(34),
            Constraint::Percentage(33),
            Constraint::Percentage(33),
        ])
        .split(rows[1]);

    let affordability = analysis.affordability;
    frame.render_widget(
        Gauge::default()
            .block(Block::default().borders(Borders::ALL).title(" Affordability Index "))
            .gauge_style(Style::default().fg(index_color(affordability.affordability_index)))
            .percent(percent(affordability.affordability_index))
            .label(format!(
                "{:.0}/100  DTI {:.1}%",
                affordability.affordability_index, affordability.dti_ratio
            )),
        gauges[0],
    );

    let market = analysis.market_analysis;
    frame.render_widget(
        Gauge::default()
            .block(Block::default().borders(Borders::ALL).title(" Market Sentiment "))
            .gauge_style(Style::default().fg(index_color(market.sentiment)))
            .percent(percent(market.sentiment))
            .label(format!("{:.0}/100  {}", market.sentiment, trend_label(market.trend))),
        gauges[1],
    );

    frame.render_widget(
        Paragraph::new(vec![
            Line::from(bold(format!("{:.1} years", analysis.break_even.years))),
            Line::from(analysis.break_even.narrative.clone()),
        ])
        .block(Block::default().borders(Borders::ALL).title(" Break-Even "))
        .wrap(Wrap { trim: true }),
        gauges[2],
    );

    // Charts
    let charts = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(rows[2]);

    let cost = analysis.ownership_cost;
    let cost_bars: Vec<Bar> = [
        ("P&I", cost.principal_and_interest),
        ("Tax", cost.property_tax),
        ("Insurance", cost.home_insurance),
        ("Upkeep", cost.maintenance),
    ]
    .iter()
    .map(|(label, value)| {
        Bar::default()
            .value(value.max(0.0).round() as u64)
            .text_value(format_usd(*value))
            .label(Line::from(*label))
    })
    .collect();
    frame.render_widget(
        BarChart::default()
            .block(Block::default().borders(Borders::ALL).title(format!(
                " Monthly Ownership Cost: {} ",
                format_usd(cost.total_monthly_cost)
            )))
            .bar_width(10)
            .bar_gap(2)
            .bar_style(Style::default().fg(Color::Cyan))
            .data(BarGroup::default().bars(&cost_bars)),
        charts[0],
    );

    let location = analysis.location_score;
    let score_bars: Vec<Bar> = [
        ("Schools", location.schools),
        ("Safety", location.crime),
        ("Amenities", location.amenities),
        ("Overall", location.overall),
    ]
    .iter()
    .map(|(label, value)| {
        Bar::default()
            .value(value.clamp(0.0, 10.0).round() as u64)
            .text_value(format!("{:.1}", value))
            .label(Line::from(*label))
    })
    .collect();
    frame.render_widget(
        BarChart::default()
            .block(Block::default().borders(Borders::ALL).title(" Location Score "))
            .bar_width(9)
            .bar_gap(1)
            .max(10)
            .bar_style(Style::default().fg(Color::Magenta))
            .data(BarGroup::default().bars(&score_bars)),
        charts[1],
    );

    // Commute, local check, sources
    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[3]);

    let input = analysis.user_input;
    let commute = analysis.commute;
    let payment = calc::monthly_payment(input.loan_amount(), input.interest_rate, f64::from(input.loan_term));
    let dti = calc::debt_to_income(input.monthly_debts + cost.total_monthly_cost, input.annual_income);
    frame.render_widget(
        Paragraph::new(vec![
            Line::from(format!(
                "{} -> {}: {:.0} min, {:.1} mi",
                input.property_location, input.work_location, commute.time, commute.distance
            )),
            Line::from(commute.narrative.clone()),
            Line::from(Span::styled(
                format!(
                    "Local check: P&I {} /mo, DTI with housing {:.1}%",
                    format_usd(payment),
                    dti
                ),
                Style::default().fg(Color::DarkGray),
            )),
        ])
        .block(Block::default().borders(Borders::ALL).title(" Commute "))
        .wrap(Wrap { trim: true }),
        bottom[0],
    );

    let sources: Vec<Line> = if citations.is_empty() {
        vec![Line::from(Span::styled("No web sources.", Style::default().fg(Color::DarkGray)))]
    } else {
        citations
            .iter()
            .filter_map(|chunk| chunk.web.as_ref())
            .map(|web| {
                let title = web.title.as_deref().or(web.uri.as_deref()).unwrap_or("(untitled)");
                Line::from(format!("* {}", title))
            })
            .collect()
    };
    frame.render_widget(
        Paragraph::new(sources)
            .block(Block::default().borders(Borders::ALL).title(" Sources "))
            .wrap(Wrap { trim: true }),
        bottom[1],
    );
}

fn percent(value: f64) -> u16 {
    value.clamp(0.0, 100.0).round() as u16
}

fn index_color(value: f64) -> Color {
    if value >= 70.0 {
        Color::Green
    } else if value >= 40.0 {
        Color::Yellow
    } else {
        Color::Red
    }
}

fn draw_dashboard(frame: &mut Frame, area: Rect, app: &App, ui: &UiState) {
    let email = app
        .current_user
        .as_ref()
        .map(|u| u.display_name().to_string())
        .unwrap_or_default();
    let title = format!(" My Dashboard: {}  Compare ({}) ", email, ui.selected.len());

    if app.saved_analyses.is_empty() {
        let empty = Paragraph::new("You haven't saved any analyses yet.")
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title(title));
        frame.render_widget(empty, area);
        return;
    }

    let items: Vec<ListItem> = app
        .saved_analyses
        .iter()
        .map(|analysis| {
            let id = analysis.id.as_deref().unwrap_or("");
            let check = if ui.selected.iter().any(|s| s == id) { "[x]" } else { "[ ]" };
            let (dot, decision) = match analysis.decision() {
                Some(decision) => (
                    Span::styled("●", Style::default().fg(decision_color(decision))),
                    decision.to_string(),
                ),
                None => (Span::styled("?", Style::default().fg(Color::DarkGray)), "incomplete".to_string()),
            };
            let price = analysis
                .user_input
                .as_ref()
                .map(|input| format_usd(input.property_price))
                .unwrap_or_else(|| "-".to_string());
            let saved = analysis
                .saved_at
                .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            ListItem::new(Line::from(vec![
                Span::raw(format!("{} ", check)),
                dot,
                Span::raw(format!(
                    " {:<30} {:<11} {:>12}  {}",
                    truncate(analysis.property_location(), 30),
                    decision,
                    price,
                    saved
                )),
            ]))
        })
        .collect();

    let mut list_state = ListState::default();
    list_state.select(Some(ui.cursor));
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn draw_compare(frame: &mut Frame, area: Rect, analyses: &[AnalysisResult]) {
    let block = Block::default().borders(Borders::ALL).title(" Compare Properties ");
    if analyses.is_empty() {
        frame.render_widget(
            Paragraph::new("No analyses selected for comparison.").block(block),
            area,
        );
        return;
    }

    let columns: Vec<Option<CompleteAnalysis>> = analyses.iter().map(validator::complete).collect();
    let metric = |name: &'static str, f: &dyn Fn(&CompleteAnalysis) -> String| {
        let mut cells = vec![Cell::from(name).style(Style::default().fg(Color::Cyan))];
        cells.extend(columns.iter().map(|column| match column {
            Some(analysis) => Cell::from(f(analysis)),
            None => Cell::from("n/a").style(Style::default().fg(Color::DarkGray)),
        }));
        Row::new(cells)
    };

    let rows = vec![
        Row::new(
            std::iter::once(Cell::from("Verdict").style(Style::default().fg(Color::Cyan))).chain(
                columns.iter().map(|column| match column {
                    Some(analysis) => Cell::from(analysis.decision.to_string().to_uppercase())
                        .style(Style::default().fg(decision_color(analysis.decision))),
                    None => Cell::from("incomplete").style(Style::default().fg(Color::DarkGray)),
                }),
            ),
        ),
        metric("Price", &|a| format_usd(a.user_input.property_price)),
        metric("Monthly Cost", &|a| format_usd(a.ownership_cost.total_monthly_cost)),
        metric("Affordability", &|a| {
            format!("{:.0}/100 (DTI {:.1}%)", a.affordability.affordability_index, a.affordability.dti_ratio)
        }),
        metric("Market Sentiment", &|a| {
            format!("{:.0}/100 {}", a.market_analysis.sentiment, trend_label(a.market_analysis.trend))
        }),
        metric("Break-Even", &|a| format!("{:.1} years", a.break_even.years)),
        metric("Location", &|a| format!("{:.1}/10", a.location_score.overall)),
    ];

    let header = Row::new(
        std::iter::once(Cell::from("Property")).chain(
            analyses
                .iter()
                .map(|a| Cell::from(truncate(a.property_location(), 24))),
        ),
    )
    .style(Style::default().add_modifier(Modifier::BOLD));

    let widths: Vec<Constraint> = std::iter::once(Constraint::Length(18))
        .chain(analyses.iter().map(|_| Constraint::Min(24)))
        .collect();

    let table = Table::new(rows, widths).header(header).block(block);
    frame.render_widget(table, area);
}

fn draw_auth_prompt(frame: &mut Frame, account: BackendMode) {
    let area = centered_rect(60, 9, frame.area());
    let body = match account {
        BackendMode::Live => "Press Enter to sign in with Google.",
        BackendMode::Simulated => {
            "Press Enter to sign in as the demo user. Your data will be saved on this machine only."
        }
    };
    let text = vec![
        Line::from(bold("Sign in to save and compare analyses")),
        Line::from(""),
        Line::from(body),
        Line::from(""),
        Line::from(Span::styled("Esc to close", Style::default().fg(Color::DarkGray))),
    ];
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title(" Login "))
            .wrap(Wrap { trim: true }),
        area,
    );
}

fn centered_rect(width_percent: u16, height: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),
            Constraint::Length(height),
            Constraint::Min(0),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::LocalStorage;

    fn saved(id: &str) -> AnalysisResult {
        AnalysisResult {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_field_focus_wraps() {
        let mut ui = UiState::new();
        ui.prev_field();
        assert_eq!(ui.focus, FIELD_COUNT - 1);
        ui.next_field();
        assert_eq!(ui.focus, 0);
    }

    #[test]
    fn test_selection_toggles() {
        let mut ui = UiState::new();
        ui.toggle("a");
        ui.toggle("b");
        ui.toggle("a");
        assert_eq!(ui.selected, vec!["b".to_string()]);
    }

    #[test]
    fn test_sync_drops_deleted_rows() {
        let mut ui = UiState::new();
        ui.toggle("a");
        ui.toggle("gone");
        ui.cursor = 4;
        ui.sync(&[saved("a"), saved("b")]);
        assert_eq!(ui.selected, vec!["a".to_string()]);
        assert_eq!(ui.cursor, 1);

        ui.sync(&[]);
        assert_eq!(ui.cursor, 0);
        assert!(ui.selected.is_empty());
    }

    #[test]
    fn test_row_navigation_stays_in_bounds() {
        let mut ui = UiState::new();
        ui.prev_row();
        assert_eq!(ui.cursor, 0);
        ui.next_row(2);
        ui.next_row(2);
        assert_eq!(ui.cursor, 1);
        ui.next_row(0);
        assert_eq!(ui.cursor, 1);
    }

    fn press(code: KeyCode, app: &mut App, ui: &mut UiState, backends: &Backends) {
        let (tx, _rx) = mpsc::channel::<Outcome>();
        handle_key(KeyEvent::new(code, KeyModifiers::NONE), app, ui, backends, &tx);
    }

    #[test]
    fn test_incomplete_result_only_offers_reset() {
        let storage = LocalStorage::open_in_memory().unwrap();
        let config = Config::from_lookup(|_| None);
        let backends = Backends::from_config(&config, storage.clone());
        let user = backends.auth.login_with_google().unwrap();
        storage
            .set_item(
                &crate::store::analyses_key(&user.uid),
                r#"[{"id":"sim_1","marketAnalysis":{"sentiment":"high"}}]"#,
            )
            .unwrap();

        let mut app = App::new();
        let mut ui = UiState::new();
        app.on_auth_changed(Some(user.clone()), &*backends.store);
        app.show_dashboard(&*backends.store);
        press(KeyCode::Enter, &mut app, &mut ui, &backends);
        assert_eq!(app.view, View::Results);
        assert!(matches!(app.results_view(), ResultsView::Incomplete));

        for code in [KeyCode::Char('s'), KeyCode::Char('d'), KeyCode::Char('l'), KeyCode::Esc] {
            press(code, &mut app, &mut ui, &backends);
            assert_eq!(app.view, View::Results);
        }
        assert_eq!(app.current_user.as_ref(), Some(&user));
        assert_eq!(backends.store.get_analyses_for_user(&user).unwrap().len(), 1);
        assert!(!ui.quit);

        press(KeyCode::Char('n'), &mut app, &mut ui, &backends);
        assert_eq!(app.view, View::Form);
        assert!(app.analysis_result.is_none());
    }

    #[test]
    fn test_incomplete_result_can_quit() {
        let backends = Backends::from_config(&Config::from_lookup(|_| None), LocalStorage::open_in_memory().unwrap());
        let mut app = App::new();
        let mut ui = UiState::new();
        app.analysis_result = Some(saved("sim_9"));
        app.view = View::Results;

        press(KeyCode::Char('q'), &mut app, &mut ui, &backends);
        assert!(ui.quit);
    }

    #[test]
    fn test_helpers() {
        assert_eq!(percent(130.0), 100);
        assert_eq!(percent(-4.0), 0);
        assert_eq!(truncate("Downtown Austin, TX", 10), "Downtow...");
        assert_eq!(truncate("Austin", 10), "Austin");
        assert_eq!(centered_rect(60, 9, Rect::new(0, 0, 100, 30)).height, 9);
    }
}
