use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io::stdout;

use crate::db::{Database, StoredRanking};
use crate::models::VisaLikelihood;

struct AppState {
    rankings: Vec<StoredRanking>,
    selected: usize,
    scroll_offset: u16,
}

impl AppState {
    fn new(rankings: Vec<StoredRanking>) -> Self {
        Self {
            rankings,
            selected: 0,
            scroll_offset: 0,
        }
    }

    fn current(&self) -> Option<&StoredRanking> {
        self.rankings.get(self.selected)
    }

    fn select(&mut self, index: usize) {
        let last = self.rankings.len().saturating_sub(1);
        let index = index.min(last);
        if index != self.selected {
            self.selected = index;
            self.scroll_offset = 0;
        }
    }

    /// Returns false when the browser should close.
    fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Down | KeyCode::Char('j') => self.select(self.selected + 1),
            KeyCode::Up | KeyCode::Char('k') => self.select(self.selected.saturating_sub(1)),
            KeyCode::Home | KeyCode::Char('g') => self.select(0),
            KeyCode::End | KeyCode::Char('G') => self.select(usize::MAX),
            KeyCode::Char('J') | KeyCode::PageDown => {
                self.scroll_offset = self.scroll_offset.saturating_add(SCROLL_STEP)
            }
            KeyCode::Char('K') | KeyCode::PageUp => {
                self.scroll_offset = self.scroll_offset.saturating_sub(SCROLL_STEP)
            }
            _ => {}
        }
        true
    }
}

const SCROLL_STEP: u16 = 3;

pub fn run_browse(db: &Database, limit: usize) -> Result<()> {
    let rankings = db.list_ranked(limit)?;
    if rankings.is_empty() {
        println!("No ranked jobs yet. Run: visa-hunt run");
        return Ok(());
    }

    let mut state = AppState::new(rankings);

    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state);

    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut AppState,
) -> Result<()> {
    let mut list_state = ListState::default();
    list_state.select(Some(0));

    loop {
        terminal.draw(|frame| draw(frame, state, &mut list_state))?;

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind == KeyEventKind::Press && !state.handle_key(key.code) {
            return Ok(());
        }
        list_state.select(Some(state.selected));
    }
}

fn list_label(entry: &StoredRanking) -> String {
    let job = &entry.ranked.job;
    let score = job.resume_match_score.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
    let title = if job.title.chars().count() > 35 {
        format!("{}...", job.title.chars().take(32).collect::<String>())
    } else {
        job.title.clone()
    };
    format!("{:>3} {} | {}", score, title, job.company)
}

fn draw(frame: &mut Frame, state: &AppState, list_state: &mut ListState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(frame.area());

    let items: Vec<ListItem> = state
        .rankings
        .iter()
        .map(|r| ListItem::new(list_label(r)))
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Ranked jobs ({}) ", state.rankings.len())),
        )
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    let detail = Paragraph::new(build_detail(state))
        .block(Block::default().borders(Borders::ALL).title(" Detail "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));
    frame.render_widget(detail, chunks[1]);

    let help_area = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(frame.area());
    let help = Paragraph::new(" j/k:move  g/G:first/last  J/K:scroll detail  q:quit")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, help_area[1]);
}

fn build_detail(state: &AppState) -> Text<'_> {
    let Some(entry) = state.current() else {
        return Text::raw("No job selected");
    };
    let job = &entry.ranked.job;
    let bold = Style::default().add_modifier(Modifier::BOLD);

    let mut lines: Vec<Line> = Vec::new();
    lines.push(Line::from(Span::styled(job.title.as_str(), bold)));
    lines.push(Line::from(format!("at {}", job.company)));
    lines.push(Line::from(""));

    if let Some(score) = job.resume_match_score {
        let resume = job.matched_resume.as_deref().unwrap_or("?");
        lines.push(Line::from(format!("Resume match: {} ({})", score, resume)));
    }
    if let Some(qa) = job.qa_relevance {
        lines.push(Line::from(format!("QA relevance: {}/10", qa)));
    }
    if let Some(visa) = job.visa_likelihood {
        let style = match visa {
            VisaLikelihood::High => Style::default().fg(Color::Green),
            VisaLikelihood::Medium => Style::default().fg(Color::Yellow),
            VisaLikelihood::Low => Style::default().fg(Color::Red),
        };
        lines.push(Line::from(Span::styled(format!("Visa likelihood: {}", visa), style)));
    }
    if !entry.ranked.reason.is_empty() {
        lines.push(Line::from(format!("Why: {}", entry.ranked.reason)));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(format!("URL: {}", job.url)));
    lines.push(Line::from(format!("Found on: {}", job.source)));
    lines.push(Line::from(Span::styled(
        format!("Ranked: {}", entry.run_at),
        Style::default().fg(Color::DarkGray),
    )));
    lines.push(Line::from(""));

    lines.push(Line::from(Span::styled("Description", bold)));
    for line in textwrap::fill(&job.snippet, 70).lines() {
        lines.push(Line::from(line.to_string()));
    }

    Text::from(lines)
}
