//! Instances (registered CallBoxes and their load)
//! Queue (counters per transaction state)
//! History (latest finalized transactions)

use std::{
  env, io,
  sync::mpsc,
  thread,
  time::{Duration, Instant},
};

use anyhow::{Context, Result};
use callbox::client::CallboxClient;
use callbox::models::{DispatchStats, Transaction, TransactionStatus};
use crossterm::{
  event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent, KeyCode},
  execute,
  terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use tokio::runtime::Runtime;
use tui::{
  Terminal,
  backend::{Backend, CrosstermBackend},
  layout::{Constraint, Direction, Layout, Rect},
  style::{Color, Modifier, Style},
  text::{Span, Spans},
  widgets::{Block, Borders, List, ListItem, Paragraph, Tabs},
};

const HISTORY_ROWS: usize = 20;

#[derive(Clone, Copy)]
enum DashboardTab {
  Instances,
  Queue,
  History,
}

#[derive(Default)]
struct Snapshot {
  stats: DispatchStats,
  history: Vec<Transaction>,
  error: Option<String>,
}

struct App {
  current_tab: DashboardTab,
  snapshot: Snapshot,
}

impl App {
  fn new() -> Self {
    Self {
      current_tab: DashboardTab::Instances,
      snapshot: Snapshot::default(),
    }
  }

  fn next_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Instances => DashboardTab::Queue,
      DashboardTab::Queue => DashboardTab::History,
      DashboardTab::History => DashboardTab::Instances,
    }
  }

  fn previous_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Instances => DashboardTab::History,
      DashboardTab::Queue => DashboardTab::Instances,
      DashboardTab::History => DashboardTab::Queue,
    }
  }
}

async fn fetch_snapshot(client: &CallboxClient) -> Snapshot {
  let (stats, history) = tokio::join!(client.stats(), client.history(HISTORY_ROWS));
  match (stats, history) {
    (Ok(stats), Ok(history)) => Snapshot { stats, history, error: None },
    (Err(e), _) | (_, Err(e)) => Snapshot {
      error: Some(format!("{e:#}")),
      ..Default::default()
    },
  }
}

fn main() -> Result<()> {
  let api_url = env::var("CALLBOX_API_URL").unwrap_or_else(|_| "http://localhost:8080".into());
  let token = env::var("CALLBOX_TOKEN").context("CALLBOX_TOKEN must be set")?;
  let client = CallboxClient::new(api_url, token);

  let (tx, rx) = mpsc::channel::<Snapshot>();
  let rt_bg = Runtime::new()?;
  thread::spawn(move || {
    loop {
      let snapshot = rt_bg.block_on(fetch_snapshot(&client));
      if tx.send(snapshot).is_err() {
        break;
      }
      thread::sleep(Duration::from_secs(2));
    }
  });

  enable_raw_mode()?;
  let mut stdout = io::stdout();
  execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
  let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

  let outcome = run(&mut terminal, &rx);

  disable_raw_mode()?;
  execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
  terminal.show_cursor()?;
  outcome
}

fn run<B: Backend>(terminal: &mut Terminal<B>, rx: &mpsc::Receiver<Snapshot>) -> Result<()> {
  let mut app = App::new();
  let tick_rate = Duration::from_millis(500);
  let mut last_tick = Instant::now();

  loop {
    if let Ok(snapshot) = rx.try_recv() {
      app.snapshot = snapshot;
    }
    terminal.draw(|f| ui(f, &app))?;

    let timeout = tick_rate.saturating_sub(last_tick.elapsed());
    if event::poll(timeout)? {
      if let CEvent::Key(key) = event::read()? {
        match key.code {
          KeyCode::Char('q') => return Ok(()),
          KeyCode::Right => app.next_tab(),
          KeyCode::Left => app.previous_tab(),
          _ => {}
        }
      }
    }
    if last_tick.elapsed() >= tick_rate {
      last_tick = Instant::now();
    }
  }
}

fn ui<B: Backend>(f: &mut tui::Frame<B>, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .margin(1)
    .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)].as_ref())
    .split(f.size());

  let tabs = Tabs::new(
    ["Instances", "Queue", "History"]
      .iter()
      .map(|t| Spans::from(Span::styled(*t, Style::default().fg(Color::Yellow))))
      .collect(),
  )
  .block(Block::default().borders(Borders::ALL).title("CallBox Dispatch"))
  .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
  .select(match app.current_tab {
    DashboardTab::Instances => 0,
    DashboardTab::Queue => 1,
    DashboardTab::History => 2,
  });
  f.render_widget(tabs, chunks[0]);

  match app.current_tab {
    DashboardTab::Instances => render_instances(f, app, chunks[1]),
    DashboardTab::Queue => render_queue(f, app, chunks[1]),
    DashboardTab::History => render_history(f, app, chunks[1]),
  }

  let footer_text = match &app.snapshot.error {
    Some(e) => format!("API unreachable: {e}"),
    None => "←/→: Switch Tabs | q: Quit".into(),
  };
  let footer = Paragraph::new(footer_text)
    .style(Style::default().fg(Color::White))
    .block(Block::default().borders(Borders::ALL));
  f.render_widget(footer, chunks[2]);
}

fn render_instances<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let items: Vec<ListItem> = app
    .snapshot
    .stats
    .instances
    .iter()
    .map(|w| {
      ListItem::new(vec![
        Spans::from(Span::styled(format!("ID: {}", w.id), Style::default().add_modifier(Modifier::BOLD))),
        Spans::from(Span::raw(format!(
          "Status: {} | In flight: {} | Processed: {}",
          w.status, w.queue_size, w.processed_count
        ))),
        Spans::from(Span::raw(format!("Last heartbeat: {}", w.last_heartbeat_at.format("%Y-%m-%d %H:%M:%S")))),
      ])
    })
    .collect();
  let title = format!("Registered CallBoxes ({})", app.snapshot.stats.connected_instances);
  let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
  f.render_widget(list, area);
}

fn render_queue<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let stats = &app.snapshot.stats;
  let counters = [
    ("pending", stats.pending_transactions),
    ("assigned", stats.assigned_transactions),
    ("processing", stats.processing_transactions),
    ("completed", stats.completed_transactions),
    ("failed", stats.failed_transactions),
  ];
  let items: Vec<ListItem> = counters
    .iter()
    .map(|(label, count)| {
      ListItem::new(Spans::from(vec![
        Span::styled(format!("{label:<12}"), Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        Span::raw(count.to_string()),
      ]))
    })
    .collect();
  let title = format!("Queue (active: {})", stats.queue_length);
  let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
  f.render_widget(list, area);
}

fn render_history<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let items: Vec<ListItem> = app
    .snapshot
    .history
    .iter()
    .map(|t| {
      let color = if t.status == TransactionStatus::Completed { Color::Green } else { Color::Red };
      ListItem::new(Spans::from(vec![
        Span::styled(t.updated_at.format("%H:%M:%S").to_string(), Style::default().fg(Color::Green)),
        Span::raw(" - "),
        Span::styled(format!("{:<10}", t.status), Style::default().fg(color)),
        Span::raw(format!(
          "{} {} {} by {} (retries: {})",
          t.id,
          t.kind,
          t.phone_number,
          t.processed_by.as_deref().unwrap_or("-"),
          t.retry_count
        )),
      ]))
    })
    .collect();
  let list = List::new(items).block(Block::default().borders(Borders::ALL).title(format!("Last {HISTORY_ROWS} Transactions")));
  f.render_widget(list, area);
}
