#![cfg(feature = "tui")]

use crate::app::Runtime;
use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use flux::provider::Role;
use flux::session::{Entry, Finalization, Session, TurnError, Update};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Window for the second Ctrl+C that confirms quitting.
const EXIT_CONFIRM: Duration = Duration::from_secs(2);

const HELP: &str =
    "Type a message and press Enter. Ctrl+C cancels a reply; press it twice to quit. Commands: /quit, /clear, /model [name], /help";

#[derive(Debug, PartialEq, Eq)]
enum Action {
    None,
    Quit,
}

struct App {
    session: Session,
    input: String,
    /// When the last unconfirmed quit request was made.
    exit_armed: Option<Instant>,
}

impl App {
    fn new(session: Session) -> Self {
        let mut session = session;
        session.notice(HELP);
        Self {
            session,
            input: String::new(),
            exit_armed: None,
        }
    }

    fn exit_prompt_visible(&self, now: Instant) -> bool {
        self.exit_armed.is_some_and(|at| now.duration_since(at) < EXIT_CONFIRM)
    }

    /// Synchronous: never waits on the network.
    fn handle_key(&mut self, key: KeyEvent, now: Instant) -> Action {
        if key.kind == KeyEventKind::Release {
            return Action::None;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            if self.session.is_streaming() {
                self.session.cancel();
                return Action::None;
            }
            if self.exit_prompt_visible(now) {
                return Action::Quit;
            }
            self.exit_armed = Some(now);
            return Action::None;
        }
        self.exit_armed = None;

        match key.code {
            KeyCode::Esc => return Action::Quit,
            KeyCode::Char(c) => self.input.push(c),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Enter => return self.submit(),
            _ => {}
        }
        Action::None
    }

    fn submit(&mut self) -> Action {
        let msg = self.input.trim().to_string();
        self.input.clear();
        if msg.is_empty() {
            return Action::None;
        }

        if let Some(command) = msg.strip_prefix('/') {
            return self.run_command(command);
        }

        match self.session.begin(msg) {
            Ok(()) => {}
            Err(TurnError::Busy) => self
                .session
                .notice("(streaming in progress; wait for completion or press Ctrl+C)"),
            // Already recorded in the transcript.
            Err(TurnError::Provider(_)) => {}
        }
        Action::None
    }

    fn run_command(&mut self, command: &str) -> Action {
        let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
        let arg = arg.trim();

        match name {
            "quit" | "exit" => return Action::Quit,
            "clear" => self.session.clear(),
            "model" if arg.is_empty() => {
                let note = format!("current model: {}", self.session.model());
                self.session.notice(note);
            }
            "model" => {
                self.session.set_model(arg);
                let note = format!("model set to: {}", self.session.model());
                self.session.notice(note);
            }
            "help" => self.session.notice(HELP),
            _ => self.session.notice(format!("unknown command: /{name} (try /help)")),
        }
        Action::None
    }

    fn on_update(&mut self, update: Update) {
        if let Update::Finished(Finalization::Failed(e)) = update {
            if e.is_retryable() {
                self.session.notice("(transient failure; resend to try again)");
            }
        }
    }
}

pub async fn run_tui(rt: Runtime) -> anyhow::Result<()> {
    let mut app = App::new(Session::new(rt.provider, rt.settings));

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(ev) = crossterm::event::read() {
            if ev_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = draw(&mut terminal, &app) {
                    break Err(e);
                }
            }
            Some(ev) = ev_rx.recv() => {
                if let Event::Key(key) = ev {
                    if app.handle_key(key, Instant::now()) == Action::Quit {
                        break Ok(());
                    }
                }
            }
            ev = app.session.next_event() => {
                let update = app.session.apply(ev);
                app.on_update(update);
            }
        }
    };

    // Readers must be gone before the terminal is handed back.
    app.session.shutdown().await;

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

fn draw(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &App) -> anyhow::Result<()> {
    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)])
            .split(f.area());

        let chat = Paragraph::new(transcript(&app.session))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("flux: {} / {}", app.session.provider().name(), app.session.model())),
            )
            .wrap(Wrap { trim: false });

        let title = if app.exit_prompt_visible(Instant::now()) {
            "Press Ctrl+C again to exit"
        } else if app.session.is_streaming() {
            "input (streaming...)"
        } else {
            "input"
        };
        let input_w = Paragraph::new(app.input.clone())
            .block(Block::default().borders(Borders::ALL).title(title));

        f.render_widget(chat, chunks[0]);
        f.render_widget(input_w, chunks[1]);

        let x = chunks[1].x + 1 + app.input.chars().count() as u16;
        let y = chunks[1].y + 1;
        f.set_cursor_position((x.min(chunks[1].x + chunks[1].width.saturating_sub(2)), y));
    })?;
    Ok(())
}

fn transcript(session: &Session) -> Text<'static> {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let mut text = Text::default();

    let mut push = |label: &str, style: Style, body: &str| {
        text.lines.push(Line::styled(format!("{label}: "), style));
        text.lines.extend(Text::from(body.to_string()).lines);
        text.lines.push(Line::from(""));
    };

    for entry in session.entries() {
        match entry {
            Entry::Message(m) => match m.role {
                Role::User => push("user", bold, &m.content),
                Role::Assistant => push("assistant", Style::default(), &m.content),
                Role::System => push("system", Style::default(), &m.content),
            },
            Entry::Error(e) => push("error", bold, e),
            Entry::Notice(n) => push("system", Style::default().add_modifier(Modifier::DIM), n),
        }
    }
    if let Some(partial) = session.pending() {
        push("assistant (streaming...)", Style::default(), partial);
    }
    text
}
