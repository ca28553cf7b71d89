//! Interactive console for manual inspection of a running simulator.
//!
//! The console is just another client of the engine: it issues `open` and
//! `close`, listens on the event bus, and shows what it sees in a terminal
//! UI. With a loopback transport it can also play the remote end and send
//! lines to the simulator.

use crate::engine::Simulator;
use crate::events::{Event, EventKind, Payload};
use crate::state::ConnectionState;
use crate::transport::{LoopbackHandle, Transport};
use crossterm::event::{self, Event as TermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};
use ratatui::{Frame, Terminal};
use std::collections::VecDeque;
use std::io;
use std::str::FromStr;
use std::sync::mpsc::Receiver;
use std::time::Duration;
use tracing::{debug, info};

/// Lines of history kept on screen.
const LOG_CAPACITY: usize = 500;
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long to wait for the transport to confirm a close on exit.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

const HELP: &[&str] = &[
    "open            open the port",
    "close           close the port",
    "state           show the connection state",
    "profile         show the instrument profile",
    "rules           list commands answered with data",
    "send <line>     send a line to the simulator (loopback only)",
    "help            this text",
    "quit            close the port and exit",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Open,
    Close,
    State,
    Profile,
    Rules,
    Send(String),
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        let (word, rest) = match input.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (input, ""),
        };
        match word.to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "close" => Ok(Self::Close),
            "state" => Ok(Self::State),
            "profile" => Ok(Self::Profile),
            "rules" => Ok(Self::Rules),
            "send" if rest.is_empty() => Err("usage: send <line>".to_string()),
            "send" => Ok(Self::Send(rest.to_string())),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            "" => Err("type 'help' for commands".to_string()),
            other => Err(format!("unknown command '{other}', type 'help'")),
        }
    }
}

/// One entry in the console history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Event(Event),
    Note(String),
}

pub struct Console<T: Transport> {
    sim: Simulator<T>,
    remote: Option<LoopbackHandle>,
    events: Receiver<Event>,
    log: VecDeque<LogEntry>,
    input: String,
    quit: bool,
}

impl<T: Transport> Console<T> {
    /// Wraps `sim`. Pass the loopback handle to enable `send`.
    pub fn new(sim: Simulator<T>, remote: Option<LoopbackHandle>) -> Self {
        let (_, events) = sim.events().listen(&EventKind::ALL);
        Self {
            sim,
            remote,
            events,
            log: VecDeque::with_capacity(LOG_CAPACITY),
            input: String::new(),
            quit: false,
        }
    }

    pub fn simulator(&self) -> &Simulator<T> {
        &self.sim
    }

    pub fn log(&self) -> impl Iterator<Item = &LogEntry> {
        self.log.iter()
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// Applies queued transport notifications and collects new events.
    pub fn tick(&mut self) {
        self.sim.process_pending();
        if let Some(remote) = &self.remote {
            // Responses are already visible as tx events.
            remote.take_written_lines();
        }
        while let Ok(event) = self.events.try_recv() {
            self.push(LogEntry::Event(event));
        }
    }

    /// Runs one console command.
    pub fn execute(&mut self, command: ConsoleCommand) {
        debug!(?command, "console command");
        match command {
            ConsoleCommand::Open => {
                if let Err(e) = self.sim.open() {
                    self.note(e.to_string());
                }
            }
            ConsoleCommand::Close => {
                if let Err(e) = self.sim.close() {
                    self.note(e.to_string());
                }
            }
            ConsoleCommand::State => {
                let state = self.sim.state();
                self.note(format!("state: {state}"));
            }
            ConsoleCommand::Profile => {
                let p = self.sim.profile().clone();
                self.note(format!("make: {}  model: {}  type: {}", p.make, p.model, p.kind));
                self.note(format!(
                    "serial: {}  firmware: {}",
                    p.serial_number, p.firmware_rev
                ));
                let c = &p.configuration;
                self.note(format!(
                    "weigh mode: {}  stability: {}  auto zero: {}  standby: {}",
                    c.weigh_mode, c.environmental_stability, c.auto_zero_mode, c.standby_timeout
                ));
            }
            ConsoleCommand::Rules => {
                let rules: Vec<String> = self
                    .sim
                    .dispatcher()
                    .rules()
                    .iter()
                    .map(|rule| format!("{:<5} {}", rule.token, rule.description))
                    .collect();
                for rule in rules {
                    self.note(rule);
                }
                self.note("anything else: <command> A".to_string());
            }
            ConsoleCommand::Send(line) => {
                let sent = self
                    .remote
                    .as_ref()
                    .map(|remote| remote.is_open() && remote.send_line(&line));
                match sent {
                    Some(true) => {}
                    Some(false) => self.note("port is not open".to_string()),
                    None => self.note("send needs --loopback".to_string()),
                }
            }
            ConsoleCommand::Help => {
                for line in HELP {
                    self.note((*line).to_string());
                }
            }
            ConsoleCommand::Quit => self.quit = true,
        }
        self.tick();
    }

    /// Parses and runs one line typed by the user.
    pub fn submit(&mut self, input: &str) {
        match input.parse::<ConsoleCommand>() {
            Ok(command) => self.execute(command),
            Err(message) => self.note(message),
        }
    }

    /// Closes the port and waits briefly for the transport to confirm.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.sim.close() {
            debug!(error = %e, "close on exit");
        }
        if self.sim.state() == ConnectionState::Closing {
            self.sim.wait_and_process(SHUTDOWN_GRACE);
        }
        self.tick();
    }

    /// Takes over the terminal until the user quits.
    pub fn run(mut self) -> io::Result<()> {
        enable_raw_mode()?;
        let _restore = TerminalGuard;
        execute!(io::stdout(), EnterAlternateScreen)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;

        info!("console started");
        self.note("type 'help' for commands".to_string());
        while !self.quit {
            self.tick();
            terminal.draw(|frame| self.draw(frame))?;
            if event::poll(POLL_INTERVAL)? {
                if let TermEvent::Key(key) = event::read()? {
                    self.on_key(key);
                }
            }
        }
        self.shutdown();
        info!("console stopped");
        Ok(())
    }

    fn on_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => self.quit = true,
            KeyCode::Esc => self.quit = true,
            KeyCode::Enter => {
                let input = std::mem::take(&mut self.input);
                self.submit(&input);
            }
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Char(c) => self.input.push(c),
            _ => {}
        }
    }

    fn draw(&self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(3),
                Constraint::Length(3),
            ])
            .split(frame.size());

        let settings = self.sim.settings();
        let state = self.sim.state();
        let status = Line::from(vec![
            Span::raw(format!("{} @ {} baud  ", settings.address, settings.baud_rate)),
            Span::styled(
                state.as_str(),
                Style::default()
                    .fg(state_color(state))
                    .add_modifier(Modifier::BOLD),
            ),
        ]);
        let title = Block::default().borders(Borders::ALL).title("MT-SICS simulator");
        frame.render_widget(Paragraph::new(status).block(title), chunks[0]);

        let visible = usize::from(chunks[1].height.saturating_sub(2));
        let items: Vec<ListItem> = self
            .log
            .iter()
            .skip(self.log.len().saturating_sub(visible))
            .map(log_item)
            .collect();
        frame.render_widget(
            List::new(items).block(Block::default().borders(Borders::ALL).title("Events")),
            chunks[1],
        );

        frame.render_widget(
            Paragraph::new(format!("> {}", self.input))
                .block(Block::default().borders(Borders::ALL).title("Command")),
            chunks[2],
        );
        let cursor_x = chunks[2].x + 3 + u16::try_from(self.input.len()).unwrap_or(u16::MAX);
        frame.set_cursor(cursor_x.min(chunks[2].right().saturating_sub(2)), chunks[2].y + 1);
    }

    fn note(&mut self, text: String) {
        self.push(LogEntry::Note(text));
    }

    fn push(&mut self, entry: LogEntry) {
        if self.log.len() == LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(entry);
    }
}

fn state_color(state: ConnectionState) -> Color {
    match state {
        ConnectionState::Offline | ConnectionState::Online => Color::Green,
        ConnectionState::Closed => Color::Red,
        _ => Color::Yellow,
    }
}

fn log_item(entry: &LogEntry) -> ListItem<'static> {
    match entry {
        LogEntry::Note(text) => ListItem::new(text.clone()).style(Style::default().fg(Color::Gray)),
        LogEntry::Event(event) => {
            let color = match event.payload {
                Payload::State(_) => Color::Cyan,
                Payload::Rx(_) => Color::White,
                Payload::Tx(_) => Color::Green,
                Payload::Error(_) => Color::Red,
            };
            ListItem::new(event.to_string()).style(Style::default().fg(color))
        }
    }
}

struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}
