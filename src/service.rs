//! Terminal front end.
//!
//! Reads lines from stdin. Plain lines are submitted to the conversation;
//! lines starting with `/` are commands. Logs go to stderr, replies and
//! command output to stdout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::connection::{ConnectionMonitor, ConnectionState};
use crate::conversation::{Conversation, Message, Role, SubmitError};
use crate::settings::{SettingChange, Settings, SettingsStore};
use crate::speech::SpeechController;
use crate::voice;

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

const HELP: &str = "\
Type a question and press Enter. Commands:
  /status               connection, model and speech state
  /models               installed Ollama models
  /model <name>         select a model
  /refresh              probe Ollama now
  /voices               English voices available for speech
  /settings             current settings
  /set <field> <value>  change a setting (e.g. /set voiceSpeed 1.2)
  /say <text>           speak text without asking the model
  /stop                 stop speaking
  /history              conversation so far
  /quit                 exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Models,
    Model(String),
    Refresh,
    Voices,
    Settings,
    Set { field: String, value: String },
    Say(String),
    Stop,
    History,
    Quit,
    Unknown(String),
}

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Ask(String),
    Command(Command),
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Ask(line.to_string());
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };

        let command = match (name.to_ascii_lowercase().as_str(), arg) {
            ("help" | "?", _) => Command::Help,
            ("status", _) => Command::Status,
            ("models", _) => Command::Models,
            ("model", name) if !name.is_empty() => Command::Model(name.to_string()),
            ("refresh", _) => Command::Refresh,
            ("voices", _) => Command::Voices,
            ("settings", _) => Command::Settings,
            ("set", arg) => match arg.split_once(char::is_whitespace) {
                Some((field, value)) => Command::Set {
                    field: field.to_string(),
                    value: value.trim().to_string(),
                },
                None => Command::Unknown(line.to_string()),
            },
            ("say", text) if !text.is_empty() => Command::Say(text.to_string()),
            ("stop", _) => Command::Stop,
            ("history", _) => Command::History,
            ("quit" | "exit" | "q", _) => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        };
        Self::Command(command)
    }
}

fn format_size(bytes: u64) -> String {
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.1} GB", b / GB)
    } else {
        format!("{:.0} MB", b / MB)
    }
}

fn format_settings(s: &Settings) -> String {
    format!(
        "selectedVoiceName  {}\n\
         voiceSpeed         {:.2}\n\
         voicePitch         {:.2}\n\
         voiceVolume        {:.2}\n\
         autoSpeak          {}\n\
         themeColor         {}\n\
         darkMode           {}\n\
         animationsEnabled  {}\n\
         soundEffects       {}",
        s.selected_voice_name,
        s.voice_speed,
        s.voice_pitch,
        s.voice_volume,
        s.auto_speak,
        s.theme_color,
        s.dark_mode,
        s.animations_enabled,
        s.sound_effects,
    )
}

fn format_message(m: &Message, settings: &Settings) -> String {
    let time = m.timestamp.format("%H:%M");
    match m.role {
        Role::User => format!("{DIM}[{time}]{RESET} You: {}", m.content),
        Role::Assistant => format!(
            "{DIM}[{time}]{RESET} {}Assistant:{RESET} {}",
            settings.theme_color.ansi(),
            m.content
        ),
    }
}

/// Spinner shown while waiting on the model. Cleared on drop, including
/// when the question is abandoned.
struct Spinner(ProgressBar);

impl Spinner {
    fn start() -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("Thinking...");
        pb.enable_steady_tick(Duration::from_millis(100));
        Self(pb)
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.0.finish_and_clear();
    }
}

fn connection_notice(was_connected: bool, state: &ConnectionState) -> Option<String> {
    match (was_connected, state.connected) {
        (false, true) => Some(format!(
            "{DIM}Ollama connected, {} model(s), using {}{RESET}",
            state.models.len(),
            state.selected_model
        )),
        (true, false) => Some(format!("{DIM}Ollama disconnected{RESET}")),
        _ => None,
    }
}

pub struct AssistantService {
    conversation: Arc<Conversation>,
    speech: Arc<SpeechController>,
    settings: Arc<SettingsStore>,
    connection: Arc<ConnectionMonitor>,
    /// Treat typed lines as spoken input, so replies are read aloud.
    voice_input: bool,
}

impl AssistantService {
    pub fn new(
        conversation: Arc<Conversation>,
        speech: Arc<SpeechController>,
        settings: Arc<SettingsStore>,
        connection: Arc<ConnectionMonitor>,
        voice_input: bool,
    ) -> Self {
        Self {
            conversation,
            speech,
            settings,
            connection,
            voice_input,
        }
    }

    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let interrupt = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        };
        self.run_until(BufReader::new(tokio::io::stdin()), interrupt)
            .await
    }

    /// Drive the session from `input` until it ends, `/quit` is typed, or
    /// `interrupt` resolves. A question still waiting on the model is
    /// abandoned on interrupt.
    async fn run_until<R, F>(&self, input: R, interrupt: F) -> Result<(), Box<dyn std::error::Error>>
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
    {
        let mut lines = input.lines();
        tokio::pin!(interrupt);

        println!("Ollama voice assistant. Type /help for commands.");
        info!("Service ready");
        let notices = self.spawn_connection_notices();

        let result: Result<(), Box<dyn std::error::Error>> = loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                () = &mut interrupt => {
                    info!("Interrupted");
                    break Ok(());
                }
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("stdin closed");
                    break Ok(());
                }
                Err(e) => break Err(e.into()),
            };

            tokio::select! {
                keep_going = self.handle_line(&line) => {
                    if !keep_going {
                        break Ok(());
                    }
                }
                () = &mut interrupt => {
                    info!("Interrupted");
                    break Ok(());
                }
            }
        };

        notices.abort();
        self.speech.stop();
        info!("Shutting down");
        result
    }

    /// Print a line whenever Ollama comes or goes.
    fn spawn_connection_notices(&self) -> JoinHandle<()> {
        let mut rx = self.connection.subscribe();
        tokio::spawn(async move {
            let mut was_connected = rx.borrow_and_update().connected;
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                if let Some(notice) = connection_notice(was_connected, &state) {
                    println!("{notice}");
                }
                was_connected = state.connected;
            }
        })
    }

    /// Returns `false` when the session should end.
    async fn handle_line(&self, line: &str) -> bool {
        match Input::parse(line) {
            Input::Empty => {}
            Input::Ask(text) => self.ask(&text).await,
            Input::Command(Command::Quit) => return false,
            Input::Command(command) => self.run_command(command).await,
        }
        true
    }

    async fn ask(&self, text: &str) {
        let settings = self.settings.snapshot();

        let spinner = settings.animations_enabled.then(Spinner::start);
        let result = self.conversation.submit(text, self.voice_input).await;
        drop(spinner);

        match result {
            Ok(reply) => {
                let settings = self.settings.snapshot();
                if settings.sound_effects {
                    print!("\x07");
                }
                println!("{}", format_message(&reply, &settings));
            }
            Err(SubmitError::EmptyInput) => {}
            Err(e @ SubmitError::Busy) => println!("{e}"),
        }
    }

    async fn run_command(&self, command: Command) {
        match command {
            Command::Help => println!("{HELP}"),
            Command::Status => self.print_status(),
            Command::Models => self.print_models(),
            Command::Model(name) => match self.connection.select_model(&name) {
                Ok(()) => println!("Using model {name}"),
                Err(e) => println!("{e}"),
            },
            Command::Refresh => {
                let connected = self.connection.refresh().await;
                println!(
                    "Ollama {}",
                    if connected { "connected" } else { "not reachable" }
                );
            }
            Command::Voices => {
                let current = self.settings.snapshot().selected_voice_name;
                let voices = voice::english_voices(&self.speech.voices());
                if voices.is_empty() {
                    println!("No English voices available");
                }
                for v in voices {
                    let mark = if v.name == current { "*" } else { " " };
                    println!("{mark} {} ({})", v.name, v.lang);
                }
            }
            Command::Settings => println!("{}", format_settings(&self.settings.snapshot())),
            Command::Set { field, value } => {
                match SettingChange::parse(&field, &value)
                    .and_then(|change| self.settings.update(change))
                {
                    Ok(_) => println!("Updated {field}"),
                    Err(e) => {
                        warn!("Setting update failed: {e}");
                        println!("{e}");
                    }
                }
            }
            Command::Say(text) => self.speech.speak(&text, None),
            Command::Stop => {
                if self.speech.is_speaking() {
                    self.speech.stop();
                } else {
                    println!("Not speaking");
                }
            }
            Command::History => {
                let settings = self.settings.snapshot();
                for m in self.conversation.messages() {
                    println!("{}", format_message(&m, &settings));
                }
            }
            Command::Unknown(line) => println!("Unknown command: {line} (try /help)"),
            Command::Quit => {}
        }
    }

    fn print_status(&self) {
        let conn = self.connection.snapshot();
        println!(
            "Ollama:  {} ({}){}",
            if conn.connected { "connected" } else { "disconnected" },
            self.connection.host(),
            if conn.checking { ", checking" } else { "" }
        );
        println!("Model:   {}", conn.selected_model);
        println!("Speech:  {}", self.speech.state());
        println!(
            "Replies: {}",
            if self.voice_input && self.settings.snapshot().auto_speak {
                "spoken"
            } else {
                "text only"
            }
        );
    }

    fn print_models(&self) {
        let conn = self.connection.snapshot();
        if conn.models.is_empty() {
            println!("No models (is Ollama running?)");
            return;
        }
        for m in &conn.models {
            let mark = if m.name == conn.selected_model { "*" } else { " " };
            println!("{mark} {:<32} {:>8}", m.name, format_size(m.size));
        }
    }
}
