pub mod capture;
pub mod controller;
pub mod countdown;
pub mod feedback;
pub mod settings;
pub mod state_machine;
pub mod submission;
pub mod waveform;

use serde::Serialize;
use std::path::PathBuf;

use state_machine::{CountdownState, State};

pub use controller::{Collaborators, ControllerError, RecordingController};

/// UI state handed to the feedback sink after every transition.
/// Uses tagged union format: { "status": "idle" } or { "status": "recording", "elapsedSecs": 5 }
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UiState {
    Idle,
    Arming,
    Recording {
        #[serde(rename = "elapsedSecs")]
        elapsed_secs: u64,
        countdown: Option<CountdownUi>,
    },
    Stopping,
    Stopped {
        #[serde(rename = "hasArtifact")]
        has_artifact: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        countdown: Option<CountdownUi>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownUi {
    pub remaining_secs: u32,
    pub active: bool,
    pub start_delay_ms: u64,
}

impl From<CountdownState> for CountdownUi {
    fn from(c: CountdownState) -> Self {
        Self {
            remaining_secs: c.remaining_secs,
            active: c.active,
            start_delay_ms: c.start_delay_ms,
        }
    }
}

/// Convert internal State to UiState
pub fn state_to_ui(state: &State, has_artifact: bool) -> UiState {
    match state {
        State::Idle => UiState::Idle,
        State::Arming { .. } => UiState::Arming,
        State::Recording {
            started_at,
            countdown,
            ..
        } => UiState::Recording {
            elapsed_secs: started_at.elapsed().as_secs(),
            countdown: countdown.map(CountdownUi::from),
        },
        State::Stopping { .. } => UiState::Stopping,
        State::Stopped { countdown, .. } => UiState::Stopped {
            has_artifact,
            countdown: countdown.map(CountdownUi::from),
        },
    }
}

/// User intents delivered to a running controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start when idle, stop when recording
    Toggle,
    Start,
    Stop,
    Submit,
    Rerecord,
    SetField { name: String, value: String },
    Attach(PathBuf),
    /// Zero-based index into the attachments
    RemoveAttachment(usize),
    Quit,
}

impl Command {
    /// Parse one line of interactive input.
    ///
    /// Empty line toggles, `s` sends, `r` re-records, `q` quits,
    /// `attach <path>` (or `photo <path>`) adds a file, `rm <n>` removes the
    /// n-th file counting from 1, and `key=value` sets a field.
    pub fn parse_line(line: &str) -> Option<Command> {
        let line = line.trim();
        match line {
            "" => return Some(Command::Toggle),
            "s" | "send" => return Some(Command::Submit),
            "r" | "rerecord" => return Some(Command::Rerecord),
            "q" | "quit" | "exit" => return Some(Command::Quit),
            "start" => return Some(Command::Start),
            "stop" => return Some(Command::Stop),
            _ => {}
        }

        if let Some(path) = line
            .strip_prefix("attach ")
            .or_else(|| line.strip_prefix("photo "))
        {
            let path = path.trim();
            return (!path.is_empty()).then(|| Command::Attach(PathBuf::from(path)));
        }

        if let Some(n) = line.strip_prefix("rm ") {
            return match n.trim().parse::<usize>() {
                Ok(n) if n > 0 => Some(Command::RemoveAttachment(n - 1)),
                _ => None,
            };
        }

        parse_field(line)
            .ok()
            .map(|(name, value)| Command::SetField { name, value })
    }
}

/// Split `key=value`. The key must be non-empty; the value may be empty.
pub fn parse_field(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing field name in '{}'", s));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
