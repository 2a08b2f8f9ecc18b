//! User-facing feedback sink
//!
//! The controller and orchestrator report outcomes here; how they are shown
//! (terminal, toast, confetti) is up to the implementation.

use std::io::Write;

use crate::controller::ControllerError;
use crate::submission::{ServerEcho, ValidationError};
use crate::UiState;

pub trait Feedback: Send + Sync {
    /// Called after every transition with the new UI state
    fn state_changed(&self, _state: &UiState) {}

    fn submitted(&self, echo: &ServerEcho);

    fn validation_failed(&self, error: &ValidationError);

    /// `message` carries the status and server detail verbatim
    fn transport_failed(&self, message: &str);

    fn auth_required(&self) {}

    fn capture_failed(&self, _error: &ControllerError) {}
}

/// Prints outcomes to the terminal.
#[derive(Debug, Default)]
pub struct ConsoleFeedback;

impl ConsoleFeedback {
    pub fn new() -> Self {
        Self
    }

    /// Short human line for a server echo: the `message` field when present.
    fn echo_summary(echo: &ServerEcho) -> String {
        echo.body
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .or_else(|| echo.body.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("status {}", echo.status))
    }

    fn line(text: &str) {
        let mut err = std::io::stderr();
        // Leave the waveform line before printing
        let _ = writeln!(err, "\r\x1b[2K{}", text);
    }
}

impl Feedback for ConsoleFeedback {
    fn state_changed(&self, state: &UiState) {
        match serde_json::to_string(state) {
            Ok(json) => log::debug!("UI state: {}", json),
            Err(e) => log::warn!("Failed to serialize UI state: {}", e),
        }
        match state {
            UiState::Recording {
                countdown: Some(countdown),
                ..
            } if countdown.active => {
                log::info!("{}s remaining", countdown.remaining_secs);
            }
            UiState::Stopped {
                has_artifact: true, ..
            } => {
                Self::line("Recording ready. [s] send  [r] re-record");
            }
            _ => {}
        }
    }

    fn submitted(&self, echo: &ServerEcho) {
        Self::line(&format!("*** Sent! {} ***", Self::echo_summary(echo)));
    }

    fn validation_failed(&self, error: &ValidationError) {
        Self::line(&format!("Not sent: {}", error));
    }

    fn transport_failed(&self, message: &str) {
        Self::line(&format!("Upload failed: {}", message));
    }

    fn auth_required(&self) {
        Self::line("Authentication required. Complete sign-in in the browser, then send again.");
    }

    fn capture_failed(&self, error: &ControllerError) {
        Self::line(&format!("Recording error: {}", error));
    }
}
