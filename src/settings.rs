use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::state_machine::CountdownPlan;
use crate::submission::SubmissionPolicy;
use crate::waveform::{BarLayout, DEFAULT_BAR_COUNT, DEFAULT_BIN_STRIDE};

const SETTINGS_DIR_NAME: &str = "fieldnote";
const SETTINGS_FILE_NAME: &str = "settings.json";

pub const ENV_API_URL: &str = "FIELDNOTE_API_URL";
pub const ENV_AUTH_URL: &str = "FIELDNOTE_AUTH_URL";
pub const ENV_ACCESS_TOKEN: &str = "FIELDNOTE_ACCESS_TOKEN";

#[derive(Debug)]
pub enum SettingsError {
    NoConfigDir,
    Io { path: PathBuf, source: std::io::Error },
    Serialize(serde_json::Error),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::NoConfigDir => write!(f, "Could not determine config directory"),
            SettingsError::Io { path, source } => write!(f, "{:?}: {}", path, source),
            SettingsError::Serialize(e) => write!(f, "Serialize settings: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {}

/// One capture screen: where it uploads, what it requires, and how recording behaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub name: String,

    /// Absolute URL, or a path starting with `/` resolved against `api_base_url`.
    pub endpoint: String,

    /// Fields that must be non-blank before an upload is attempted.
    pub required_field_names: Vec<String>,

    /// Fields that must be filled before recording may start at all.
    pub preselect_field_names: Vec<String>,

    pub countdown_enabled: bool,
    pub countdown_duration_secs: u32,

    /// Grace period between the device coming up and the first tick.
    pub countdown_delay_ms: u64,

    /// Upload as soon as the recording is finalized.
    pub auto_submit_on_stop: bool,

    pub artifact_field_name: String,
    pub attachment_field_name: String,

    /// File name for the recording; `{field}` is replaced by that field's value.
    pub suggested_name: String,

    pub required_attachments: usize,
    /// `None` is unlimited; `Some(1)` replaces the previous file on attach.
    pub max_attachments: Option<usize>,
    /// MIME prefixes (`image/`), exact MIME types, or extensions (`.pdf`).
    pub accepted_types: Vec<String>,
    pub require_recording: bool,
    pub clear_fields_on_success: bool,

    pub bar_count: usize,
    pub bin_stride: usize,
    pub frame_interval_ms: u64,

    /// EMA smoothing on the bars.
    pub smoothing: bool,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            name: "voice-note".to_string(),
            endpoint: "/api/voice-note".to_string(),
            required_field_names: Vec::new(),
            preselect_field_names: Vec::new(),
            countdown_enabled: false,
            countdown_duration_secs: 60,
            countdown_delay_ms: 3000,
            auto_submit_on_stop: false,
            artifact_field_name: "audio".to_string(),
            attachment_field_name: "file".to_string(),
            suggested_name: "recording.wav".to_string(),
            required_attachments: 0,
            max_attachments: None,
            accepted_types: vec!["image/".to_string()],
            require_recording: true,
            clear_fields_on_success: true,
            bar_count: DEFAULT_BAR_COUNT,
            bin_stride: DEFAULT_BIN_STRIDE,
            frame_interval_ms: 33,
            smoothing: true,
        }
    }
}

impl ScreenConfig {
    pub fn policy(&self) -> SubmissionPolicy {
        SubmissionPolicy {
            required_field_names: self.required_field_names.clone(),
            require_recording: self.require_recording,
            required_attachments: self.required_attachments,
            max_attachments: self.max_attachments,
            accepted_types: self.accepted_types.clone(),
            artifact_field: self.artifact_field_name.clone(),
            attachment_field: self.attachment_field_name.clone(),
            clear_fields_on_success: self.clear_fields_on_success,
        }
    }

    /// `None` when the screen has no countdown (or a zero-length one).
    pub fn countdown_plan(&self) -> Option<CountdownPlan> {
        (self.countdown_enabled && self.countdown_duration_secs > 0).then(|| CountdownPlan {
            delay_ms: self.countdown_delay_ms,
            duration_secs: self.countdown_duration_secs,
        })
    }

    pub fn bar_layout(&self) -> BarLayout {
        BarLayout {
            bar_count: self.bar_count,
            bin_stride: self.bin_stride,
        }
    }

    /// Expand `{field}` placeholders. Unknown or blank fields fall back to
    /// `recording`, so the name is never empty.
    pub fn suggested_name_for(&self, fields: &BTreeMap<String, String>) -> String {
        let mut out = String::with_capacity(self.suggested_name.len());
        let mut rest = self.suggested_name.as_str();

        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}') else {
                break;
            };
            out.push_str(&rest[..open]);
            let key = &rest[open + 1..open + close];
            match fields.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
                Some(value) => out.push_str(value),
                None => out.push_str("recording"),
            }
            rest = &rest[open + close + 1..];
        }
        out.push_str(rest);

        if out.trim().is_empty() {
            "recording".to_string()
        } else {
            out
        }
    }

    pub fn resolve_endpoint(&self, api_base_url: &str) -> String {
        if self.endpoint.starts_with('/') {
            format!("{}{}", api_base_url.trim_end_matches('/'), self.endpoint)
        } else {
            self.endpoint.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Opened in the browser when an upload answers 401.
    pub auth_url: String,

    /// Prefix for screen endpoints given as paths.
    pub api_base_url: String,

    pub screens: Vec<ScreenConfig>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            auth_url: "http://localhost:3000/api/auth".to_string(),
            api_base_url: "http://localhost:3000".to_string(),
            screens: default_screens(),
        }
    }
}

impl AppSettings {
    pub fn screen(&self, name: &str) -> Option<&ScreenConfig> {
        self.screens.iter().find(|s| s.name == name)
    }

    /// Apply `FIELDNOTE_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = env_value(ENV_API_URL) {
            log::info!("Settings: API base URL overridden from environment");
            self.api_base_url = url;
        }
        if let Some(url) = env_value(ENV_AUTH_URL) {
            log::info!("Settings: auth URL overridden from environment");
            self.auth_url = url;
        }
        self
    }
}

/// Bearer token for uploads, if one is configured.
pub fn access_token() -> Option<String> {
    env_value(ENV_ACCESS_TOKEN)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn documents() -> Vec<String> {
    [".pdf", ".doc", ".docx", ".txt"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

fn default_screens() -> Vec<ScreenConfig> {
    vec![
        ScreenConfig {
            name: "voice-note".to_string(),
            endpoint: "/api/voice-note".to_string(),
            required_field_names: vec!["operator".to_string()],
            preselect_field_names: vec!["operator".to_string()],
            suggested_name: "voice-note-{operator}.wav".to_string(),
            ..ScreenConfig::default()
        },
        ScreenConfig {
            name: "timed-weight".to_string(),
            endpoint: "/api/weight".to_string(),
            countdown_enabled: true,
            countdown_duration_secs: 60,
            countdown_delay_ms: 3000,
            auto_submit_on_stop: true,
            suggested_name: "weight.wav".to_string(),
            ..ScreenConfig::default()
        },
        ScreenConfig {
            name: "voice-upload".to_string(),
            endpoint: "/api/upload".to_string(),
            required_field_names: vec!["email".to_string(), "recordingName".to_string()],
            artifact_field_name: "file".to_string(),
            suggested_name: "{recordingName}.wav".to_string(),
            ..ScreenConfig::default()
        },
        ScreenConfig {
            name: "photo-upload".to_string(),
            endpoint: "/api/upload-image".to_string(),
            required_field_names: vec!["email".to_string(), "imageName".to_string()],
            required_attachments: 1,
            max_attachments: Some(1),
            require_recording: false,
            ..ScreenConfig::default()
        },
        ScreenConfig {
            name: "voice-photo".to_string(),
            endpoint: "/api/voice-photo".to_string(),
            required_field_names: vec!["email".to_string()],
            attachment_field_name: "photo".to_string(),
            max_attachments: Some(1),
            require_recording: false,
            ..ScreenConfig::default()
        },
        ScreenConfig {
            name: "document-upload".to_string(),
            endpoint: "/api/upload".to_string(),
            required_field_names: vec!["email".to_string()],
            attachment_field_name: "files".to_string(),
            required_attachments: 2,
            max_attachments: Some(2),
            accepted_types: documents(),
            require_recording: false,
            ..ScreenConfig::default()
        },
        ScreenConfig {
            name: "single-document".to_string(),
            endpoint: "/api/upload-single".to_string(),
            required_field_names: vec!["email".to_string()],
            required_attachments: 1,
            max_attachments: Some(1),
            accepted_types: documents(),
            require_recording: false,
            ..ScreenConfig::default()
        },
    ]
}

pub fn settings_path() -> Result<PathBuf, SettingsError> {
    let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
    Ok(dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

/// Never fails: a missing or broken file yields the defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let contents = serde_json::to_string_pretty(settings).map_err(SettingsError::Serialize)?;

    // Temp file in the same directory, then rename over the target
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents).map_err(|source| SettingsError::Io {
        path: tmp_path.clone(),
        source,
    })?;

    // rename() does not replace an existing file on Windows
    if cfg!(windows) && path.exists() {
        if let Err(source) = std::fs::remove_file(path) {
            if source.kind() != std::io::ErrorKind::NotFound {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }

    std::fs::rename(&tmp_path, path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Write the default settings to `path` so they can be edited.
///
/// Returns `false` without touching an existing file unless `overwrite`.
pub fn write_default_settings(path: &Path, overwrite: bool) -> Result<bool, SettingsError> {
    if path.exists() && !overwrite {
        log::info!("Settings: {:?} already exists", path);
        return Ok(false);
    }
    save_settings(path, &AppSettings::default())?;
    log::info!("Settings: wrote defaults to {:?}", path);
    Ok(true)
}
