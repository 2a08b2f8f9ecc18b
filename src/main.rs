//! fieldnote - record voice notes, attach photos or documents, and hand them to an upload endpoint
//!
//! Subcommands:
//! - `fieldnote record --screen <name>` - Interactive capture session on stdin
//! - `fieldnote screens` - List configured screens
//! - `fieldnote init` - Write the default settings file

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use fieldnote_lib::capture::MicrophoneDevice;
use fieldnote_lib::feedback::ConsoleFeedback;
use fieldnote_lib::settings::{self, AppSettings};
use fieldnote_lib::submission::{BrowserAuthBootstrap, HttpTransport};
use fieldnote_lib::waveform::TerminalBars;
use fieldnote_lib::{parse_field, Collaborators, Command, RecordingController};

#[derive(Parser)]
#[command(name = "fieldnote")]
#[command(about = "Voice-note, photo and document capture with timed recording and upload")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive capture session
    Record {
        /// Screen preset to use
        #[arg(short, long, default_value = "voice-note")]
        screen: String,

        /// Form field as key=value (repeatable)
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,

        /// File to attach (repeatable)
        #[arg(long = "attach", visible_alias = "photo")]
        attachments: Vec<PathBuf>,
    },

    /// List the configured screens
    Screens,

    /// Write the default settings file
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load .env file if present (for development convenience)
    // Silently ignore if not found - production uses system env vars
    let _ = dotenvy::dotenv();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => init(cli.settings, force),
        Commands::Screens => {
            list_screens(&load(cli.settings).with_env_overrides());
            ExitCode::SUCCESS
        }
        Commands::Record {
            screen,
            fields,
            attachments,
        } => {
            let settings = load(cli.settings).with_env_overrides();
            match record(&settings, &screen, fields, attachments).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    log::error!("{}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn load(path: Option<PathBuf>) -> AppSettings {
    let path = match path {
        Some(path) => path,
        None => match settings::settings_path() {
            Ok(path) => path,
            Err(e) => {
                log::warn!("Settings: {}", e);
                return AppSettings::default();
            }
        },
    };
    log::debug!("Loading settings from {:?}", path);
    settings::load_settings(&path)
}

fn init(path: Option<PathBuf>, force: bool) -> ExitCode {
    let path = match path.map_or_else(settings::settings_path, Ok) {
        Ok(path) => path,
        Err(e) => {
            log::error!("Settings: {}", e);
            return ExitCode::FAILURE;
        }
    };
    match settings::write_default_settings(&path, force) {
        Ok(true) => {
            println!("Wrote {}", path.display());
            ExitCode::SUCCESS
        }
        Ok(false) => {
            println!("{} already exists (use --force to replace it)", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Settings: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn list_screens(settings: &AppSettings) {
    for screen in &settings.screens {
        let countdown = match screen.countdown_plan() {
            Some(plan) => format!(
                "{}s countdown after {}ms",
                plan.duration_secs, plan.delay_ms
            ),
            None => "manual stop".to_string(),
        };
        let files = match (screen.required_attachments, screen.max_attachments) {
            (0, None) => String::new(),
            (min, Some(max)) if min == max => format!("  files: {}", max),
            (min, Some(max)) => format!("  files: {}-{}", min, max),
            (min, None) => format!("  files: {}+", min),
        };
        println!(
            "{:<16} {}  [{}{}]  required: {}{}",
            screen.name,
            screen.resolve_endpoint(&settings.api_base_url),
            countdown,
            if screen.auto_submit_on_stop {
                ", auto-send"
            } else {
                ""
            },
            if screen.required_field_names.is_empty() {
                "-".to_string()
            } else {
                screen.required_field_names.join(", ")
            },
            files
        );
    }
}

async fn record(
    settings: &AppSettings,
    screen_name: &str,
    fields: Vec<(String, String)>,
    attachments: Vec<PathBuf>,
) -> Result<(), String> {
    let screen = settings.screen(screen_name).cloned().ok_or_else(|| {
        let names: Vec<&str> = settings.screens.iter().map(|s| s.name.as_str()).collect();
        format!(
            "Unknown screen '{}' (available: {})",
            screen_name,
            names.join(", ")
        )
    })?;

    let endpoint = screen.resolve_endpoint(&settings.api_base_url);
    let transport = HttpTransport::new(endpoint)
        .map_err(|e| format!("Failed to create HTTP client: {}", e))?
        .with_access_token(settings::access_token());

    match MicrophoneDevice::default_input_name() {
        Ok(name) => log::info!("Input device: {}", name),
        Err(e) => log::warn!("{}", e),
    }

    let collaborators = Collaborators {
        transport: Arc::new(transport),
        auth: Arc::new(BrowserAuthBootstrap::new(settings.auth_url.clone())),
        feedback: Arc::new(ConsoleFeedback::new()),
        waveform: Arc::new(TerminalBars::new()),
    };

    let mut controller =
        RecordingController::new(screen, Box::new(MicrophoneDevice::new()), collaborators);

    for (name, value) in fields {
        controller.set_field(name, value);
    }
    for path in attachments {
        controller
            .attach(&path)
            .await
            .map_err(|e| e.to_string())?;
    }

    eprintln!(
        "[Enter] start/stop  [s] send  [r] re-record  [key=value] set field  [attach <path>]  [rm <n>]  [q] quit"
    );

    let (tx, rx) = mpsc::channel::<Command>(16);
    std::thread::spawn(move || read_commands(tx));

    controller.run(rx).await;
    Ok(())
}

/// Blocking stdin reader; ends the session on EOF.
fn read_commands(tx: mpsc::Sender<Command>) {
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => match Command::parse_line(&line) {
                Some(command) => {
                    let quit = command == Command::Quit;
                    if tx.blocking_send(command).is_err() || quit {
                        return;
                    }
                }
                None => eprintln!("Unrecognized input: {}", line.trim()),
            },
            Err(e) => {
                log::error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }
    let _ = tx.blocking_send(Command::Quit);
}
