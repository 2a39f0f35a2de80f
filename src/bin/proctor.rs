//! Proctor CLI - Command-line interface for Proctor Flux
//!
//! Commands:
//! - simulate: Replay a scripted session through the full controller
//! - analyze-frame: Run the presence heuristic on a raw frame
//! - drafts: List or purge stored draft snapshots
//! - doctor: Check configuration and storage health
//! - config: Print the effective configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{Duration, Utc};
use proctor_flux::capture::{Frame, PixelFormat};
use proctor_flux::config::ProctorConfig;
use proctor_flux::draft::{list_drafts, purge_stale, DraftPersistence, FileDraftStore};
use proctor_flux::presence::FrameStats;
use proctor_flux::questions::{QuestionBank, WeightedQuestionBank};
use proctor_flux::simulation::{run_scenario_with_bank, Scenario};
use proctor_flux::submission::NdjsonDataStore;
use proctor_flux::SubmitError;
use proctor_flux::{PROCTOR_VERSION, PRODUCER_NAME};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Proctor - Integrity monitor for timed candidate assessments
#[derive(Parser)]
#[command(name = "proctor")]
#[command(author = "Synheart AI Inc")]
#[command(version = PROCTOR_VERSION)]
#[command(about = "Simulate and inspect proctored assessment sessions", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    /// Configuration file (TOML); PROCTOR_* variables override it
    #[arg(long, global = true, env = "PROCTOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON scenario and print session events as NDJSON
    Simulate {
        /// Scenario file path (use - for stdin)
        #[arg(short, long)]
        scenario: PathBuf,

        /// Question bank JSON (defaults to the built-in bank)
        #[arg(long)]
        questions: Option<PathBuf>,

        /// Print only the final report
        #[arg(long)]
        summary_only: bool,
    },

    /// Run the presence heuristic on a raw RGB/RGBA frame
    AnalyzeFrame {
        /// Raw pixel file (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long)]
        width: u32,

        #[arg(long)]
        height: u32,

        /// Pixel layout
        #[arg(long, default_value = "rgba")]
        format: FrameFormat,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect stored draft snapshots
    Drafts {
        #[command(subcommand)]
        action: DraftAction,
    },

    /// Check configuration and storage health
    Doctor {
        /// Draft directory to check
        #[arg(long)]
        drafts_dir: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand)]
enum DraftAction {
    /// List drafts with age and restorability
    List {
        #[arg(long)]
        dir: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete drafts that are expired or unreadable
    Purge {
        #[arg(long)]
        dir: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FrameFormat {
    /// 3 bytes per pixel
    Rgb,
    /// 4 bytes per pixel, alpha ignored
    Rgba,
}

impl From<FrameFormat> for PixelFormat {
    fn from(format: FrameFormat) -> Self {
        match format {
            FrameFormat::Rgb => PixelFormat::Rgb,
            FrameFormat::Rgba => PixelFormat::Rgba,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("PROCTOR_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }
}

fn run(cli: Cli) -> Result<(), ProctorCliError> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Simulate {
            scenario,
            questions,
            summary_only,
        } => cmd_simulate(config, &scenario, questions.as_deref(), summary_only),
        Commands::AnalyzeFrame {
            input,
            width,
            height,
            format,
            json,
        } => cmd_analyze_frame(&config, &input, width, height, format, json),
        Commands::Drafts { action } => match action {
            DraftAction::List { dir, json } => cmd_drafts_list(&config, &dir, json),
            DraftAction::Purge { dir } => cmd_drafts_purge(&config, &dir),
        },
        Commands::Doctor { drafts_dir, json } => {
            cmd_doctor(&config, cli.config.as_deref(), drafts_dir.as_deref(), json)
        }
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ProctorConfig, ProctorCliError> {
    let mut config = match path {
        Some(path) => ProctorConfig::load(path)?,
        None => ProctorConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn read_input(path: &Path) -> Result<Vec<u8>, ProctorCliError> {
    if path.as_os_str() == "-" {
        let mut buffer = Vec::new();
        io::stdin().read_to_end(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read(path)?)
    }
}

fn cmd_simulate(
    config: ProctorConfig,
    scenario_path: &Path,
    questions: Option<&Path>,
    summary_only: bool,
) -> Result<(), ProctorCliError> {
    let raw = read_input(scenario_path)?;
    let scenario: Scenario = serde_json::from_slice(&raw)?;
    let bank = match questions {
        Some(path) => WeightedQuestionBank::load(path)?,
        None => WeightedQuestionBank::builtin(),
    };

    let report = run_scenario_with_bank(&scenario, config, bank)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if !summary_only {
        for event in &report.events {
            writeln!(out, "{}", serde_json::to_string(event)?)?;
        }
    }
    let finished = serde_json::json!({
        "event": "finished",
        "phase": report.final_state.phase,
        "is_locked": report.final_state.is_locked,
        "time_remaining_secs": report.final_state.time_remaining_secs,
        "elapsed_secs": report.elapsed_secs,
        "candidate_message": report.candidate_message,
        "rejections": report.rejections,
        "draft_remaining": report.draft_remaining,
        "summary": report.summary,
        "submitted": report.submitted,
        "best_effort": report.best_effort,
    });
    writeln!(out, "{}", serde_json::to_string(&finished)?)?;
    out.flush()?;
    Ok(())
}

fn cmd_analyze_frame(
    config: &ProctorConfig,
    input: &Path,
    width: u32,
    height: u32,
    format: FrameFormat,
    json: bool,
) -> Result<(), ProctorCliError> {
    let data = read_input(input)?;
    let frame = Frame::new(width, height, format.into(), data)
        .map_err(|e| ProctorCliError::Frame(e.to_string()))?;
    let stats = FrameStats::analyze(&frame, &config.presence);
    let present = stats.is_present(&config.presence);

    if json {
        let report = serde_json::json!({
            "present": present,
            "bright_ratio": stats.bright_ratio,
            "dark_ratio": stats.dark_ratio,
            "skin_tone_ratio": stats.skin_tone_ratio,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Frame {}x{}", frame.width(), frame.height());
        println!("  bright:    {:.3} (min {})", stats.bright_ratio, config.presence.bright_min_ratio);
        println!("  dark:      {:.3} (max {})", stats.dark_ratio, config.presence.dark_max_ratio);
        println!(
            "  skin tone: {:.3} (min {})",
            stats.skin_tone_ratio, config.presence.skin_tone_min_ratio
        );
        println!("  present:   {present}");
    }
    Ok(())
}

fn cmd_drafts_list(config: &ProctorConfig, dir: &Path, json: bool) -> Result<(), ProctorCliError> {
    let store = FileDraftStore::open(dir)?;
    let ttl = Duration::seconds(config.draft.ttl_secs);
    let listings = list_drafts(&store, Utc::now(), ttl)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }
    if listings.is_empty() {
        println!("No drafts in {}", dir.display());
        return Ok(());
    }
    for listing in &listings {
        let age = listing
            .age_seconds
            .map(|s| format!("{s}s old"))
            .unwrap_or_else(|| "unreadable".to_string());
        let status = if listing.restorable { "restorable" } else { "stale" };
        println!(
            "{:<32} {:<12} {:>3} answered  {}",
            listing.key, status, listing.answered, age
        );
    }
    Ok(())
}

fn cmd_drafts_purge(config: &ProctorConfig, dir: &Path) -> Result<(), ProctorCliError> {
    let mut store = FileDraftStore::open(dir)?;
    let ttl = Duration::seconds(config.draft.ttl_secs);
    let removed = purge_stale(&mut store, Utc::now(), ttl)?;
    println!("Removed {} draft(s)", removed.len());
    for key in removed {
        println!("  {key}");
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

fn cmd_doctor(
    config: &ProctorConfig,
    config_path: Option<&Path>,
    drafts_dir: Option<&Path>,
    json: bool,
) -> Result<(), ProctorCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(match config.validate() {
        Ok(()) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: match config_path {
                Some(path) => format!("Loaded {}", path.display()),
                None => "Using built-in defaults".to_string(),
            },
        },
        Err(e) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    });

    checks.push(match NdjsonDataStore::from_provider(config) {
        Ok(store) => DoctorCheck {
            name: "submission_endpoint".to_string(),
            status: CheckStatus::Ok,
            message: format!("Appending to {}", store.path().display()),
        },
        Err(SubmitError::NotConfigured) => DoctorCheck {
            name: "submission_endpoint".to_string(),
            status: CheckStatus::Warning,
            message: "Not configured; submissions cannot be delivered".to_string(),
        },
        Err(e) => DoctorCheck {
            name: "submission_endpoint".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    });

    let bank = WeightedQuestionBank::builtin();
    checks.push(DoctorCheck {
        name: "question_bank".to_string(),
        status: if bank.total() > 0 {
            CheckStatus::Ok
        } else {
            CheckStatus::Error
        },
        message: format!("Built-in bank has {} question(s)", bank.total()),
    });

    if let Some(dir) = drafts_dir {
        checks.push(match FileDraftStore::open(dir) {
            Ok(store) => {
                let key = DraftPersistence::key_for(&config.assessment_kind);
                let ttl = Duration::seconds(config.draft.ttl_secs);
                match list_drafts(&store, Utc::now(), ttl) {
                    Ok(listings) => {
                        let stale = listings.iter().filter(|l| !l.restorable).count();
                        DoctorCheck {
                            name: "drafts".to_string(),
                            status: if stale > 0 {
                                CheckStatus::Warning
                            } else {
                                CheckStatus::Ok
                            },
                            message: format!(
                                "{} draft(s), {} stale; this assessment uses key {}",
                                listings.len(),
                                stale,
                                key
                            ),
                        }
                    }
                    Err(e) => DoctorCheck {
                        name: "drafts".to_string(),
                        status: CheckStatus::Error,
                        message: format!("Cannot read drafts: {e}"),
                    },
                }
            }
            Err(e) => DoctorCheck {
                name: "drafts".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot open draft directory: {e}"),
            },
        });
    }

    checks.push(if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass scenario files by path)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (simulate -s - ready)".to_string(),
        }
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: PROCTOR_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Proctor Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(ProctorCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
enum ProctorCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Config(proctor_flux::ConfigError),
    Storage(proctor_flux::StorageError),
    Session(proctor_flux::ProctorError),
    Frame(String),
    DoctorFailed,
}

impl From<io::Error> for ProctorCliError {
    fn from(e: io::Error) -> Self {
        ProctorCliError::Io(e)
    }
}

impl From<serde_json::Error> for ProctorCliError {
    fn from(e: serde_json::Error) -> Self {
        ProctorCliError::Json(e)
    }
}

impl From<proctor_flux::ConfigError> for ProctorCliError {
    fn from(e: proctor_flux::ConfigError) -> Self {
        ProctorCliError::Config(e)
    }
}

impl From<proctor_flux::StorageError> for ProctorCliError {
    fn from(e: proctor_flux::StorageError) -> Self {
        ProctorCliError::Storage(e)
    }
}

impl From<proctor_flux::ProctorError> for ProctorCliError {
    fn from(e: proctor_flux::ProctorError) -> Self {
        ProctorCliError::Session(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<ProctorCliError> for CliError {
    fn from(e: ProctorCliError) -> Self {
        match e {
            ProctorCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            ProctorCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            ProctorCliError::Config(e) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run `proctor config` to see the effective values".to_string()),
            },
            ProctorCliError::Storage(e) => CliError {
                code: "STORAGE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the draft directory exists and is writable".to_string()),
            },
            ProctorCliError::Session(e) => CliError {
                code: "SESSION_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            ProctorCliError::Frame(message) => CliError {
                code: "FRAME_ERROR".to_string(),
                message,
                hint: Some("Byte length must equal width x height x channels".to_string()),
            },
            ProctorCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the checks above".to_string()),
            },
        }
    }
}
