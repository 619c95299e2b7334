use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};

use recoverysense::config::AppConfig;
use recoverysense::database::{Database, SessionSource, SessionStore};
use recoverysense::error::RecoverySenseError;
use recoverysense::import::ImportManager;
use recoverysense::logging::{self, LogConfig};
use recoverysense::models::{Recommendation, RiskLevel, SessionIntensity, TrainingDay};
use recoverysense::recommendation::{self, ScoredDay};

/// RecoverySense - heart-rate training load CLI
///
/// Records sessions from a Bluetooth heart-rate strap, imports Polar exports,
/// scores training load and recommends the next session's intensity.
#[derive(Parser)]
#[command(name = "recoverysense")]
#[command(version)]
#[command(about = "Heart-rate training load and recovery CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a workout file (Polar JSON or CSV)
    Import {
        /// Input file path
        #[arg(short, long)]
        file: PathBuf,

        /// Session date for formats without one (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Import every supported file in a directory
    ImportDir {
        /// Directory to scan
        #[arg(short, long)]
        dir: PathBuf,

        /// Session date for formats without one (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show stored sessions
    History {
        /// Number of most recent sessions to show
        #[arg(short, long, default_value = "14")]
        limit: usize,
    },

    /// Recommend the next session's intensity
    Recommend,

    /// Record a live session from a heart-rate strap
    #[cfg(feature = "bluetooth")]
    Live {
        /// Sensor address; scans by vendor name when omitted
        #[arg(short, long)]
        address: Option<String>,

        /// Stop after this many minutes (Ctrl-C stops earlier)
        #[arg(short, long, default_value = "60")]
        minutes: u64,
    },

    /// Configure application settings
    Config {
        /// List all configuration options
        #[arg(short, long)]
        list: bool,

        /// Set a configuration value (key=value)
        #[arg(short, long)]
        set: Option<String>,

        /// Get a configuration value
        #[arg(short, long)]
        get: Option<String>,
    },
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Minutes")]
    minutes: String,
    #[tabled(rename = "Avg HR")]
    average_hr: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Risk")]
    risk: String,
}

impl From<&TrainingDay> for HistoryRow {
    fn from(day: &TrainingDay) -> Self {
        Self {
            date: day.date().to_string(),
            minutes: format!("{:.0}", day.duration_minutes()),
            average_hr: day
                .average_heart_rate()
                .map(|hr| format!("{:.0}", hr))
                .unwrap_or_else(|| "-".to_string()),
            score: day
                .training_score()
                .map(|s| format!("{:.1}", s))
                .unwrap_or_else(|| "-".to_string()),
            risk: day
                .risk_level()
                .map(|r| r.as_str().to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

fn paint_risk(risk: RiskLevel) -> ColoredString {
    match risk {
        RiskLevel::Green => risk.as_str().green().bold(),
        RiskLevel::Yellow => risk.as_str().yellow().bold(),
        RiskLevel::Red => risk.as_str().red().bold(),
    }
}

fn paint_intensity(intensity: SessionIntensity) -> ColoredString {
    let label = intensity.to_string();
    match intensity {
        SessionIntensity::Rest => label.blue().bold(),
        SessionIntensity::Easy => label.green().bold(),
        SessionIntensity::Moderate => label.yellow().bold(),
        SessionIntensity::Hard => label.red().bold(),
    }
}

/// Log a library failure and turn it into the message shown to the user
fn user_facing(err: impl Into<RecoverySenseError>) -> anyhow::Error {
    let err = err.into();
    err.log();
    anyhow::anyhow!(err.user_message())
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let path = config.settings.database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
    }
    Database::new(&path).with_context(|| format!("Failed to open database: {}", path.display()))
}

fn print_day(day: &TrainingDay) {
    let score = day.training_score().unwrap_or_default();
    match day.risk_level() {
        Some(risk) => println!(
            "  {}  score {:.1}  {}  ({})",
            day.date(),
            score,
            paint_risk(risk),
            risk.description()
        ),
        None => println!("  {}  score {:.1}", day.date(), score),
    }
}

fn print_recommendation(recommendation: Option<Recommendation>) {
    match recommendation {
        Some(rec) => {
            println!("{} {}", paint_intensity(rec.intensity), rec.title.bold());
            println!("  {}", rec.explanation);
        }
        None => println!("{}", "Not enough data for a recommendation yet.".dimmed()),
    }
}

fn import_file(db: &mut Database, file: &Path, date: Option<NaiveDate>) -> Result<()> {
    let manager = ImportManager::with_csv_date(date);
    let session = manager.import_file(file).map_err(user_facing)?;

    let start = session.start_time_ms;
    let saved = db.save_day(&session.into_training_day(), SessionSource::Import, start)?;
    println!(
        "{} {} samples from {}",
        "✓ Imported".green(),
        saved.day.samples().len(),
        file.display()
    );
    print_day(&saved.day);
    Ok(())
}

fn import_dir(db: &mut Database, dir: &Path, date: Option<NaiveDate>) -> Result<()> {
    let outcome = ImportManager::with_csv_date(date)
        .import_directory(dir)
        .map_err(user_facing)?;

    for (path, err) in outcome.failures.iter() {
        eprintln!("{} {}: {}", "✗".red(), path.display(), err);
    }

    let imported = outcome.sessions.len();
    for (_, session) in outcome.sessions {
        let start = session.start_time_ms;
        db.save_day(&session.into_training_day(), SessionSource::Import, start)?;
    }

    println!(
        "{} {} sessions, {} failed",
        "✓ Imported".green(),
        imported,
        outcome.failures.len()
    );
    Ok(())
}

fn show_history(db: &Database, limit: usize) -> Result<()> {
    let history = db.get_all_sessions()?;
    if history.is_empty() {
        println!("{}", "No sessions stored yet.".dimmed());
        return Ok(());
    }

    let recent = &history[history.len().saturating_sub(limit)..];
    let rows: Vec<HistoryRow> = recent.iter().map(HistoryRow::from).collect();
    println!("{}", Table::new(rows).with(Style::rounded()));

    let stats = db.get_stats()?;
    println!(
        "{}",
        format!(
            "{} sessions, {} samples, compression {:.1}x",
            stats.session_count, stats.sample_count, stats.compression_ratio
        )
        .dimmed()
    );
    Ok(())
}

fn show_recommendation(db: &Database) -> Result<()> {
    let history = db.get_all_sessions()?;
    let scored: Vec<ScoredDay> = history.iter().map(ScoredDay::from).collect();

    if let Some(snapshot) = recommendation::analyze(&scored) {
        println!(
            "{}",
            format!(
                "acute {:.1}  chronic {:.1}  ratio {:.2}  hard days {}",
                snapshot.acute, snapshot.chronic, snapshot.ratio, snapshot.hard_days
            )
            .dimmed()
        );
    }
    print_recommendation(recommendation::recommend(&scored));
    Ok(())
}

fn manage_config(
    config: &mut AppConfig,
    config_path: &Path,
    list: bool,
    set: Option<String>,
    get: Option<String>,
) -> Result<()> {
    if let Some(key_value) = set {
        let (key, value) = key_value
            .split_once('=')
            .context("Expected key=value")?;
        config.set(key.trim(), value.trim())?;
        config.save_to_file(config_path)?;
        println!("{} {} = {}", "✓ Set".green(), key.trim(), value.trim());
    } else if let Some(key) = get {
        println!("{}", config.get(&key)?);
    } else if list {
        for key in AppConfig::KEYS {
            println!("{} = {}", key.bold(), config.get(key)?);
        }
    } else {
        println!("Config file: {}", config_path.display());
    }
    Ok(())
}

#[cfg(feature = "bluetooth")]
async fn record_live(
    config: &AppConfig,
    db: Database,
    address: Option<String>,
    minutes: u64,
) -> Result<()> {
    use recoverysense::ble::{event_queue, BtleplugTransport, ConnectionState, DeviceLink};
    use recoverysense::error::LinkError;
    use recoverysense::session::SessionController;
    use std::time::Duration;

    let (sink, queue) = event_queue();
    let transport = BtleplugTransport::new(sink)
        .await
        .context("Bluetooth unavailable")?;
    let link = DeviceLink::new(Box::new(transport), config.link.clone());
    let pump = link.spawn_event_pump(queue);
    let controller = SessionController::new(link, db);

    let mut status = controller.watch_status();
    controller.start_scan(address.or_else(|| config.link.default_address.clone()));
    println!("{}", controller.connection_info().cyan());

    loop {
        status.changed().await?;
        let current = status.borrow_and_update().clone();
        println!("{}", current.info.cyan());
        match current.state {
            ConnectionState::Connected => break,
            ConnectionState::Error(reason) => {
                let err = controller
                    .link()
                    .last_error()
                    .unwrap_or(LinkError::ConnectionFailed(reason));
                controller.shutdown();
                pump.abort();
                return Err(user_facing(err));
            }
            _ => {}
        }
    }

    controller.begin_recording();
    println!(
        "{}",
        format!("Recording for up to {} minutes, Ctrl-C to stop", minutes).green()
    );

    let mut heart_rate = controller.watch_heart_rate();
    let deadline = tokio::time::sleep(Duration::from_secs(minutes * 60));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            changed = heart_rate.changed() => {
                changed?;
                if let Some(bpm) = *heart_rate.borrow_and_update() {
                    println!("  {} bpm", bpm);
                }
            }
            changed = status.changed() => {
                changed?;
                let current = status.borrow_and_update().clone();
                if current.state != ConnectionState::Connected {
                    println!("{}", current.info.yellow());
                    break;
                }
            }
        }
    }

    let saved = controller.end_recording_and_save()?;
    controller.shutdown();
    pump.abort();

    if let Some(saved) = saved {
        println!("{}", "✓ Session saved".green());
        print_day(&saved.day);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(AppConfig::default_config_path);
    let mut config = AppConfig::load_or_default_from(&config_path)?;

    let log_config = LogConfig {
        level: config.logging.level.raised_by(cli.verbose),
        ..config.logging.clone()
    };
    logging::init_logging(&log_config)?;

    match cli.command {
        Commands::Import { file, date } => {
            let mut db = open_database(&config)?;
            import_file(&mut db, &file, date)?;
        }

        Commands::ImportDir { dir, date } => {
            let mut db = open_database(&config)?;
            import_dir(&mut db, &dir, date)?;
        }

        Commands::History { limit } => {
            let db = open_database(&config)?;
            show_history(&db, limit)?;
        }

        Commands::Recommend => {
            let db = open_database(&config)?;
            show_recommendation(&db)?;
        }

        #[cfg(feature = "bluetooth")]
        Commands::Live { address, minutes } => {
            let db = open_database(&config)?;
            record_live(&config, db, address, minutes).await?;
        }

        Commands::Config { list, set, get } => {
            manage_config(&mut config, &config_path, list, set, get)?;
        }
    }

    Ok(())
}
