use anyhow::{Context, Result};
use attend_core::{AttendanceLedger, EncodingStore, OnnxFaceEngine};
use attend_hw::Camera;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod display;
mod kiosk;
mod overlay;

use config::Config;

#[derive(Parser)]
#[command(name = "attend", about = "Face-recognition attendance kiosk")]
struct Cli {
    /// TOML config file (defaults to $ATTEND_CONFIG, then built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the kiosk (default)
    Run,
    /// Build the encoding store and report encodings per identity
    Enroll,
    /// List attendance recorded on a day
    Report {
        /// Day to report, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = Config::load(cli.config.as_deref())?;
            kiosk::run(&config)
        }
        Commands::Enroll => {
            let config = Config::load(cli.config.as_deref())?;
            enroll(&config)
        }
        Commands::Report { date, json } => {
            let config = Config::load(cli.config.as_deref())?;
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            report(&config, date, json)
        }
        Commands::Devices => {
            devices();
            Ok(())
        }
    }
}

fn enroll(config: &Config) -> Result<()> {
    let mut engine = OnnxFaceEngine::load(&config.model_dir, config.detector_confidence)
        .with_context(|| format!("failed to load face models from {}", config.model_dir.display()))?;
    let store = EncodingStore::build(&config.enrollment_source(), &mut engine)
        .context("failed to build encoding store")?;

    for identity in store.identities() {
        println!(
            "{:<12} {:<30} {} encoding(s)",
            identity.id,
            identity.name,
            store.encoding_count(&identity.id)
        );
    }
    let unmatchable = store.unmatchable().len();
    println!(
        "{} encoding(s) across {} identities; {unmatchable} unmatchable",
        store.len(),
        store.identities().count()
    );
    Ok(())
}

fn report(config: &Config, date: NaiveDate, json: bool) -> Result<()> {
    let ledger = AttendanceLedger::new(&config.ledger);
    let entries = ledger.entries_on(date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No attendance recorded on {date}");
        return Ok(());
    }
    for entry in &entries {
        println!("{}  {:<12} {}", entry.time, entry.identity_id, entry.name);
    }
    println!("{} present on {date}", entries.len());
    Ok(())
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
}
