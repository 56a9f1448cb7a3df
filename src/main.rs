//! # Careline CLI (`careline`)
//!
//! ## Usage
//!
//! ```bash
//! careline --config ./config/careline.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `careline init` | Create the record store and run schema migrations |
//! | `careline ask "<symptoms>"` | Run one triage query |
//! | `careline labs k=v ...` | Screen lab values against reference ranges |
//! | `careline records` | List recent outcome records |
//! | `careline serve` | Start the JSON HTTP API |
//!
//! A `.env` file in the working directory is loaded first, so
//! `GROQ_API_KEY` and `MODEL_NAME` can live there.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use careline::config::{self, Config};
use careline::labs::analyze_labs;
use careline::logging;
use careline::models::QueryOutcome;
use careline::normalize::preview;
use careline::records::{RecordStore, SqliteRecordStore};
use careline::{server, QueryOrchestrator};

/// Exit status for rejected input (empty, oversized, bad category).
const EXIT_INVALID_INPUT: i32 = 2;

#[derive(Parser)]
#[command(
    name = "careline",
    about = "Careline: symptom triage with emergency screening and grounded guidance",
    version,
    long_about = "Careline screens a symptom description for emergencies, scores a coarse \
    risk tier, retrieves grounding passages from a local medical index, and asks a hosted \
    LLM for general guidance. It never diagnoses."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/careline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the record store.
    ///
    /// Creates the SQLite file and the `records` table. Idempotent.
    Init,

    /// Run the triage pipeline on a symptom description.
    Ask {
        /// Free-text symptom description.
        symptoms: String,

        /// Patient category: `adult` or `infant`.
        #[arg(long, default_value = "adult")]
        patient: String,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Screen lab values, e.g. `careline labs hemoglobin=10.5 wbc=7000`.
    ///
    /// Needs no config file.
    Labs {
        #[arg(value_parser = parse_lab_value, required = true)]
        values: Vec<(String, f64)>,

        /// Print findings as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the most recent outcome records, newest first.
    Records {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },

    /// Start the JSON HTTP API on `[server].bind`.
    Serve,
}

/// Parse a `name=value` lab reading.
fn parse_lab_value(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid NAME=VALUE: no '=' found in '{}'", s))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid number for '{}': '{}'", name, value))?;
    Ok((name.trim().to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Labs { values, json } = &cli.command {
        logging::init_tracing(&Default::default())?;
        print_labs(values, *json)?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init_tracing(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            let store = SqliteRecordStore::open(&cfg.db.path)
                .await
                .with_context(|| format!("Failed to open {}", cfg.db.path.display()))?;
            store.close().await;
            println!("Record store initialized at {}.", cfg.db.path.display());
        }
        Commands::Ask {
            symptoms,
            patient,
            json,
        } => {
            run_ask(&cfg, &symptoms, &patient, json).await?;
        }
        Commands::Records { limit } => {
            let store = SqliteRecordStore::open(&cfg.db.path).await?;
            let records = store.recent(limit).await?;
            if records.is_empty() {
                println!("No records.");
            }
            for r in &records {
                println!(
                    "{}. [{}] {} ({:.0}%) {}",
                    r.id,
                    r.created_at,
                    r.risk_level.to_uppercase(),
                    r.score * 100.0,
                    preview(&r.symptoms, 80).replace('\n', " ")
                );
            }
            store.close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Labs { .. } => unreachable!(),
    }

    Ok(())
}

async fn run_ask(cfg: &Config, symptoms: &str, patient: &str, json: bool) -> anyhow::Result<()> {
    let orchestrator = QueryOrchestrator::from_config(cfg).await?;

    let outcome = match orchestrator.process_query(symptoms, patient).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_invalid_input() => {
            eprintln!("Error: {}", e);
            std::process::exit(EXIT_INVALID_INPUT);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match outcome {
        QueryOutcome::Emergency(e) => {
            println!("EMERGENCY: {}", e.message);
            if let Some(reason) = e.reason {
                println!("Reason: {}", reason);
            }
        }
        QueryOutcome::Completed(c) => {
            println!("{}", c.report);
            if !c.safe_medicines.is_empty() {
                println!(
                    "Over-the-counter options mentioned: {}",
                    c.safe_medicines.join(", ")
                );
            }
        }
    }
    Ok(())
}

fn print_labs(values: &[(String, f64)], json: bool) -> anyhow::Result<()> {
    let findings = analyze_labs(values);
    if json {
        println!("{}", serde_json::to_string_pretty(&findings)?);
    } else {
        for finding in &findings {
            println!("{}", finding);
        }
    }
    Ok(())
}
