use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::warn;

use aerolopa_crawler::airlines::AirlineTable;
use aerolopa_crawler::db::Store;
use aerolopa_crawler::normalize::normalize_aircraft;
use aerolopa_crawler::pipeline::{Cancellation, Orchestrator};
use aerolopa_crawler::settings::Settings;

#[derive(Parser)]
#[command(name = "aerolopa", about = "AeroLOPA seat-map crawler")]
struct Cli {
    /// Debug-level logging (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output directory for database, event log and images (overrides config)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl seat maps for some or all airlines
    Crawl {
        /// Comma-separated IATA codes, e.g. "CA,MU,CZ"
        #[arg(short, long, conflicts_with = "all_airlines", required_unless_present = "all_airlines")]
        airline: Option<String>,
        /// Crawl every airline in the reference table
        #[arg(long)]
        all_airlines: bool,
        /// Airlines processed concurrently (overrides config)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Print fetch statistics when done
        #[arg(long)]
        stats: bool,
        /// Drop entries whose aircraft label is not recognized
        #[arg(long)]
        strict: bool,
    },
    /// List airlines in the packaged reference table
    ListAirlines,
    /// Print stored records for one airline as JSON
    Query {
        #[arg(short, long)]
        airline: String,
        /// Aircraft label; normalized before lookup
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Print airlines that have stored records as JSON
    StoredAirlines,
    /// Record counts per airline
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();

    let t0 = Instant::now();
    let table = Arc::new(AirlineTable::packaged().context("packaged airline table is invalid")?);
    let mut settings = Settings::load()?;
    if let Some(dir) = cli.output_dir {
        settings.storage.output_dir = dir;
    }

    let code = match cli.command {
        Commands::Crawl {
            airline,
            all_airlines,
            workers,
            stats,
            strict,
        } => {
            let codes = if all_airlines {
                table.codes()
            } else {
                let (valid, invalid) = parse_airline_codes(airline.as_deref().unwrap_or(""), &table);
                if !invalid.is_empty() {
                    eprintln!("warning: unsupported airline codes: {}", invalid.join(", "));
                    eprintln!("run `aerolopa list-airlines` to see supported airlines");
                }
                if valid.is_empty() {
                    bail!("no valid airline codes given");
                }
                valid
            };
            if let Some(n) = workers {
                settings.pipeline.workers = n;
            }
            if strict {
                settings.pipeline.accept_unrecognized = false;
            }
            settings.validate()?;

            let cancel = Cancellation::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("interrupt received, finishing in-flight requests");
                        cancel.cancel();
                    }
                });
            }

            let orchestrator =
                Arc::new(Orchestrator::from_settings(&settings, Arc::clone(&table), cancel)?);
            println!("Crawling {} airline(s): {}", codes.len(), codes.join(", "));
            let report = orchestrator
                .run_batch(&codes, settings.pipeline.workers, true)
                .await;
            report.print();
            if stats {
                orchestrator.metrics().print();
            }

            if report.any_failed() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Commands::ListAirlines => {
            println!("\nSupported airlines (table {}):", table.version());
            println!("{}", "-".repeat(50));
            for a in table.all() {
                println!("{:<3} | {:<20} | {}", a.iata_code, a.chinese_name, a.english_name);
            }
            println!("\n{} airlines", table.len());
            ExitCode::SUCCESS
        }
        Commands::Query { airline, model } => {
            let store = Store::from_settings(&settings.storage)?;
            let code = match table.get(&airline) {
                Some(a) => a.iata_code.clone(),
                None => bail!("unknown airline code {airline:?}"),
            };
            let records = match model {
                Some(label) => store.get(&code, normalize_aircraft(&label).as_str())?,
                None => store.list_records(&code)?,
            };
            println!("{}", serde_json::to_string_pretty(&records)?);
            ExitCode::SUCCESS
        }
        Commands::StoredAirlines => {
            let store = Store::from_settings(&settings.storage)?;
            println!("{}", serde_json::to_string_pretty(&store.list_airlines()?)?);
            ExitCode::SUCCESS
        }
        Commands::Stats => {
            let store = Store::from_settings(&settings.storage)?;
            let s = store.stats(settings.pipeline.min_image_bytes)?;
            for (code, count) in &s.per_airline {
                let name = table.get(code).map(|a| a.english_name.as_str()).unwrap_or("?");
                println!("{:<3} | {:<32} | {:>5}", code, name, count);
            }
            println!("\nTotal:      {}", s.total);
            println!("Undersized: {}", s.undersized);
            ExitCode::SUCCESS
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    Ok(code)
}

/// Split `"ca, MU,,zz"` into known codes (upper-cased, deduped, input order)
/// and unknown ones.
fn parse_airline_codes(input: &str, table: &AirlineTable) -> (Vec<String>, Vec<String>) {
    let mut valid: Vec<String> = Vec::new();
    let mut invalid = Vec::new();
    for code in input.split(',').map(|c| c.trim().to_uppercase()).filter(|c| !c.is_empty()) {
        if table.get(&code).is_some() {
            if !valid.contains(&code) {
                valid.push(code);
            }
        } else {
            invalid.push(code);
        }
    }
    (valid, invalid)
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
