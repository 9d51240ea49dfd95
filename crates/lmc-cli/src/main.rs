use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lmc_core::{ImportMetric, Lead};
use lmc_coverage::{classify, service_type_saturation};
use lmc_match::DuplicateDetector;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "lmc-cli")]
#[command(about = "Lead market coverage command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run duplicate detection over a JSON file of leads.
    Detect { input: PathBuf },
    /// Report saturation levels from a JSON file of import metrics.
    Report { input: PathBuf },
    /// Serve the JSON API.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Detect { input } => {
            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let leads: Vec<Lead> = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", input.display()))?;
            let groups = DuplicateDetector::default().detect(&leads);
            println!("{}", serde_json::to_string_pretty(&groups)?);
            eprintln!("detect complete: leads={} groups={}", leads.len(), groups.len());
        }
        Commands::Report { input } => {
            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let events: Vec<ImportMetric> = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", input.display()))?;
            let report = serde_json::json!({
                "overall": classify(&events),
                "by_service_type": service_type_saturation(&events),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Serve => {
            lmc_web::serve_from_env().await?;
        }
    }

    Ok(())
}
