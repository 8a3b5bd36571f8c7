use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ncl_reconcile::{Platform, PlatformConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "ncl-cli")]
#[command(about = "NGO campaign ledger command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the JSON API (and the scheduler when enabled).
    Serve,
    /// Reconcile one campaign, or every known campaign.
    Reconcile {
        #[arg(long)]
        id: Option<String>,
    },
    /// Recompute and store an NGO's score.
    Score { ngo_id: String },
    /// One pass of the donation confirmation tracker.
    Confirm,
    /// Write a parquet snapshot of the ledger.
    Export,
    /// Run the scheduler without the web server until interrupted.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Reconcile { id: None });

    match command {
        Commands::Serve => ncl_web::serve_from_env().await?,
        Commands::Reconcile { id: Some(id) } => {
            let campaign = open_platform()?.campaigns.reconcile_campaign(&id, None).await?;
            println!(
                "reconciled {}: donations={} confirmed={} pending={} donors={}",
                campaign.id,
                campaign.donations.len(),
                campaign.stats.confirmed_amount,
                campaign.stats.pending_amount,
                campaign.stats.unique_donors
            );
        }
        Commands::Reconcile { id: None } => {
            let summary = open_platform()?.campaigns.reconcile_all().await?;
            println!(
                "reconcile complete: reconciled={} failed={} donations={}",
                summary.reconciled, summary.failed, summary.total_donations
            );
        }
        Commands::Score { ngo_id } => {
            let score = open_platform()?.scores.refresh(&ngo_id).await?;
            println!("{}", serde_json::to_string_pretty(&score)?);
        }
        Commands::Confirm => {
            let tracker = open_platform()?
                .tracker
                .context("NCL_RPC_URL is not set; nothing to confirm against")?;
            let summary = tracker.run_once().await?;
            println!(
                "confirmation pass: checked={} confirmed={} failed={} pending={} errors={}",
                summary.checked,
                summary.confirmed,
                summary.failed,
                summary.still_pending,
                summary.errors
            );
        }
        Commands::Export => {
            let manifest = open_platform()?.export_snapshot().await?;
            println!("snapshot manifest: {}", manifest.display());
        }
        Commands::Watch => {
            let Some(_scheduler) = open_platform()?.start_scheduler().await? else {
                anyhow::bail!("scheduler disabled; set NCL_SCHEDULER_ENABLED=1");
            };
            info!("watching; press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        }
    }

    Ok(())
}

fn open_platform() -> Result<Platform> {
    Platform::open(PlatformConfig::from_env())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_json = std::env::var("NCL_LOG_JSON")
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false);
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
