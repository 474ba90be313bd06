//! Management CLI for the pricing service
//!
//! `serve` runs the HTTP surface; the remaining commands administer the
//! snapshot catalog. Ingestion itself is an external producer and is
//! scheduled elsewhere.

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

use cms_pricer::api::AppState;
use cms_pricer::config::Settings;
use cms_pricer::resolver::{GeographyResolver, ResolverConfig};
use cms_pricer::snapshot::SnapshotRegistry;
use cms_pricer::store::{PgStore, PricingStore, RunStore, SnapshotStore};

const DATASET_IDS: &[&str] = &[
    "GEOGRAPHY", "MPFS", "OPPS", "ASC", "IPPS", "CLFS", "DMEPOS", "DRUG_ASP", "NADAC",
];

#[derive(Parser)]
#[command(name = "cms-pricer", version, about = "CMS Medicare fee-schedule pricing service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Override the bind address
        #[arg(long, env = "BIND_ADDR")]
        bind: Option<String>,
    },

    /// Show store status: snapshot counts and resolution statistics
    Status,

    /// List snapshots for a dataset
    ListSnapshots {
        /// Dataset id (GEOGRAPHY, MPFS, OPPS, ...)
        #[arg(long, default_value = "GEOGRAPHY")]
        dataset: String,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Show one snapshot by digest
    ShowSnapshot { digest: String },

    /// Pin a dataset digest under a name for reproducibility tests
    PinDigest {
        digest: String,

        #[arg(long)]
        name: String,
    },

    /// Verify a pin by resolving sample ZIPs and scoring digest matches
    VerifyRepro {
        pin: String,

        /// Sample ZIPs, comma separated
        #[arg(long, value_delimiter = ',')]
        zips: Vec<String>,

        #[arg(long, default_value_t = 2025)]
        year: i32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    let store: Arc<dyn PricingStore> = match PgStore::connect(&settings.database_url).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(error = %err, "failed to connect to the pricing store");
            return ExitCode::from(2);
        }
    };

    match run(cli.command, settings, store).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(
    command: Command,
    mut settings: Settings,
    store: Arc<dyn PricingStore>,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                settings.bind_addr = bind;
            }
            let state = AppState::new(settings, store);
            cms_pricer::api::serve(state).await?;
        }

        Command::Status => {
            println!("datasets:");
            for dataset in DATASET_IDS {
                let snapshots = store.snapshots(dataset).await?;
                let latest = snapshots
                    .last()
                    .map(|s| format!("{} (from {})", &s.digest[..12.min(s.digest.len())], s.effective_from))
                    .unwrap_or_else(|| "none".to_string());
                println!("  {:<10} {:>3} snapshots, latest {}", dataset, snapshots.len(), latest);
            }
            let stats = store.resolution_stats(None).await?;
            println!(
                "resolutions: {} total ({} zip+4, {} zip5, {} nearest, {} default, {} errors)",
                stats.total_calls,
                stats.zip4_matches,
                stats.zip5_matches,
                stats.nearest_matches,
                stats.default_matches,
                stats.errors
            );
        }

        Command::ListSnapshots { dataset, limit } => {
            let dataset = dataset.to_ascii_uppercase();
            if !DATASET_IDS.contains(&dataset.as_str()) {
                return Err(format!(
                    "invalid dataset id {:?}; expected one of {}",
                    dataset,
                    DATASET_IDS.join(", ")
                )
                .into());
            }
            let snapshots = store.snapshots(&dataset).await?;
            if snapshots.is_empty() {
                println!("no snapshots for {}", dataset);
                return Ok(());
            }
            for snapshot in snapshots.iter().rev().take(limit) {
                println!(
                    "{}  {} -> {}  {}",
                    snapshot.digest,
                    snapshot.effective_from,
                    snapshot
                        .effective_to
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "open".to_string()),
                    snapshot.created_at.format("%Y-%m-%d")
                );
            }
        }

        Command::ShowSnapshot { digest } => {
            let snapshot = store
                .snapshot_by_digest(&digest)
                .await?
                .ok_or_else(|| format!("snapshot not found for digest {}", digest))?;
            println!("dataset:        {}", snapshot.dataset_id);
            println!("digest:         {}", snapshot.digest);
            println!("effective_from: {}", snapshot.effective_from);
            println!(
                "effective_to:   {}",
                snapshot
                    .effective_to
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "open".to_string())
            );
            println!("created_at:     {}", snapshot.created_at);
            println!("manifest:       {}", serde_json::to_string_pretty(&snapshot.manifest)?);
        }

        Command::PinDigest { digest, name } => {
            let registry = SnapshotRegistry::new(store);
            let pin = registry.pin_digest(&name, &digest).await?;
            println!("pinned {} as {}", pin.digest, pin.pin_name);
        }

        Command::VerifyRepro { pin, zips, year } => {
            if zips.is_empty() {
                return Err("at least one sample ZIP is required".into());
            }
            let resolver = GeographyResolver::new(
                store.clone(),
                ResolverConfig::default(),
            );
            let registry = SnapshotRegistry::new(store.clone());
            let report = registry
                .verify_reproducibility(&pin, &zips, &resolver, year)
                .await?;
            for check in &report.checks {
                let mark = if check.digest_match { "ok " } else { "FAIL" };
                println!(
                    "{} {}  locality={}  digest_match={}",
                    mark,
                    check.zip5,
                    check.locality_id.as_deref().unwrap_or("-"),
                    check.digest_match
                );
            }
            println!("score: {:.3}", report.score);
            if report.score < 1.0 {
                return Err("reproducibility verification failed".into());
            }
        }
    }
    Ok(())
}
