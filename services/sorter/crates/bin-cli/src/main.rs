use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use smartbin_common::config::ENV_PREFIX;
use smartbin_common::{validate_level, Compartment, StoreBackend, StoreSettings, WasteClass};
use smartbin_server::store::{self, StateStore};
use smartbin_server::{BinLifecycleController, CycleOutcome, LifecycleConfig};
use tracing_subscriber::EnvFilter;

/// smartbin operator CLI.
///
/// Reads and writes the bin document in the configured state store. Store
/// settings come from the same `SMARTBIN_*` env vars as the server;
/// credentials are only ever read from env or secret files.
#[derive(Parser, Debug)]
#[command(name = "smartbin", version, about)]
struct Cli {
    /// Override SMARTBIN_STORE_BACKEND (firebase, valkey or memory)
    #[arg(long, global = true, value_parser = parse_backend)]
    backend: Option<StoreBackend>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the fill levels as JSON
    Levels,
    /// Show lid and compartment state
    Status,
    /// Record a fill level (0-100) for one compartment, as the sensor would
    SetLevel {
        /// BiodegradableBin, NonBiodegradableBin, or a waste type
        compartment: Compartment,
        #[arg(value_parser = parse_level)]
        level: f64,
    },
    /// Run one open/close cycle for a waste type
    Open {
        /// biodegradable or non-biodegradable
        waste_type: WasteClass,
        /// Seconds before the lid is closed again
        #[arg(
            long,
            default_value_t = smartbin_common::timing::DEFAULT_DWELL_SECS,
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        dwell_secs: u64,
        /// Leave the lid open instead of closing after the dwell
        #[arg(long, conflicts_with = "dwell_secs")]
        no_close: bool,
    },
    /// Close the lid immediately
    Close,
}

fn parse_backend(s: &str) -> Result<StoreBackend, String> {
    match s.to_lowercase().as_str() {
        "firebase" => Ok(StoreBackend::Firebase),
        "valkey" => Ok(StoreBackend::Valkey),
        "memory" => Ok(StoreBackend::Memory),
        other => Err(format!(
            "invalid backend '{other}': expected firebase, valkey, or memory"
        )),
    }
}

fn parse_level(s: &str) -> Result<f64, String> {
    let level: f64 = s
        .parse()
        .map_err(|_| format!("invalid level '{s}': expected a number"))?;
    validate_level(level).map_err(str::to_string)?;
    Ok(level)
}

fn describe(outcome: &CycleOutcome) -> String {
    match outcome {
        CycleOutcome::Closed => "lid closed".to_string(),
        CycleOutcome::CloseCancelled => "lid left open".to_string(),
        CycleOutcome::OpenFailed(err) => format!("open failed: {err}"),
        CycleOutcome::OpenUnconfirmed(err) => format!("lid closed (open unconfirmed: {err})"),
        CycleOutcome::CloseFailed(err) => format!("close failed: {err}"),
        CycleOutcome::Aborted => "cycle aborted".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut settings: StoreSettings = envy::prefixed(ENV_PREFIX)
        .from_env()
        .context("failed to load store settings from SMARTBIN_* env vars")?;
    if let Some(backend) = cli.backend {
        settings.store_backend = backend;
    }
    settings
        .validate()
        .map_err(|e| anyhow!("invalid store settings: {e}"))?;

    smartbin_server::install_crypto_provider();
    let store = store::connect(&settings)
        .await
        .context("failed to connect state store")?;
    let config = LifecycleConfig {
        store_timeout: Duration::from_secs(settings.store_timeout_secs),
        ..LifecycleConfig::default()
    };

    run(cli.command, store, config).await
}

async fn run(command: Commands, store: Arc<dyn StateStore>, config: LifecycleConfig) -> Result<()> {
    match command {
        Commands::Levels => {
            let controller = BinLifecycleController::new(store, config);
            let Some(levels) = controller.read_bin_levels().await else {
                bail!("failed to read bin levels");
            };
            println!("{}", serde_json::to_string_pretty(&levels)?);
        }
        Commands::Status => {
            let controller = BinLifecycleController::new(store, config);
            let state = controller
                .read_bin_state()
                .await
                .context("failed to read bin state")?;
            let Some(state) = state else {
                println!("no bin document in store");
                return Ok(());
            };
            let waste_type = state
                .waste_type
                .map_or_else(|| "-".to_string(), |w| w.to_string());
            println!("Lid:                 {}", state.lid_status.as_str());
            println!("Last waste type:     {waste_type}");
            println!("BiodegradableBin:    {}", open_word(state.biodegradable_open));
            println!("NonBiodegradableBin: {}", open_word(state.non_biodegradable_open));
            println!(
                "Updated:             {}",
                state.updated_at.as_deref().unwrap_or("-")
            );
            if !state.is_consistent() {
                println!("warning: compartment flags disagree with lid status");
            }
        }
        Commands::SetLevel { compartment, level } => {
            let controller = BinLifecycleController::new(store, config);
            controller
                .set_level(compartment, level)
                .await
                .with_context(|| format!("failed to set level for {compartment}"))?;
            println!("{compartment} level set to {level}");
        }
        Commands::Open {
            waste_type,
            dwell_secs,
            no_close,
        } => {
            let config = LifecycleConfig {
                dwell: Duration::from_secs(dwell_secs),
                ..config
            };
            let controller = BinLifecycleController::new(store, config);
            let cycle = controller.report_classification(waste_type);
            match cycle.opened().await {
                Ok(()) => println!("lid opened for {waste_type}"),
                // the close still follows, stay around for it
                Err(e) if e.may_have_applied() && !no_close => {
                    eprintln!("warning: open not confirmed for {waste_type}: {e}");
                }
                Err(e) => bail!("failed to open lid for {waste_type}: {e}"),
            }

            if no_close {
                cycle.cancel_close();
            } else {
                println!("closing in {dwell_secs}s");
            }
            let outcome = cycle.wait().await;
            println!("{}", describe(&outcome));
            if matches!(
                outcome,
                CycleOutcome::OpenFailed(_) | CycleOutcome::CloseFailed(_) | CycleOutcome::Aborted
            ) {
                bail!("cycle did not complete: {}", describe(&outcome));
            }
        }
        Commands::Close => {
            let controller = BinLifecycleController::new(store, config);
            controller
                .close_now()
                .await
                .context("failed to close lid")?;
            println!("lid closed");
        }
    }
    Ok(())
}

fn open_word(open: bool) -> &'static str {
    if open {
        "open"
    } else {
        "closed"
    }
}
