//! ventpoll - poll one ventilation unit and print its values as JSON
//!
//! Reads the unit configuration from a TOML file (plus `VENT_*` environment
//! overrides), probes the unit, then polls at the configured interval and
//! prints one JSON object per poll on stdout.
//!
//! Usage: ventpoll --config unit.toml [--once]

use std::path::PathBuf;

use clap::Parser;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use systemair_modbus::{logging, UnitConfig, VentilationUnit};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Poll a Systemair ventilation unit over Modbus TCP.
#[derive(Parser, Debug)]
#[command(name = "ventpoll")]
#[command(version)]
struct Args {
    /// Path to the unit configuration (TOML)
    #[arg(short, long, default_value = "unit.toml", env = "VENT_CONFIG")]
    config: PathBuf,

    /// Poll once and exit
    #[arg(long)]
    once: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();
    logging::init(&args.log_level)?;

    let config = UnitConfig::load(&args.config)?;
    info!(
        "Polling {} at {}:{} unit {} every {}s ({} profile)",
        config.model, config.host, config.port, config.unit_id, config.poll_interval_secs,
        config.gateway_profile
    );

    let unit = VentilationUnit::from_config(&config)?;
    unit.probe().await?;

    if args.once {
        let result = poll_once(&unit).await;
        unit.close().await;
        return result;
    }

    let mut ticker = interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = poll_once(&unit).await {
                    warn!("Poll failed: {}", e);
                }
            }
        }
    }

    unit.close().await;
    Ok(())
}

async fn poll_once(unit: &VentilationUnit) -> Result<(), BoxError> {
    let values = match unit.poll().await {
        Ok(values) => values,
        Err(e) => {
            error!("Poll aborted: {}", e);
            return Err(e.into());
        }
    };
    println!("{}", serde_json::to_string(&values)?);
    Ok(())
}
