use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use meteo::{AppState, MeteoConfig, VERSION, logging, web};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// `--config <path>` or `--config=<path>`
fn config_arg(mut args: impl Iterator<Item = String>) -> Option<PathBuf> {
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = MeteoConfig::load_from_path(config_arg(std::env::args().skip(1)))?;
    logging::init(&config.logging)?;
    info!("Starting meteo {}", VERSION);

    let db = fjall::Database::builder(&config.storage.path)
        .open()
        .with_context(|| format!("Failed to open database at {}", config.storage.path))?;
    let state = AppState::from_config(&config, &db)?;
    state.sessions.spawn_sweeper(SESSION_SWEEP_INTERVAL);

    web::run(&config.server, state).await
}
