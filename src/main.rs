use std::time::Duration;

use hrm_bridge_lib::{logging, state};
use hrm_bridge_lib::state::AppState;
use log::{error, info};

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(log::LevelFilter::Info);

    let config_path = state::config_path(std::env::args().nth(1));
    let app_state = match AppState::new(&config_path).await {
        Ok(app_state) => app_state,
        Err(e) => {
            error!("Failed to load config from {:?}: {}", config_path, e);
            return Err(e);
        }
    };
    app_state.start_bluetooth()?;

    let status = app_state.monitor.status();
    let mut ticker = tokio::time::interval(STATUS_LOG_INTERVAL);
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            _ = ticker.tick() => {
                match serde_json::to_string(&app_state.heart_rate.snapshot()) {
                    Ok(json) => info!(
                        "[{:?}] connected={} {}",
                        status.phase(),
                        status.is_connected(),
                        json
                    ),
                    Err(e) => error!("Failed to serialize heart rate snapshot: {}", e),
                }
            }
        }
    }

    info!("Shutting down...");
    tokio::task::spawn_blocking(move || app_state.shutdown()).await??;
    Ok(())
}
