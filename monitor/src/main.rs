mod api;
mod ingest;
mod predict;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use lms_common::config::Config;
use lms_common::state::TelemetryState;
use tracing::{error, info, warn};

use crate::api::AppState;
use crate::ingest::Ingestor;
use crate::predict::Predictor;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        addr = config.monitor.listen_addr,
        vitals_port = config.serial.vitals.port,
        motion_port = config.serial.motion.port,
        "starting cattle health monitor"
    );

    let telemetry = Arc::new(TelemetryState::new());
    let ingestor = match Ingestor::start(&config.serial, &config.vitals, &telemetry) {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to start serial readers");
            std::process::exit(1);
        }
    };

    // Training is CPU-bound; keep it off the async workers.
    let predictor = if config.predict.enabled {
        let predict_config = config.predict.clone();
        match tokio::task::spawn_blocking(move || Predictor::load(&predict_config)).await {
            Ok(Ok(p)) => Some(Arc::new(p)),
            Ok(Err(e)) => {
                warn!(error = %e, "disease models unavailable, /api/predict will return 503");
                None
            }
            Err(e) => {
                error!(error = %e, "spawn_blocking failed");
                None
            }
        }
    } else {
        info!("disease prediction disabled");
        None
    };

    let state = Arc::new(AppState {
        telemetry,
        predictor,
        readers: ingestor.stats(),
        start_time: Instant::now(),
    });

    let served = api::serve(&config.monitor.listen_addr, state).await;

    if let Err(e) = tokio::task::spawn_blocking(move || ingestor.shutdown()).await {
        error!(error = %e, "ingestor shutdown failed");
    }

    if let Err(e) = served {
        error!(error = %e, addr = config.monitor.listen_addr, "server failed");
        std::process::exit(1);
    }
    info!("cattle health monitor stopped");
}
