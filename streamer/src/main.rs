mod camera;
mod encoder;
mod server;
mod session;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use lms_common::config::{CameraSourceKind, Config};
use tracing::{error, info};

use crate::camera::{FfmpegSource, TestPatternSource};

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
        addr = config.streamer.listen_addr,
        source = ?config.camera.source,
        device = config.camera.device,
        interval_ms = config.streamer.frame_interval_ms,
        "starting frame streamer"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let result = match config.camera.source {
        CameraSourceKind::Ffmpeg => {
            let source = FfmpegSource::new(&config.camera);
            server::run(source, &config.streamer, shutdown).await
        }
        CameraSourceKind::TestPattern => {
            let source = TestPatternSource::new(config.camera.width, config.camera.height);
            server::run(source, &config.streamer, shutdown).await
        }
    };

    if let Err(e) = result {
        error!(error = %e, addr = config.streamer.listen_addr, "server failed");
        std::process::exit(1);
    }
    info!("frame streamer stopped");
}
