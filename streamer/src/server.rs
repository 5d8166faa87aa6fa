use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use lms_common::config::StreamerConfig;
use serde::Serialize;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::camera::{Camera, CameraSource};
use crate::encoder::FrameEncoder;
use crate::session::{FrameSink, SinkError, StreamSession};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState<S> {
    camera: Arc<Camera<S>>,
    encoder: FrameEncoder,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    start_time: Instant,
}

// Manual impl: `S` itself does not need to be `Clone`.
impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            camera: Arc::clone(&self.camera),
            encoder: self.encoder,
            interval: self.interval,
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
        }
    }
}

impl<S: CameraSource> AppState<S> {
    pub fn new(source: S, config: &StreamerConfig, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            camera: Arc::new(Camera::new(source)),
            encoder: FrameEncoder::new(config.jpeg_quality),
            interval: Duration::from_millis(config.frame_interval_ms),
            shutdown,
            start_time: Instant::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// WebSocket sink
// ---------------------------------------------------------------------------

/// Write half of an upgraded socket. A background task drains whatever the
/// client sends and flips `open` off when the client goes away.
pub struct WsSink {
    tx: SplitSink<WebSocket, Message>,
    open: Arc<AtomicBool>,
    drain: JoinHandle<()>,
}

impl WsSink {
    pub fn new(socket: WebSocket) -> Self {
        let (tx, mut rx) = socket.split();
        let open = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&open);
        let drain = tokio::spawn(async move {
            while let Some(msg) = rx.next().await {
                match msg {
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => debug!("ignoring client message"),
                }
            }
            flag.store(false, Ordering::Relaxed);
        });
        Self { tx, open, drain }
    }
}

impl FrameSink for WsSink {
    async fn send(&mut self, message: Bytes) -> Result<(), SinkError> {
        if !self.is_open() {
            return Err(SinkError::Disconnected);
        }
        match self.tx.send(Message::Binary(message.to_vec())).await {
            Ok(()) => Ok(()),
            Err(_) if !self.is_open() => Err(SinkError::Disconnected),
            Err(e) => {
                self.open.store(false, Ordering::Relaxed);
                Err(SinkError::Transport(e.to_string()))
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    async fn close(&mut self) {
        self.open.store(false, Ordering::Relaxed);
        let _ = self.tx.send(Message::Close(None)).await;
        let _ = self.tx.close().await;
    }
}

impl Drop for WsSink {
    fn drop(&mut self) {
        self.drain.abort();
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /share: upgrade, then stream length-prefixed JPEG frames.
async fn share<S: CameraSource>(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState<S>>,
) -> Response {
    info!(%peer, "stream client connecting");
    ws.on_upgrade(move |socket| async move {
        let mut sink = WsSink::new(socket);
        let session = StreamSession::new(
            &state.camera,
            state.encoder,
            state.interval,
            Arc::clone(&state.shutdown),
        );
        let report = session.run(&mut sink).await;
        info!(%peer, reason = ?report.reason, "stream client done");
    })
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Livestock camera streamer running" }))
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    uptime_secs: u64,
    streaming: bool,
}

/// GET /api/health
async fn health<S: CameraSource>(State(state): State<AppState<S>>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        streaming: state.camera.in_use(),
    })
}

pub fn router<S: CameraSource>(state: AppState<S>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/share", get(share::<S>))
        .route("/api/health", get(health::<S>))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Serve
// ---------------------------------------------------------------------------

/// Bind and serve until Ctrl-C. Raising `shutdown` ends any live session at
/// its next frame.
pub async fn run<S: CameraSource>(
    source: S,
    config: &StreamerConfig,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<()> {
    let state = AppState::new(source, config, Arc::clone(&shutdown));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "frame streamer listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        shutdown.store(true, Ordering::Relaxed);
    })
    .await
}
