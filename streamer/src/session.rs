use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use lms_common::frame::Frame;
use tracing::{debug, info, warn};

use crate::camera::{Camera, CameraLease, CameraSource};
use crate::encoder::FrameEncoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    CameraUnavailable,
    CaptureFailed,
    EncodeFailed,
    Transport,
    ClientDisconnected,
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("client disconnected")]
    Disconnected,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Where framed messages go. The WebSocket is the production sink.
pub trait FrameSink: Send {
    fn send(&mut self, message: Bytes) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// `false` once the peer has gone away or the sink was closed.
    fn is_open(&self) -> bool;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub reason: CloseReason,
}

/// One viewer connection. The camera lease is dropped on every exit path,
/// which releases the device.
pub struct StreamSession<'a, S: CameraSource> {
    camera: &'a Camera<S>,
    encoder: FrameEncoder,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    state: SessionState,
    frames_sent: u64,
    bytes_sent: u64,
}

impl<'a, S: CameraSource> StreamSession<'a, S> {
    pub fn new(
        camera: &'a Camera<S>,
        encoder: FrameEncoder,
        interval: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            camera,
            encoder,
            interval,
            shutdown,
            state: SessionState::Connecting,
            frames_sent: 0,
            bytes_sent: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to completion. Never fails; the outcome is in the
    /// report.
    pub async fn run<K: FrameSink>(mut self, sink: &mut K) -> SessionReport {
        let reason = match self.camera.acquire().await {
            Ok(mut lease) => {
                self.transition(SessionState::Streaming);
                let reason = self.stream(&mut lease, sink).await;
                self.transition(SessionState::Closing);
                drop(lease);
                reason
            }
            Err(e) => {
                warn!(error = %e, "camera unavailable, closing connection");
                self.transition(SessionState::Closing);
                CloseReason::CameraUnavailable
            }
        };

        if sink.is_open() {
            sink.close().await;
        }
        self.transition(SessionState::Closed);

        info!(
            frames = self.frames_sent,
            bytes = self.bytes_sent,
            reason = ?reason,
            "stream session closed"
        );
        SessionReport {
            frames_sent: self.frames_sent,
            bytes_sent: self.bytes_sent,
            reason,
        }
    }

    async fn stream<K: FrameSink>(
        &mut self,
        lease: &mut CameraLease<S::Device>,
        sink: &mut K,
    ) -> CloseReason {
        let mut seq: u64 = 0;
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return CloseReason::Shutdown;
            }
            if !sink.is_open() {
                return CloseReason::ClientDisconnected;
            }

            let raw = match lease.read_frame().await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, "no frame captured, closing connection");
                    return CloseReason::CaptureFailed;
                }
            };

            let jpeg = match self.encoder.encode(&raw) {
                Ok(jpeg) => jpeg,
                Err(e) => {
                    warn!(error = %e, "frame encoding failed, closing connection");
                    return CloseReason::EncodeFailed;
                }
            };

            let frame = Frame::new(jpeg, Utc::now().timestamp_millis(), seq);
            let message = frame.to_message();
            let message_len = message.len() as u64;
            match sink.send(message).await {
                Ok(()) => {
                    self.frames_sent += 1;
                    self.bytes_sent += message_len;
                    debug!(seq, bytes = frame.len(), "sent frame");
                }
                Err(SinkError::Disconnected) => return CloseReason::ClientDisconnected,
                Err(e) => {
                    warn!(error = %e, "websocket send failed");
                    return CloseReason::Transport;
                }
            }
            seq += 1;

            tokio::time::sleep(self.interval).await;
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}
