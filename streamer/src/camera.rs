use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use lms_common::config::CameraConfig;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// One uncompressed RGB8 frame.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("camera is already streaming to another client")]
    Busy,
    #[error("frame read failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("capture stream ended")]
    Ended,
}

/// An opened camera.
pub trait CaptureDevice: Send {
    fn read_frame(&mut self) -> impl Future<Output = Result<RawFrame, CaptureError>> + Send;

    /// Give the device back. Called once, by [`CameraLease`] on drop.
    fn release(&mut self);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "camera"
    }
}

/// Opens capture devices on demand.
pub trait CameraSource: Send + Sync + 'static {
    type Device: CaptureDevice + 'static;

    fn open(&self) -> impl Future<Output = Result<Self::Device, CaptureError>> + Send;
}

/// A camera that at most one connection can hold at a time.
pub struct Camera<S> {
    source: S,
    permit: Arc<Semaphore>,
}

impl<S: CameraSource> Camera<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    /// Open the device for exclusive use. Fails with [`CaptureError::Busy`]
    /// while another lease is alive.
    pub async fn acquire(&self) -> Result<CameraLease<S::Device>, CaptureError> {
        let permit = Arc::clone(&self.permit)
            .try_acquire_owned()
            .map_err(|_| CaptureError::Busy)?;
        let device = self.source.open().await?;
        info!(device = device.name(), "camera acquired");
        Ok(CameraLease {
            device: Some(device),
            _permit: permit,
        })
    }

    pub fn in_use(&self) -> bool {
        self.permit.available_permits() == 0
    }
}

/// Exclusive access to an open device. Dropping the lease releases the
/// device exactly once, then frees the camera for the next connection.
pub struct CameraLease<D: CaptureDevice> {
    device: Option<D>,
    _permit: OwnedSemaphorePermit,
}

impl<D: CaptureDevice> CameraLease<D> {
    pub async fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        match self.device.as_mut() {
            Some(device) => device.read_frame().await,
            None => Err(CaptureError::Ended),
        }
    }
}

impl<D: CaptureDevice> Drop for CameraLease<D> {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.release();
            info!(device = device.name(), "camera released");
        }
    }
}

// ── ffmpeg ───────────────────────────────────────────────────────────────

/// Captures from a V4L2 (or any ffmpeg-readable) input.
#[derive(Debug, Clone)]
pub struct FfmpegSource {
    ffmpeg_path: String,
    device: String,
    input_format: String,
    width: u32,
    height: u32,
    framerate: u32,
    settle: Duration,
}

impl FfmpegSource {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            device: config.device.clone(),
            input_format: config.input_format.clone(),
            width: config.width,
            height: config.height,
            framerate: config.framerate,
            settle: Duration::from_millis(config.open_settle_ms),
        }
    }

    fn command(&self) -> Command {
        let size = format!("{}x{}", self.width, self.height);
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(["-f", &self.input_format])
            .args(["-framerate", &self.framerate.to_string()])
            .args(["-video_size", &size])
            .args(["-i", &self.device])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-s", &size, "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl CameraSource for FfmpegSource {
    type Device = FfmpegCamera;

    async fn open(&self) -> Result<FfmpegCamera, CaptureError> {
        let mut child = self.command().spawn().map_err(|e| {
            CaptureError::Unavailable(format!("failed to spawn {}: {e}", self.ffmpeg_path))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Unavailable("ffmpeg stdout not captured".into()))?;

        // Drain stderr so ffmpeg never blocks on a full pipe, and so device
        // errors show up in our logs.
        if let Some(stderr) = child.stderr.take() {
            let device = self.device.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.is_empty() {
                        warn!(device, "[ffmpeg] {line}");
                    }
                }
                debug!(device, "ffmpeg stderr stream ended");
            });
        }

        // Give ffmpeg a moment to fail on a missing device.
        tokio::time::sleep(self.settle).await;
        match child.try_wait() {
            Ok(Some(status)) => {
                return Err(CaptureError::Unavailable(format!(
                    "ffmpeg exited immediately with {status} (device {})",
                    self.device
                )));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "cannot check ffmpeg status"),
        }

        info!(
            device = self.device,
            width = self.width,
            height = self.height,
            framerate = self.framerate,
            pid = child.id(),
            "ffmpeg capture started"
        );

        Ok(FfmpegCamera {
            child,
            stdout,
            device: self.device.clone(),
            width: self.width,
            height: self.height,
        })
    }
}

pub struct FfmpegCamera {
    child: Child,
    stdout: ChildStdout,
    device: String,
    width: u32,
    height: u32,
}

impl CaptureDevice for FfmpegCamera {
    async fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        let mut rgb = vec![0u8; self.width as usize * self.height as usize * 3];
        match self.stdout.read_exact(&mut rgb).await {
            Ok(_) => Ok(RawFrame {
                width: self.width,
                height: self.height,
                rgb,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(CaptureError::Ended),
            Err(e) => Err(CaptureError::Read(e)),
        }
    }

    fn release(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(device = self.device, error = %e, "ffmpeg already exited");
        }
    }

    fn name(&self) -> &str {
        &self.device
    }
}

// ── test pattern ─────────────────────────────────────────────────────────

/// Moving colour gradient, for running the streamer without a camera.
#[derive(Debug, Clone)]
pub struct TestPatternSource {
    width: u32,
    height: u32,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl CameraSource for TestPatternSource {
    type Device = TestPatternCamera;

    async fn open(&self) -> Result<TestPatternCamera, CaptureError> {
        Ok(TestPatternCamera {
            width: self.width,
            height: self.height,
            tick: 0,
        })
    }
}

pub struct TestPatternCamera {
    width: u32,
    height: u32,
    tick: u32,
}

impl CaptureDevice for TestPatternCamera {
    async fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        let (w, h) = (self.width, self.height);
        let mut rgb = Vec::with_capacity(w as usize * h as usize * 3);
        for y in 0..h {
            for x in 0..w {
                rgb.push(((x + self.tick) * 255 / w.max(1)) as u8);
                rgb.push((y * 255 / h.max(1)) as u8);
                rgb.push((self.tick % 256) as u8);
            }
        }
        self.tick = (self.tick + 1) % w.max(1);
        Ok(RawFrame {
            width: w,
            height: h,
            rgb,
        })
    }

    fn release(&mut self) {}

    fn name(&self) -> &str {
        "test-pattern"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pattern_frames_have_expected_size() {
        let camera = Camera::new(TestPatternSource::new(32, 24));
        let mut lease = camera.acquire().await.unwrap();
        let frame = lease.read_frame().await.unwrap();
        assert_eq!(frame.width, 32);
        assert_eq!(frame.height, 24);
        assert_eq!(frame.rgb.len(), 32 * 24 * 3);
        let next = lease.read_frame().await.unwrap();
        assert_ne!(frame.rgb, next.rgb, "pattern should move between frames");
    }

    #[tokio::test]
    async fn second_lease_is_refused_until_first_dropped() {
        let camera = Camera::new(TestPatternSource::new(4, 4));
        let lease = camera.acquire().await.unwrap();
        assert!(camera.in_use());
        assert!(matches!(camera.acquire().await, Err(CaptureError::Busy)));
        drop(lease);
        assert!(!camera.in_use());
        assert!(camera.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn missing_ffmpeg_binary_is_unavailable() {
        let config = CameraConfig {
            ffmpeg_path: "/nonexistent/ffmpeg-binary".into(),
            open_settle_ms: 0,
            ..CameraConfig::default()
        };
        let camera = Camera::new(FfmpegSource::new(&config));
        assert!(matches!(camera.acquire().await, Err(CaptureError::Unavailable(_))));
        assert!(!camera.in_use(), "failed open must not hold the camera");
    }
}
