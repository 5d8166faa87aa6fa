use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::telemetry::{default_vitals_rules, PlausibilityRule, VitalsStatus};

/// Configuration shared by both binaries. Every section has defaults, so a
/// binary only needs the sections it actually reads.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub streamer: StreamerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub vitals: VitalsConfig,
    #[serde(default)]
    pub predict: PredictConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Fixed delay between frames. Not deadline-corrected.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraSourceKind {
    Ffmpeg,
    TestPattern,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_source")]
    pub source: CameraSourceKind,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_camera_device")]
    pub device: String,
    #[serde(default = "default_input_format")]
    pub input_format: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    /// How long ffmpeg gets to fail on a bad device before the camera is
    /// considered open.
    #[serde(default = "default_open_settle_ms")]
    pub open_settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_vitals_serial")]
    pub vitals: SerialSourceConfig,
    #[serde(default = "default_motion_serial")]
    pub motion: SerialSourceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialSourceConfig {
    pub port: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Wait after opening while the microcontroller reboots.
    #[serde(default = "default_boot_delay_ms")]
    pub boot_delay_ms: u64,
    /// Pause after a malformed line or read error.
    #[serde(default = "default_error_pause_ms")]
    pub error_pause_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VitalsConfig {
    #[serde(default = "default_baseline_status")]
    pub baseline_status: VitalsStatus,
    #[serde(default = "default_vitals_rules")]
    pub rules: Vec<PlausibilityRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_training_csv")]
    pub training_csv: PathBuf,
    #[serde(default = "default_testing_csv")]
    pub testing_csv: PathBuf,
    #[serde(default = "default_forest_trees")]
    pub forest_trees: usize,
    #[serde(default = "default_knn_neighbors")]
    pub knn_neighbors: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            frame_interval_ms: default_frame_interval_ms(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_camera_source(),
            ffmpeg_path: default_ffmpeg_path(),
            device: default_camera_device(),
            input_format: default_input_format(),
            width: default_width(),
            height: default_height(),
            framerate: default_framerate(),
            open_settle_ms: default_open_settle_ms(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            vitals: default_vitals_serial(),
            motion: default_motion_serial(),
        }
    }
}

impl SerialSourceConfig {
    fn with_port(port: &str) -> Self {
        Self {
            port: port.into(),
            enabled: true,
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            boot_delay_ms: default_boot_delay_ms(),
            error_pause_ms: default_error_pause_ms(),
        }
    }
}

impl Default for VitalsConfig {
    fn default() -> Self {
        Self {
            baseline_status: default_baseline_status(),
            rules: default_vitals_rules(),
        }
    }
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            training_csv: default_training_csv(),
            testing_csv: default_testing_csv(),
            forest_trees: default_forest_trees(),
            knn_neighbors: default_knn_neighbors(),
            seed: default_seed(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a loop spin or an encoder fail later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streamer.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid("streamer.frame_interval_ms must be > 0".into()));
        }
        if !(1..=100).contains(&self.streamer.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "streamer.jpeg_quality must be within 1..=100, got {}",
                self.streamer.jpeg_quality
            )));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid("camera.width and camera.height must be > 0".into()));
        }
        for (name, source) in [("vitals", &self.serial.vitals), ("motion", &self.serial.motion)] {
            if source.baud_rate == 0 {
                return Err(ConfigError::Invalid(format!("serial.{name}.baud_rate must be > 0")));
            }
            if source.read_timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "serial.{name}.read_timeout_ms must be > 0"
                )));
            }
            if source.error_pause_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "serial.{name}.error_pause_ms must be > 0"
                )));
            }
        }
        if self.predict.forest_trees == 0 || self.predict.knn_neighbors == 0 {
            return Err(ConfigError::Invalid(
                "predict.forest_trees and predict.knn_neighbors must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0:8000".into()
}
fn default_frame_interval_ms() -> u64 {
    33
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_camera_source() -> CameraSourceKind {
    CameraSourceKind::Ffmpeg
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".into()
}
fn default_camera_device() -> String {
    "/dev/video0".into()
}
fn default_input_format() -> String {
    "v4l2".into()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_framerate() -> u32 {
    30
}
fn default_open_settle_ms() -> u64 {
    500
}
fn default_vitals_serial() -> SerialSourceConfig {
    SerialSourceConfig::with_port("/dev/ttyUSB0")
}
fn default_motion_serial() -> SerialSourceConfig {
    SerialSourceConfig::with_port("/dev/ttyUSB1")
}
fn default_true() -> bool {
    true
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_read_timeout_ms() -> u64 {
    1000
}
fn default_boot_delay_ms() -> u64 {
    2000
}
fn default_error_pause_ms() -> u64 {
    1000
}
fn default_baseline_status() -> VitalsStatus {
    VitalsStatus::Normal
}
fn default_training_csv() -> PathBuf {
    PathBuf::from("Dataset/Training.csv")
}
fn default_testing_csv() -> PathBuf {
    PathBuf::from("Dataset/Testing.csv")
}
fn default_forest_trees() -> usize {
    100
}
fn default_knn_neighbors() -> usize {
    5
}
fn default_seed() -> u64 {
    42
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Adjustment, Comparison, VitalsField};

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.streamer.listen_addr, "0.0.0.0:8000");
        assert_eq!(config.streamer.frame_interval_ms, 33);
        assert_eq!(config.camera.source, CameraSourceKind::Ffmpeg);
        assert_eq!(config.serial.vitals.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.motion.port, "/dev/ttyUSB1");
        assert_eq!(config.serial.motion.baud_rate, 115_200);
        assert_eq!(config.vitals.baseline_status, VitalsStatus::Normal);
        assert_eq!(config.vitals.rules, default_vitals_rules());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let text = r#"
[camera]
source = "test-pattern"
width = 320

[serial.vitals]
port = "/dev/ttyACM0"
error_pause_ms = 250
"#;
        let config = Config::parse(text).unwrap();
        assert_eq!(config.camera.source, CameraSourceKind::TestPattern);
        assert_eq!(config.camera.width, 320);
        assert_eq!(config.camera.height, 480);
        assert_eq!(config.serial.vitals.port, "/dev/ttyACM0");
        assert_eq!(config.serial.vitals.error_pause_ms, 250);
        assert_eq!(config.serial.vitals.boot_delay_ms, 2000);
        assert_eq!(config.serial.motion.port, "/dev/ttyUSB1");
    }

    #[test]
    fn custom_rule_table() {
        let text = r#"
[vitals]
baseline_status = "UNSET"

[[vitals.rules]]
name = "very-high"
when = [{ field = "heart_rate", op = "ge", value = 140 }]
then = [
  { action = "subtract", field = "heart_rate", amount = 40 },
  { action = "status", status = "HIGH_HEART_RATE" },
]
"#;
        let config = Config::parse(text).unwrap();
        assert_eq!(config.vitals.baseline_status, VitalsStatus::Unset);
        assert_eq!(config.vitals.rules.len(), 1);
        let rule = &config.vitals.rules[0];
        assert_eq!(rule.name, "very-high");
        assert_eq!(rule.when[0].op, Comparison::Ge);
        assert_eq!(
            rule.then[0],
            Adjustment::Subtract {
                field: VitalsField::HeartRate,
                amount: 40
            }
        );
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(matches!(
            Config::parse("[streamer]\njpeg_quality = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("[streamer]\nframe_interval_ms = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("[serial.motion]\nport = \"x\"\nbaud_rate = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(Config::parse("[camera]\nsource = \"webcam\"\n"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn zero_error_pause_is_rejected() {
        let err = Config::parse("[serial.vitals]\nport = \"x\"\nerror_pause_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("serial.vitals.error_pause_ms"), "{err}");
        assert!(Config::parse("[serial.vitals]\nport = \"x\"\nerror_pause_ms = 1\n").is_ok());
    }

    #[test]
    fn load_from_file() {
        let dir = std::env::temp_dir().join("lms_config_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[monitor]\nlisten_addr = \"127.0.0.1:9000\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.monitor.listen_addr, "127.0.0.1:9000");

        let missing = Config::load(&dir.join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::ReadFile(..))));
    }
}
