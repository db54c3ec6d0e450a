//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const MIB: u64 = 1024 * 1024;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Recording engine defaults.
    pub recording: RecordingDefaults,

    /// Post-recording size budget.
    pub compression: CompressionConfig,

    /// Remote submission API.
    pub upload: UploadConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default recording parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Hard ceiling after which recording stops automatically.
    pub max_duration_secs: u64,

    /// Compositor and encoder frame rate.
    pub fps: u32,

    /// Target bitrate for the live encoder.
    pub encoder_bitrate_bps: u32,

    /// Initial crop width in logical pixels.
    pub crop_width: u32,

    /// Initial crop height in logical pixels.
    pub crop_height: u32,

    /// Height increment used by crop increase/decrease.
    pub crop_step_px: u32,

    /// Smallest allowed crop height.
    pub min_crop_height: u32,

    /// GStreamer source fragment producing the capture stream.
    pub capture_source: String,

    /// Physical-to-logical pixel ratio of the captured display.
    pub device_pixel_ratio: f64,

    /// GStreamer source fragment producing the microphone stream.
    pub microphone_source: String,

    /// Whether to request a microphone at all.
    pub microphone: bool,

    /// Microphone sample rate.
    pub audio_sample_rate: u32,

    /// Where finished segments are written before upload.
    pub segments_dir: PathBuf,
}

/// Compression thresholds and encoder limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Artifacts at or below this size pass through untouched.
    pub threshold_bytes: u64,

    /// Size the bitrate computation aims for.
    pub target_bytes: u64,

    /// Largest artifact the upload API accepts after compression.
    pub hard_limit_bytes: u64,

    /// Floor for the computed video bitrate.
    pub min_video_bitrate_bps: u64,

    /// Fixed audio bitrate.
    pub audio_bitrate_kbps: u64,

    /// Working resolution ceiling.
    pub max_width: u32,
    pub max_height: u32,

    /// Reduced resolution used for low bitrates and the retry pass.
    pub fallback_width: u32,
    pub fallback_height: u32,

    /// Output frame rate of the re-encode.
    pub fps: u32,

    /// Decode speed multiplier for the re-encode pass.
    pub playback_rate: f64,
}

/// Remote submission API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Base URL of the submission API.
    pub api_base: String,

    /// Timeout for the direct-upload request.
    pub request_timeout_secs: u64,

    /// Directory backing the session-scoped store.
    pub session_dir: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "swingcast=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            max_duration_secs: 300,
            fps: 30,
            encoder_bitrate_bps: 6_000_000,
            crop_width: 1280,
            crop_height: 720,
            crop_step_px: 25,
            min_crop_height: 180,
            capture_source: "ximagesrc use-damage=false show-pointer=true".to_string(),
            device_pixel_ratio: 1.0,
            microphone_source: "autoaudiosrc".to_string(),
            microphone: true,
            audio_sample_rate: 48000,
            segments_dir: data_dir().join("segments"),
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: 190 * MIB,
            target_bytes: 175 * MIB,
            hard_limit_bytes: 190 * MIB,
            min_video_bitrate_bps: 700_000,
            audio_bitrate_kbps: 128,
            max_width: 1920,
            max_height: 1080,
            fallback_width: 1280,
            fallback_height: 720,
            fps: 30,
            playback_rate: 2.0,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8787".to_string(),
            request_timeout_secs: 30,
            session_dir: data_dir().join("session"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("swingcast").join("config.json")
}

fn data_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("swingcast")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_upload_budget() {
        let config = CompressionConfig::default();
        assert_eq!(config.threshold_bytes, 190 * MIB);
        assert_eq!(config.target_bytes, 175 * MIB);
        assert!(config.target_bytes < config.hard_limit_bytes);
        assert_eq!(config.min_video_bitrate_bps, 700_000);
        assert_eq!(config.audio_bitrate_kbps, 128);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"recording":{"max_duration_secs":120}}"#).unwrap();
        assert_eq!(config.recording.max_duration_secs, 120);
        assert_eq!(config.recording.fps, 30);
        assert_eq!(config.logging.level, "info");
    }
}
