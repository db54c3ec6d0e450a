//! Bitrate and resolution planning.

use serde::Serialize;
use swingcast_common::config::CompressionConfig;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

/// Below this multiple of the minimum bitrate the working resolution drops.
pub const LOW_BITRATE_FACTOR: f64 = 1.5;

/// Whether an artifact of `size_bytes` has to be re-encoded.
pub fn needs_compression(size_bytes: u64, config: &CompressionConfig) -> bool {
    size_bytes > config.threshold_bytes
}

/// Video bitrate that fits `target_bytes` over `duration_secs` after the
/// audio track's share, never below `min_bps`.
pub fn video_bitrate_bps(target_bytes: u64, duration_secs: f64, audio_kbps: u64, min_bps: u64) -> u64 {
    if !(duration_secs.is_finite() && duration_secs > 0.0) {
        return min_bps;
    }
    let total_bits = target_bytes as f64 * 8.0;
    let audio_bits = audio_kbps as f64 * 1000.0 * duration_secs;
    let video_bps = ((total_bits - audio_bits) / duration_secs).floor();
    if video_bps <= min_bps as f64 {
        min_bps
    } else {
        video_bps as u64
    }
}

/// Largest even size with the source's aspect ratio that fits `bounds`.
/// Sources already inside the bounds are never upscaled.
pub fn fit_within(source: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (w, h) = (source.0.max(1) as f64, source.1.max(1) as f64);
    let scale = (bounds.0 as f64 / w).min(bounds.1 as f64 / h).min(1.0);
    let even = |v: f64| ((v.floor() as u32) & !1).max(2);
    (even(w * scale), even(h * scale))
}

/// Encoder parameters for one re-encode pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompressionPlan {
    /// Duration read from the artifact's own metadata.
    pub duration_secs: f64,
    pub video_bitrate_bps: u64,
    pub audio_bitrate_bps: u64,
    /// Resolution ceiling for this pass.
    pub bounds: (u32, u32),
    /// Whether the ceiling is the reduced fallback resolution.
    pub reduced: bool,
}

impl CompressionPlan {
    pub fn new(config: &CompressionConfig, duration_secs: f64) -> Self {
        let video_bitrate_bps = video_bitrate_bps(
            config.target_bytes,
            duration_secs,
            config.audio_bitrate_kbps,
            config.min_video_bitrate_bps,
        );
        let reduced = (video_bitrate_bps as f64) < config.min_video_bitrate_bps as f64 * LOW_BITRATE_FACTOR;
        let plan = Self {
            duration_secs,
            video_bitrate_bps,
            audio_bitrate_bps: config.audio_bitrate_kbps * 1000,
            bounds: (config.max_width, config.max_height),
            reduced: false,
        };
        if reduced {
            plan.reduce(config)
        } else {
            plan
        }
    }

    /// The same plan at the fallback resolution.
    pub fn reduce(self, config: &CompressionConfig) -> Self {
        Self {
            bounds: (config.fallback_width, config.fallback_height),
            reduced: true,
            ..self
        }
    }

    /// Whether a retry at a lower resolution is still possible.
    pub fn can_reduce(&self, config: &CompressionConfig) -> bool {
        !self.reduced && self.bounds.0 > config.fallback_width
    }

    pub fn output_size(&self, source: (u32, u32)) -> (u32, u32) {
        fit_within(source, self.bounds)
    }
}

/// Human-readable size in bytes, KB, or MB (binary units).
pub fn format_file_size(bytes: u64) -> String {
    if bytes < KIB {
        format!("{bytes} bytes")
    } else if bytes < MIB {
        format!("{:.2} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{:.2} MB", bytes as f64 / MIB as f64)
    }
}
