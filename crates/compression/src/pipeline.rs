//! Compression Pipeline: pass-through, budgeted re-encode, one retry.

use std::path::{Path, PathBuf};

use serde::Serialize;
use swingcast_common::config::CompressionConfig;
use swingcast_common::error::{SwingError, SwingResult};

use crate::plan::{format_file_size, needs_compression, CompressionPlan};
use crate::transcode::{FfmpegTranscoder, TranscodeJob, TranscodeProgress, Transcoder};

/// Progress callback for compression.
pub type ProgressCallback = Box<dyn Fn(CompressionProgress) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompressionStage {
    Probing,
    Compressing,
    /// Second pass at the reduced resolution.
    Retrying,
    Complete,
}

/// Compression progress report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionProgress {
    /// Processed playback time over total duration, capped at 99 until
    /// the output is accepted.
    pub percent: f64,
    pub current_size: u64,
    pub estimated_final_size: Option<u64>,
    pub stage: CompressionStage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompressionRequest {
    pub input: PathBuf,
    /// Where re-encoded output is written.
    pub output_dir: PathBuf,
    /// Duration to fall back on when the container carries none.
    pub fallback_duration_secs: Option<f64>,
}

impl CompressionRequest {
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            fallback_duration_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionOutcome {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub original_size_bytes: u64,
    /// False when the input was already within budget and returned as is.
    pub compressed: bool,
    pub passes: u32,
    pub plan: Option<CompressionPlan>,
}

/// Bring `request.input` under the configured size ceiling.
pub fn compress(
    request: &CompressionRequest,
    config: &CompressionConfig,
    transcoder: &mut dyn Transcoder,
    progress: Option<&ProgressCallback>,
) -> SwingResult<CompressionOutcome> {
    let report = |p: CompressionProgress| {
        if let Some(cb) = progress {
            cb(p);
        }
    };

    let original_size = match std::fs::metadata(&request.input) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SwingError::FileNotFound {
                path: request.input.clone(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(size = %format_file_size(original_size), "Checking segment size");

    if !needs_compression(original_size, config) {
        tracing::info!("Segment within budget; skipping compression");
        report(CompressionProgress {
            percent: 100.0,
            current_size: original_size,
            estimated_final_size: Some(original_size),
            stage: CompressionStage::Complete,
        });
        return Ok(CompressionOutcome {
            path: request.input.clone(),
            size_bytes: original_size,
            original_size_bytes: original_size,
            compressed: false,
            passes: 0,
            plan: None,
        });
    }

    if !transcoder.is_available() {
        return Err(SwingError::unsupported(format!(
            "{} transcoder not available (expected ffmpeg and ffprobe in PATH)",
            transcoder.name()
        )));
    }

    report(CompressionProgress {
        percent: 0.0,
        current_size: 0,
        estimated_final_size: None,
        stage: CompressionStage::Probing,
    });
    let info = transcoder.probe(&request.input)?;
    let duration_secs = match (info.duration_secs, request.fallback_duration_secs) {
        (Some(d), _) => d,
        (None, Some(d)) if d > 0.0 => {
            tracing::warn!(fallback_secs = d, "Container has no duration; using recorded duration");
            d
        }
        _ => return Err(SwingError::compression("Could not determine video duration")),
    };

    let mut plan = CompressionPlan::new(config, duration_secs);
    tracing::info!(
        duration_secs,
        video_bitrate_bps = plan.video_bitrate_bps,
        reduced = plan.reduced,
        "Compression plan"
    );
    std::fs::create_dir_all(&request.output_dir)?;

    let mut passes = 0;
    // Size of the last pass that finished over the limit.
    let mut oversized = None;
    loop {
        passes += 1;
        let stage = if passes == 1 {
            CompressionStage::Compressing
        } else {
            CompressionStage::Retrying
        };
        let job = TranscodeJob {
            input: request.input.clone(),
            output: output_path(&request.input, &request.output_dir, plan.reduced),
            plan,
            output_size: plan.output_size((info.width, info.height)),
            fps: config.fps,
            playback_rate: config.playback_rate,
            has_audio: info.has_audio,
        };
        tracing::info!(
            pass = passes,
            width = job.output_size.0,
            height = job.output_size.1,
            output = %job.output.display(),
            "Re-encoding segment"
        );

        let mut on_progress = |p: TranscodeProgress| report(pass_progress(p, duration_secs, stage));
        if let Err(e) = transcoder.transcode(&job, &mut on_progress) {
            discard(&job.output);
            if passes == 1 && plan.can_reduce(config) {
                tracing::warn!(error = %e, "Re-encode failed; retrying at reduced resolution");
                plan = plan.reduce(config);
                continue;
            }
            if let Some(size) = oversized {
                tracing::warn!(error = %e, size, "Reduced re-encode failed after an oversized pass");
                return Err(SwingError::too_large(size, config.hard_limit_bytes));
            }
            return Err(e);
        }

        let size = std::fs::metadata(&job.output)?.len();
        tracing::info!(
            pass = passes,
            size = %format_file_size(size),
            reduction_pct = (1.0 - size as f64 / original_size as f64) * 100.0,
            "Re-encode finished"
        );
        if size <= config.hard_limit_bytes {
            report(CompressionProgress {
                percent: 100.0,
                current_size: size,
                estimated_final_size: Some(size),
                stage: CompressionStage::Complete,
            });
            return Ok(CompressionOutcome {
                path: job.output,
                size_bytes: size,
                original_size_bytes: original_size,
                compressed: true,
                passes,
                plan: Some(plan),
            });
        }

        discard(&job.output);
        oversized = Some(size);
        if passes == 1 && plan.can_reduce(config) {
            tracing::warn!(size, limit = config.hard_limit_bytes, "Output still too large; retrying at reduced resolution");
            plan = plan.reduce(config);
            continue;
        }
        return Err(SwingError::too_large(size, config.hard_limit_bytes));
    }
}

/// Run [`compress`] with ffmpeg on the blocking pool.
pub async fn compress_with_ffmpeg(
    request: CompressionRequest,
    config: CompressionConfig,
    progress: Option<ProgressCallback>,
) -> SwingResult<CompressionOutcome> {
    tokio::task::spawn_blocking(move || {
        let mut transcoder = FfmpegTranscoder::new();
        compress(&request, &config, &mut transcoder, progress.as_ref())
    })
    .await
    .map_err(|e| SwingError::compression(format!("Compression task failed: {e}")))?
}

fn pass_progress(p: TranscodeProgress, duration_secs: f64, stage: CompressionStage) -> CompressionProgress {
    let percent = (p.processed_secs / duration_secs * 100.0).clamp(0.0, 99.0);
    let estimated_final_size = (p.processed_secs > 0.0 && p.output_bytes > 0)
        .then(|| (p.output_bytes as f64 / p.processed_secs * duration_secs) as u64);
    CompressionProgress {
        percent,
        current_size: p.output_bytes,
        estimated_final_size,
        stage,
    }
}

fn output_path(input: &Path, dir: &Path, reduced: bool) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "segment".to_string());
    let suffix = if reduced { "-compressed-reduced" } else { "-compressed" };
    dir.join(format!("{stem}{suffix}.webm"))
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove rejected output");
        }
    }
}
