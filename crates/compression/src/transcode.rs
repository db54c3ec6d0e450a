//! Probing and re-encoding through ffprobe/ffmpeg.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

use serde::Deserialize;
use swingcast_common::error::{SwingError, SwingResult};

use crate::plan::CompressionPlan;

/// What the re-encode needs to know about its input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    /// Container duration, if the muxer wrote one.
    pub duration_secs: Option<f64>,
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
}

/// One re-encode pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub plan: CompressionPlan,
    pub output_size: (u32, u32),
    pub fps: u32,
    /// Input read speed as a multiple of real time.
    pub playback_rate: f64,
    pub has_audio: bool,
}

/// Incremental report from a running pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TranscodeProgress {
    /// Playback time of the input processed so far.
    pub processed_secs: f64,
    /// Bytes written to the output so far.
    pub output_bytes: u64,
    pub done: bool,
}

/// A re-encoding backend.
pub trait Transcoder: Send {
    fn probe(&self, input: &Path) -> SwingResult<MediaInfo>;

    /// Run one pass, reporting progress as it goes.
    fn transcode(
        &mut self,
        job: &TranscodeJob,
        on_progress: &mut dyn FnMut(TranscodeProgress),
    ) -> SwingResult<()>;

    fn is_available(&self) -> bool;

    fn name(&self) -> &str;
}

/// [`Transcoder`] shelling out to `ffprobe` and `ffmpeg` on `PATH`.
#[derive(Debug, Default)]
pub struct FfmpegTranscoder;

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self
    }
}

impl Transcoder for FfmpegTranscoder {
    fn probe(&self, input: &Path) -> SwingResult<MediaInfo> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration:stream=codec_type,width,height",
                "-of",
                "json",
            ])
            .arg(input)
            .output()
            .map_err(|e| SwingError::compression(format!("Failed to start ffprobe: {e}")))?;
        if !output.status.success() {
            return Err(SwingError::compression(format!(
                "ffprobe failed (status {}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_probe(&String::from_utf8_lossy(&output.stdout))
    }

    fn transcode(
        &mut self,
        job: &TranscodeJob,
        on_progress: &mut dyn FnMut(TranscodeProgress),
    ) -> SwingResult<()> {
        let args = ffmpeg_args(job);
        tracing::debug!(args = ?args, "Running ffmpeg");
        tracing::info!(
            width = job.output_size.0,
            height = job.output_size.1,
            video_bitrate_bps = job.plan.video_bitrate_bps,
            "Starting ffmpeg pass"
        );
        let mut command = Command::new("ffmpeg");
        command.args(&args);
        run_ffmpeg(command, on_progress)
    }

    fn is_available(&self) -> bool {
        command_exists("ffmpeg") && command_exists("ffprobe")
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Kills and reaps the child unless it was waited on.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        tracing::warn!(pid = self.child.id(), "Killing abandoned ffmpeg process");
        if let Err(e) = self.child.kill() {
            tracing::debug!(error = %e, "ffmpeg already exited");
        }
        if let Err(e) = self.child.wait() {
            tracing::warn!(error = %e, "Failed to reap ffmpeg");
        }
    }
}

/// Run a command that writes `-progress pipe:1` key=value lines to stdout.
fn run_ffmpeg(mut command: Command, on_progress: &mut dyn FnMut(TranscodeProgress)) -> SwingResult<()> {
    let child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SwingError::compression(format!("Failed to start ffmpeg: {e}")))?;
    let mut guard = ChildGuard {
        child,
        reaped: false,
    };
    tracing::debug!(pid = guard.child.id(), "ffmpeg process started");

    let stdout = guard
        .child
        .stdout
        .take()
        .ok_or_else(|| SwingError::compression("Failed to capture ffmpeg stdout"))?;
    let stderr = guard
        .child
        .stderr
        .take()
        .ok_or_else(|| SwingError::compression("Failed to capture ffmpeg stderr"))?;

    // ffmpeg blocks on a full stderr pipe.
    let stderr_task = std::thread::spawn(move || -> String {
        let mut output = String::new();
        match BufReader::new(stderr).read_to_string(&mut output) {
            Ok(_) => output,
            Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
        }
    });

    let mut state = ProgressState::default();
    let mut last_advance = std::time::Instant::now();
    let mut last_secs = 0.0f64;
    for line in BufReader::new(stdout).lines() {
        let line =
            line.map_err(|e| SwingError::compression(format!("Failed reading ffmpeg progress: {e}")))?;
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        if !state.update(key, value) {
            continue;
        }
        on_progress(state.report());
        if state.out_time_secs > last_secs + 0.001 {
            last_secs = state.out_time_secs;
            last_advance = std::time::Instant::now();
        } else if last_advance.elapsed().as_secs() >= 10 {
            tracing::warn!(out_time_secs = state.out_time_secs, "No ffmpeg progress for 10s");
            last_advance = std::time::Instant::now();
        }
    }

    let status = guard
        .wait()
        .map_err(|e| SwingError::compression(format!("Failed to wait on ffmpeg: {e}")))?;
    let stderr_output = stderr_task
        .join()
        .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());
    if !status.success() {
        return Err(SwingError::compression(format!(
            "ffmpeg re-encode failed (status {status}): {}",
            stderr_output.trim()
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_probe(json: &str) -> SwingResult<MediaInfo> {
    let probe: ProbeOutput = serde_json::from_str(json)?;
    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| SwingError::compression("Input has no video stream"))?;
    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(SwingError::compression("Input video has no dimensions")),
    };
    // WebM written by live muxers may report "N/A".
    let duration_secs = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);
    Ok(MediaInfo {
        duration_secs,
        width,
        height,
        has_audio: probe
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio")),
    })
}

fn ffmpeg_args(job: &TranscodeJob) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-hide_banner", "-loglevel", "error", "-nostats", "-progress", "pipe:1"]
        .into_iter()
        .map(String::from)
        .collect();
    if job.playback_rate.is_finite() && job.playback_rate > 0.0 {
        args.push("-readrate".to_string());
        args.push(format!("{}", job.playback_rate));
    }
    args.push("-i".to_string());
    args.push(job.input.display().to_string());
    args.extend(["-map".to_string(), "0:v:0".to_string()]);
    args.push("-vf".to_string());
    args.push(format!(
        "scale={}:{}:flags=bicubic,fps={}",
        job.output_size.0,
        job.output_size.1,
        job.fps.max(1)
    ));
    args.extend(
        [
            "-c:v",
            "libvpx-vp9",
            "-deadline",
            "good",
            "-cpu-used",
            "4",
            "-row-mt",
            "1",
        ]
        .map(String::from),
    );
    args.push("-b:v".to_string());
    args.push(job.plan.video_bitrate_bps.to_string());
    if job.has_audio {
        args.extend(["-map", "0:a:0", "-c:a", "libopus"].map(String::from));
        args.push("-b:a".to_string());
        args.push(job.plan.audio_bitrate_bps.to_string());
    } else {
        args.push("-an".to_string());
    }
    args.push(job.output.display().to_string());
    args
}

fn command_exists(binary: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    total_size: u64,
    complete: bool,
}

impl ProgressState {
    /// Fold one `key=value` line in. Returns true at the end of a block.
    fn update(&mut self, key: &str, value: &str) -> bool {
        match key {
            // Despite the name, ffmpeg reports microseconds here too.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "total_size" => {
                if let Ok(bytes) = value.parse::<u64>() {
                    self.total_size = bytes;
                }
            }
            "progress" => {
                self.complete = value == "end";
                return true;
            }
            _ => {}
        }
        false
    }

    fn report(&self) -> TranscodeProgress {
        TranscodeProgress {
            processed_secs: self.out_time_secs,
            output_bytes: self.total_size,
            done: self.complete,
        }
    }
}
