//! Record one take.

use std::path::PathBuf;
use std::sync::Arc;

use swingcast_capture_engine::{EngineSettings, GstBackend, RecordingEngine, TokioClock};
use swingcast_capture_model::crop::width_for_height;
use swingcast_capture_model::session::RecordingState;
use swingcast_common::config::AppConfig;
use swingcast_compression::{compress_with_ffmpeg, format_file_size, needs_compression, CompressionRequest};

pub struct RecordArgs {
    pub output: Option<PathBuf>,
    pub max_secs: Option<u64>,
    pub fps: Option<u32>,
    pub crop_height: Option<u32>,
    pub offset: (f64, f64),
    pub microphone: bool,
    pub compress: bool,
    pub debug_compositor: bool,
}

pub async fn run(config: AppConfig, args: RecordArgs) -> anyhow::Result<()> {
    let mut defaults = config.recording.clone();
    if let Some(dir) = args.output {
        defaults.segments_dir = dir;
    }
    if let Some(secs) = args.max_secs {
        defaults.max_duration_secs = secs;
    }
    if let Some(fps) = args.fps {
        defaults.fps = fps;
    }
    if let Some(height) = args.crop_height {
        defaults.crop_height = height.max(defaults.min_crop_height);
        defaults.crop_width = width_for_height(defaults.crop_height);
    }
    defaults.microphone = args.microphone;

    let mut settings = EngineSettings::from_defaults(&defaults);
    settings.debug = args.debug_compositor;
    let engine = RecordingEngine::new(
        Arc::new(GstBackend::new(defaults.clone())),
        settings,
        Arc::new(TokioClock::new()),
    );

    engine.begin_selection()?;
    engine.edit_crop(|crop| crop.set_offset(args.offset.0, args.offset.1))?;
    let crop = engine.configure()?;
    println!("Recording {}x{} crop", crop.width, crop.height);
    println!("  Source: {}", defaults.capture_source);
    println!("  Output: {}", defaults.segments_dir.display());
    println!("  Limit: {}s", defaults.max_duration_secs);
    println!();

    engine.start().await?;
    println!("Press Ctrl+C to stop recording...");

    let mut status = engine.subscribe();
    let mut last_warning = None;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                println!();
                engine.stop().await?;
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if current.warning_text != last_warning {
                    if let Some(text) = &current.warning_text {
                        println!("\n  {text}");
                    }
                    last_warning = current.warning_text.clone();
                }
                if current.state == RecordingState::Stopped {
                    break;
                }
                print!(
                    "\r  {:?} {}s / {}s  mic: {:?}  ",
                    current.state, current.duration_secs, current.max_duration_secs, current.mic_status
                );
            }
        }
    }

    if args.debug_compositor {
        if let Some(snapshot) = engine.compositor_snapshot() {
            println!("\nLast compositor decision:\n{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    let Some(segment) = engine.segments().pop() else {
        anyhow::bail!("Recording produced no segment");
    };
    println!(
        "\nSaved {} ({}s, {})",
        segment.path.display(),
        segment.duration_secs,
        format_file_size(segment.size_bytes)
    );

    if args.compress && needs_compression(segment.size_bytes, &config.compression) {
        let dir = segment
            .path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| defaults.segments_dir.clone());
        let mut request = CompressionRequest::new(&segment.path, dir);
        request.fallback_duration_secs = Some(segment.duration_secs as f64);
        let outcome = compress_with_ffmpeg(request, config.compression.clone(), Some(super::progress_printer())).await?;
        println!("\nCompressed to {} ({})", outcome.path.display(), format_file_size(outcome.size_bytes));
    }

    Ok(())
}
