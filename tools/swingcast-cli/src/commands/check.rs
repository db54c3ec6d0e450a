//! Check system capabilities.

use swingcast_capture_engine::audio_monitor::MIC_TEST_DURATION;
use swingcast_capture_engine::{gstreamer_version, test_microphone, GstBackend, MicStatus};
use swingcast_common::config::{config_file_path, AppConfig};
use swingcast_compression::{FfmpegTranscoder, Transcoder};

pub async fn run(config: AppConfig, mic: bool) -> anyhow::Result<()> {
    println!("Swingcast System Check");
    println!("{}", "=".repeat(50));
    println!("Config: {}", config_file_path().display());

    let mut ready = true;
    match gstreamer_version() {
        Ok(version) => println!("[OK] {version}"),
        Err(e) => {
            println!("[FAIL] GStreamer: {e}");
            ready = false;
        }
    }

    if FfmpegTranscoder::new().is_available() {
        println!("[OK] ffmpeg and ffprobe found");
    } else {
        println!("[WARN] ffmpeg/ffprobe not found; large recordings cannot be compressed");
    }

    println!("[OK] Capture source: {}", config.recording.capture_source);
    println!("[OK] Segments: {}", config.recording.segments_dir.display());
    println!("[OK] API: {}", config.upload.api_base);

    if mic {
        println!();
        println!("Speak now - metering the microphone for {}s...", MIC_TEST_DURATION.as_secs());
        let backend = GstBackend::new(config.recording.clone());
        let reading = test_microphone(&backend, MIC_TEST_DURATION).await;
        match reading.status {
            MicStatus::Active => println!("[OK] Microphone working (peak level {})", reading.peak),
            MicStatus::Idle => println!("[WARN] Microphone opened but no sound detected"),
            MicStatus::Denied => println!("[WARN] Microphone permission denied; recordings will have no voice-over"),
            MicStatus::Error => println!("[WARN] Microphone unavailable; recordings will have no voice-over"),
        }
    }

    println!();
    if ready {
        println!("All required capabilities are available. Swingcast is ready.");
    } else {
        println!("Some required capabilities are missing. See above for fixes.");
    }
    Ok(())
}
