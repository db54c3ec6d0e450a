//! Bring a recording under the upload limit.

use std::path::PathBuf;

use swingcast_common::config::AppConfig;
use swingcast_compression::{compress_with_ffmpeg, format_file_size, CompressionRequest};

pub async fn run(
    config: AppConfig,
    input: PathBuf,
    output: Option<PathBuf>,
    duration: Option<f64>,
) -> anyhow::Result<()> {
    if !input.is_file() {
        anyhow::bail!("Input not found: {}", input.display());
    }
    let dir = output
        .or_else(|| input.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    println!("Compressing {}", input.display());
    println!(
        "  Limit: {} (target {})",
        format_file_size(config.compression.hard_limit_bytes),
        format_file_size(config.compression.target_bytes)
    );

    let mut request = CompressionRequest::new(&input, dir);
    request.fallback_duration_secs = duration;
    let outcome = compress_with_ffmpeg(request, config.compression, Some(super::progress_printer())).await?;

    println!();
    if outcome.compressed {
        println!(
            "Compressed {} -> {} in {} pass(es): {}",
            format_file_size(outcome.original_size_bytes),
            format_file_size(outcome.size_bytes),
            outcome.passes,
            outcome.path.display()
        );
    } else {
        println!(
            "Already within the limit ({}), nothing to do",
            format_file_size(outcome.size_bytes)
        );
    }
    Ok(())
}
