pub mod check;
pub mod compress;
pub mod packages;
pub mod record;
pub mod select;
pub mod upload;

use std::io::Write;

use swingcast_compression::{format_file_size, CompressionProgress, ProgressCallback};

/// Single-line progress display for compression passes.
pub fn progress_printer() -> ProgressCallback {
    Box::new(|p: CompressionProgress| {
        let estimate = p
            .estimated_final_size
            .map(format_file_size)
            .unwrap_or_else(|| "-".to_string());
        print!(
            "\r  {:?}: {:.0}% ({} written, ~{} final)  ",
            p.stage,
            p.percent,
            format_file_size(p.current_size),
            estimate
        );
        std::io::stdout().flush().ok();
    })
}
