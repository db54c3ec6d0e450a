//! Upload a finished analysis.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use swingcast_common::config::AppConfig;
use swingcast_upload::{
    SessionStore, UploadOrchestrator, UploadProgress, UploadProgressCallback, UploadRequest,
};

pub struct UploadArgs {
    pub file: PathBuf,
    pub package: Option<String>,
    pub duration: f64,
    pub coach: bool,
    pub api_base: Option<String>,
    pub delete_after: bool,
}

pub async fn run(config: AppConfig, args: UploadArgs) -> anyhow::Result<()> {
    let mut upload = config.upload.clone();
    if let Some(base) = args.api_base {
        upload.api_base = base;
    }
    let store = SessionStore::new(&upload.session_dir);
    let orchestrator = UploadOrchestrator::new(&upload, store)?;

    println!("Uploading {}", args.file.display());
    println!("  Submission: {}", orchestrator.store().submission_id()?);
    println!("  API: {}", upload.api_base);

    let request = UploadRequest {
        segment_path: args.file,
        duration_secs: args.duration,
        workout_package: args.package,
        coach: args.coach,
    };
    let progress: UploadProgressCallback = Arc::new(|p: UploadProgress| {
        print!("\r  Uploading video... {}%  ", p.percent);
        std::io::stdout().flush().ok();
    });
    let outcome = orchestrator.upload(&request, Some(progress)).await?;

    println!("\nUpload complete! Video is processing.");
    if args.delete_after {
        std::fs::remove_file(&request.segment_path)?;
        tracing::info!(path = %request.segment_path.display(), "Released uploaded segment");
    }
    println!("Return to {}", outcome.queue_path());
    Ok(())
}
