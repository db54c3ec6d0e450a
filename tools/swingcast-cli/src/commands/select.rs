//! Store the submission being analyzed.

use swingcast_capture_model::submission::SubmissionContext;
use swingcast_common::config::AppConfig;
use swingcast_upload::{SessionStore, SELECTED_VIDEO};

pub fn run(
    config: AppConfig,
    submission: String,
    player: Option<String>,
    video: Option<String>,
) -> anyhow::Result<()> {
    let store = SessionStore::new(&config.upload.session_dir);
    let mut ctx = SubmissionContext::new(submission);
    ctx.player_name = player;
    store.set_selected_submission(&ctx)?;
    match video {
        Some(url) => store.set(SELECTED_VIDEO, &url)?,
        None => store.remove(SELECTED_VIDEO)?,
    }
    println!(
        "Selected submission {} ({})",
        ctx.submission_id,
        store.dir().display()
    );
    Ok(())
}
