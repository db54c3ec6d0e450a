//! Session-scoped key/value store shared with the submission queue.
//!
//! Each key is one file under the session directory. The queue writes
//! `selectedVideo` (a stream URL) and `selectedSubmission` (JSON) before
//! an analysis starts; a successful upload clears both.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use swingcast_capture_model::submission::{resolve_submission_id, SubmissionContext};
use swingcast_common::error::{SwingError, SwingResult};

pub const SELECTED_SUBMISSION: &str = "selectedSubmission";
pub const SELECTED_VIDEO: &str = "selectedVideo";

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> SwingResult<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(SwingError::validation(format!("Invalid session key: {key:?}")));
        }
        Ok(self.dir.join(key))
    }

    pub fn get(&self, key: &str) -> SwingResult<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn set(&self, key: &str, value: &str) -> SwingResult<()> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(path, value)?;
        Ok(())
    }

    /// Removing a missing key is not an error.
    pub fn remove(&self, key: &str) -> SwingResult<()> {
        match std::fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// The stored submission record. Unparseable data reads as absent.
    pub fn selected_submission(&self) -> SwingResult<Option<SubmissionContext>> {
        let Some(raw) = self.get(SELECTED_SUBMISSION)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(ctx) => Ok(Some(ctx)),
            Err(err) => {
                tracing::warn!(error = %err, "Ignoring malformed selectedSubmission");
                Ok(None)
            }
        }
    }

    pub fn set_selected_submission(&self, ctx: &SubmissionContext) -> SwingResult<()> {
        self.set(SELECTED_SUBMISSION, &serde_json::to_string(ctx)?)
    }

    pub fn selected_video(&self) -> SwingResult<Option<String>> {
        Ok(self
            .get(SELECTED_VIDEO)?
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty()))
    }

    /// Id to tag the upload with: stored record, then stream URL, then
    /// `"unknown"`.
    pub fn submission_id(&self) -> SwingResult<String> {
        let stored = self.selected_submission()?;
        let video = self.selected_video()?;
        Ok(resolve_submission_id(stored.as_ref(), video.as_deref()))
    }

    pub fn clear_selection(&self) -> SwingResult<()> {
        self.remove(SELECTED_VIDEO)?;
        self.remove(SELECTED_SUBMISSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swingcast_capture_model::submission::UNKNOWN_SUBMISSION;

    #[test]
    fn test_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session"));
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.set("../escape", "x").is_err());
        assert!(store.get("").is_err());
    }

    #[test]
    fn test_submission_id_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert_eq!(store.submission_id().unwrap(), UNKNOWN_SUBMISSION);

        store
            .set(SELECTED_VIDEO, "https://api.example.com/api/video/stream/key-7\n")
            .unwrap();
        assert_eq!(store.submission_id().unwrap(), "key-7");

        store
            .set_selected_submission(&SubmissionContext::new("sub_1"))
            .unwrap();
        assert_eq!(store.submission_id().unwrap(), "sub_1");
    }

    #[test]
    fn test_malformed_submission_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.set(SELECTED_SUBMISSION, "{not json").unwrap();
        assert_eq!(store.selected_submission().unwrap(), None);
    }

    #[test]
    fn test_clear_selection() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.set(SELECTED_VIDEO, "https://x/api/video/stream/a").unwrap();
        store
            .set_selected_submission(&SubmissionContext::new("a"))
            .unwrap();
        store.set("other", "kept").unwrap();
        store.clear_selection().unwrap();
        assert_eq!(store.selected_video().unwrap(), None);
        assert_eq!(store.selected_submission().unwrap(), None);
        assert_eq!(store.get("other").unwrap().as_deref(), Some("kept"));
    }
}
