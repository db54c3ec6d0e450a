//! Submission context handed over by the queue page before analysis.

use serde::{Deserialize, Serialize};

/// Fallback id when neither a stored submission nor a stream URL exists.
pub const UNKNOWN_SUBMISSION: &str = "unknown";

/// Coaching focus areas the player asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmissionPreferences {
    pub notes: Option<String>,
    pub wants_bat_advice: bool,
    pub wants_drills: bool,
    pub wants_mechanics: bool,
}

/// The `selectedSubmission` record. Older queue pages stored the id as `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionContext {
    #[serde(alias = "id")]
    pub submission_id: String,
    #[serde(default, alias = "athleteName")]
    pub player_name: Option<String>,
    #[serde(flatten)]
    pub preferences: SubmissionPreferences,
}

impl SubmissionContext {
    pub fn new(submission_id: impl Into<String>) -> Self {
        Self {
            submission_id: submission_id.into(),
            player_name: None,
            preferences: SubmissionPreferences::default(),
        }
    }
}

/// Last non-empty path segment of a stream URL such as
/// `https://api.example.com/api/video/stream/<key>`.
pub fn submission_id_from_stream_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .filter(|segment| !segment.contains(':'))
        .map(str::to_string)
}

/// Resolve the id used to tag an upload. Never fails.
pub fn resolve_submission_id(
    stored: Option<&SubmissionContext>,
    stream_url: Option<&str>,
) -> String {
    stored
        .map(|s| s.submission_id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .or_else(|| stream_url.and_then(submission_id_from_stream_url))
        .unwrap_or_else(|| UNKNOWN_SUBMISSION.to_string())
}
