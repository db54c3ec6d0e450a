//! Recording session state: lifecycle states, duration warnings, segments.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of the recording engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingState {
    #[default]
    Idle,
    SelectingArea,
    Configured,
    Recording,
    Paused,
    /// Recording finished; the last segment is under review.
    Stopped,
}

/// User or system actions that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingAction {
    SelectArea,
    Configure,
    Start,
    Pause,
    Resume,
    Stop,
    Reset,
}

impl RecordingState {
    /// The state reached by applying `action`, or `None` if the transition
    /// is not in the table.
    pub fn next(self, action: RecordingAction) -> Option<RecordingState> {
        use RecordingAction as A;
        use RecordingState as S;
        match (self, action) {
            (S::Idle | S::Configured | S::Stopped, A::SelectArea) => Some(S::SelectingArea),
            (S::SelectingArea, A::Configure) => Some(S::Configured),
            (S::Configured, A::Start) => Some(S::Recording),
            (S::Recording, A::Pause) => Some(S::Paused),
            (S::Paused, A::Resume) => Some(S::Recording),
            (S::Recording | S::Paused, A::Stop) => Some(S::Stopped),
            (S::Stopped, A::Reset) => Some(S::Configured),
            (S::SelectingArea | S::Configured, A::Reset) => Some(S::Idle),
            _ => None,
        }
    }

    /// Whether capture hardware is held in this state.
    pub fn is_live(self) -> bool {
        matches!(self, RecordingState::Recording | RecordingState::Paused)
    }
}

/// Why a recording ended. All reasons share the same teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    Manual,
    /// The capture track ended outside our control (sharing closed).
    TrackEnded,
    /// The hard duration ceiling was reached.
    Timeout,
    Error,
}

/// Countdown warnings relative to the duration ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DurationWarning {
    ThreeMinutes,
    TwoMinutes,
    OneMinute,
    ThirtySeconds,
    LimitReached,
}

impl DurationWarning {
    /// Countdown warnings from earliest to latest.
    pub const COUNTDOWN: [DurationWarning; 4] = [
        DurationWarning::ThreeMinutes,
        DurationWarning::TwoMinutes,
        DurationWarning::OneMinute,
        DurationWarning::ThirtySeconds,
    ];

    pub fn remaining_secs(self) -> u64 {
        match self {
            DurationWarning::ThreeMinutes => 180,
            DurationWarning::TwoMinutes => 120,
            DurationWarning::OneMinute => 60,
            DurationWarning::ThirtySeconds => 30,
            DurationWarning::LimitReached => 0,
        }
    }

    /// Shortest ceiling for which this warning is meaningful.
    fn min_ceiling_secs(self) -> u64 {
        match self {
            DurationWarning::ThreeMinutes => 240,
            DurationWarning::TwoMinutes => 180,
            DurationWarning::OneMinute => 120,
            DurationWarning::ThirtySeconds => 60,
            DurationWarning::LimitReached => 0,
        }
    }

    pub fn message(self, ceiling_secs: u64) -> String {
        match self {
            DurationWarning::ThreeMinutes => "3 minutes remaining".to_string(),
            DurationWarning::TwoMinutes => "2 minutes remaining".to_string(),
            DurationWarning::OneMinute => "1 minute remaining".to_string(),
            DurationWarning::ThirtySeconds => "30 seconds remaining!".to_string(),
            DurationWarning::LimitReached => format!(
                "Recording stopped - {} minute limit reached",
                ceiling_secs / 60
            ),
        }
    }

    /// The warning in effect after `elapsed_secs` of a `ceiling_secs` take.
    pub fn for_elapsed(elapsed_secs: u64, ceiling_secs: u64) -> Option<DurationWarning> {
        if elapsed_secs >= ceiling_secs {
            return Some(DurationWarning::LimitReached);
        }
        Self::COUNTDOWN.iter().rev().copied().find(|w| {
            ceiling_secs >= w.min_ceiling_secs()
                && elapsed_secs >= ceiling_secs.saturating_sub(w.remaining_secs())
        })
    }
}

/// Any user-facing signal raised by the engine. Purely informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "detail")]
pub enum RecordingWarning {
    Duration(DurationWarning),
    NoMicrophone,
    CaptureUnavailable,
}

impl RecordingWarning {
    pub fn message(self, ceiling_secs: u64) -> String {
        match self {
            RecordingWarning::Duration(w) => w.message(ceiling_secs),
            RecordingWarning::NoMicrophone => {
                "No microphone detected - recording without audio".to_string()
            }
            RecordingWarning::CaptureUnavailable => {
                "Screen capture is required. Share the analyzer window to record.".to_string()
            }
        }
    }
}

/// A warning together with the active recording second it fired at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningEvent {
    pub at_secs: u64,
    pub warning: RecordingWarning,
}

/// One completed take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    /// Transient artifact location; removed on delete or after upload.
    pub path: PathBuf,
    pub duration_secs: u64,
    pub size_bytes: u64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

impl Segment {
    /// Remove the backing artifact. Missing files are not an error.
    pub fn release(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Aggregate state of one recording session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingSession {
    pub state: RecordingState,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_accum_ms: u64,
    pub duration_secs: u64,
    pub warning: Option<RecordingWarning>,
    pub warning_history: Vec<WarningEvent>,
    pub segments: Vec<Segment>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset per-take counters at the start of a take.
    pub fn begin_take(&mut self) {
        self.started_at = Some(Utc::now());
        self.paused_accum_ms = 0;
        self.duration_secs = 0;
        self.warning = None;
        self.warning_history.clear();
    }

    /// Record a warning if it differs from the one currently shown.
    pub fn raise(&mut self, warning: RecordingWarning) -> bool {
        if self.warning == Some(warning) {
            return false;
        }
        self.warning = Some(warning);
        self.warning_history.push(WarningEvent {
            at_secs: self.duration_secs,
            warning,
        });
        true
    }

    pub fn add_segment(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    pub fn segment(&self, id: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == id)
    }

    /// Remove a segment and release its artifact.
    pub fn delete_segment(&mut self, id: &str) -> std::io::Result<Option<Segment>> {
        let Some(index) = self.segments.iter().position(|s| s.id == id) else {
            return Ok(None);
        };
        let segment = self.segments.remove(index);
        segment.release()?;
        Ok(Some(segment))
    }

    /// Remove every segment and attempt to release every artifact. The
    /// first failure is returned after all of them were tried.
    pub fn clear_segments(&mut self) -> std::io::Result<()> {
        let mut first_error = None;
        for segment in self.segments.drain(..) {
            if let Err(e) = segment.release() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use RecordingAction as A;
        use RecordingState as S;
        assert_eq!(S::Idle.next(A::SelectArea), Some(S::SelectingArea));
        assert_eq!(S::SelectingArea.next(A::Configure), Some(S::Configured));
        assert_eq!(S::Configured.next(A::Start), Some(S::Recording));
        assert_eq!(S::Recording.next(A::Pause), Some(S::Paused));
        assert_eq!(S::Paused.next(A::Resume), Some(S::Recording));
        assert_eq!(S::Paused.next(A::Stop), Some(S::Stopped));
        assert_eq!(S::Recording.next(A::Stop), Some(S::Stopped));
        assert_eq!(S::Stopped.next(A::Reset), Some(S::Configured));
        assert_eq!(S::Idle.next(A::Start), None);
        assert_eq!(S::Stopped.next(A::Stop), None);
    }

    #[test]
    fn test_warning_thresholds_at_five_minutes() {
        let at = |s| DurationWarning::for_elapsed(s, 300);
        assert_eq!(at(60), None);
        assert_eq!(at(120), Some(DurationWarning::ThreeMinutes));
        assert_eq!(at(180), Some(DurationWarning::TwoMinutes));
        assert_eq!(at(239), Some(DurationWarning::TwoMinutes));
        assert_eq!(at(240), Some(DurationWarning::OneMinute));
        assert_eq!(at(270), Some(DurationWarning::ThirtySeconds));
        assert_eq!(at(300), Some(DurationWarning::LimitReached));
    }

    #[test]
    fn test_short_ceiling_skips_long_warnings() {
        assert_eq!(DurationWarning::for_elapsed(1, 90), None);
        assert_eq!(
            DurationWarning::for_elapsed(60, 90),
            Some(DurationWarning::ThirtySeconds)
        );
    }

    #[test]
    fn test_limit_message() {
        assert_eq!(
            DurationWarning::LimitReached.message(300),
            "Recording stopped - 5 minute limit reached"
        );
    }

    #[test]
    fn test_raise_deduplicates() {
        let mut session = RecordingSession::new();
        assert!(session.raise(RecordingWarning::NoMicrophone));
        assert!(!session.raise(RecordingWarning::NoMicrophone));
        assert_eq!(session.warning_history.len(), 1);
    }

    #[test]
    fn test_delete_missing_segment_is_none() {
        let mut session = RecordingSession::new();
        assert!(session.delete_segment("nope").unwrap().is_none());
    }

    fn segment_at(id: &str, path: PathBuf) -> Segment {
        Segment {
            id: id.to_string(),
            path,
            duration_secs: 1,
            size_bytes: 0,
            mime_type: "video/webm".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_clear_releases_all_despite_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be removed as a file.
        let stuck = dir.path().join("stuck.webm");
        std::fs::create_dir(&stuck).unwrap();
        let a = dir.path().join("a.webm");
        let b = dir.path().join("b.webm");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let mut session = RecordingSession::new();
        session.add_segment(segment_at("segment-1", stuck.clone()));
        session.add_segment(segment_at("segment-2", a.clone()));
        session.add_segment(segment_at("segment-3", b.clone()));

        assert!(session.clear_segments().is_err());
        assert!(session.segments.is_empty());
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(stuck.exists());
    }
}
