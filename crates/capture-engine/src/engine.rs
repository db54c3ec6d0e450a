//! Recording Engine.
//!
//! Owns the capture stream, the optional microphone, the compositor and
//! the encoder for one take at a time, and drives the state machine in
//! [`RecordingState`]. Every way a take can end (manual stop, the capture
//! track ending, the duration ceiling, an encoder failure, shutdown) goes
//! through [`RecordingEngine::stop_with`], which releases all resources in
//! one pass.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use swingcast_capture_model::{
    CropConfig, CropRectangle, DurationWarning, RecordingAction, RecordingSession,
    RecordingState, RecordingWarning, Segment, StopReason,
};
use swingcast_common::clock::{Clock, RecordingClock};
use swingcast_common::config::RecordingDefaults;
use swingcast_common::error::{SwingError, SwingResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audio_monitor::{AudioLevelMonitor, MicStatus};
use crate::compositor::{CropSource, FrameCompositor};
use crate::media::{
    CaptureStream, EncoderSettings, MediaBackend, MediaEncoder, MicrophoneStream,
};
use crate::mixer::AudioMixer;
use crate::sync::CropReceiver;

/// How long to wait for the encoder to finalize before releasing anyway.
pub const ENCODER_FINISH_TIMEOUT: Duration = Duration::from_secs(10);

const DURATION_TICK: Duration = Duration::from_secs(1);
const AUDIO_PUMP_INTERVAL: Duration = Duration::from_millis(100);

/// Clock backed by the tokio timer, so paused test time drives it too.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Engine parameters, usually derived from [`RecordingDefaults`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_duration_secs: u64,
    pub fps: u32,
    pub encoder_bitrate_bps: u32,
    pub microphone: bool,
    pub audio_sample_rate: u32,
    pub segments_dir: PathBuf,
    pub crop: CropRectangle,
    pub crop_step_px: u32,
    /// Record compositor snapshots for debugging.
    pub debug: bool,
}

impl EngineSettings {
    pub fn from_defaults(defaults: &RecordingDefaults) -> Self {
        Self {
            max_duration_secs: defaults.max_duration_secs,
            fps: defaults.fps.max(1),
            encoder_bitrate_bps: defaults.encoder_bitrate_bps,
            microphone: defaults.microphone,
            audio_sample_rate: defaults.audio_sample_rate,
            segments_dir: defaults.segments_dir.clone(),
            crop: CropRectangle::centered(defaults.crop_width, defaults.crop_height),
            crop_step_px: defaults.crop_step_px,
            debug: false,
        }
    }
}

/// What the UI needs to render the recorder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub state: RecordingState,
    pub duration_secs: u64,
    pub max_duration_secs: u64,
    pub warning: Option<RecordingWarning>,
    pub warning_text: Option<String>,
    pub mic_status: MicStatus,
    pub segments: usize,
}

struct LiveTake {
    capture: Arc<dyn CaptureStream>,
    microphone: Option<Arc<dyn MicrophoneStream>>,
    encoder: Arc<tokio::sync::Mutex<Box<dyn MediaEncoder>>>,
    compositor: Arc<Mutex<FrameCompositor>>,
    clock: RecordingClock,
    paused: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    session: RecordingSession,
    crop: CropConfig,
    broadcast: Option<CropReceiver>,
    starting: bool,
    cancel_start: bool,
    live: Option<LiveTake>,
    monitor: AudioLevelMonitor,
}

impl Inner {
    /// Copy the live take's clock into the session aggregate.
    fn sync_clock(&mut self, clock: &dyn Clock) -> u64 {
        if let Some(live) = self.live.as_ref() {
            self.session.duration_secs = live.clock.active_secs(clock);
            self.session.paused_accum_ms = live.clock.paused_accum_ms();
        }
        self.session.duration_secs
    }
}

struct Shared {
    backend: Arc<dyn MediaBackend>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<EngineStatus>,
    segment_counter: AtomicU64,
}

/// The recording state machine. Cheap to clone; clones share one engine.
#[derive(Clone)]
pub struct RecordingEngine {
    shared: Arc<Shared>,
}

impl RecordingEngine {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        settings: EngineSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let session = RecordingSession::new();
        let status = EngineStatus {
            state: session.state,
            duration_secs: 0,
            max_duration_secs: settings.max_duration_secs,
            warning: None,
            warning_text: None,
            mic_status: MicStatus::Idle,
            segments: 0,
        };
        let inner = Inner {
            session,
            crop: CropConfig::new(settings.crop, settings.crop_step_px),
            broadcast: None,
            starting: false,
            cancel_start: false,
            live: None,
            monitor: AudioLevelMonitor::new(),
        };
        Self {
            shared: Arc::new(Shared {
                backend,
                clock,
                settings,
                inner: Mutex::new(inner),
                status_tx: watch::channel(status).0,
                segment_counter: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> RecordingState {
        self.shared.inner.lock().session.state
    }

    /// Snapshot of the session aggregate.
    pub fn session(&self) -> RecordingSession {
        self.shared.inner.lock().session.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn status(&self) -> EngineStatus {
        self.shared.status_tx.borrow().clone()
    }

    pub fn crop(&self) -> CropConfig {
        self.shared.inner.lock().crop.clone()
    }

    /// Edit the crop configuration. Not allowed while a take is live.
    pub fn edit_crop<R>(&self, edit: impl FnOnce(&mut CropConfig) -> R) -> SwingResult<R> {
        let mut inner = self.shared.inner.lock();
        if inner.session.state.is_live() || inner.starting {
            return Err(SwingError::invalid_state(inner.session.state, "edit the crop"));
        }
        Ok(edit(&mut inner.crop))
    }

    /// Drive the crop from an analyzer surface instead of the local config.
    pub fn attach_broadcast(&self, receiver: CropReceiver) {
        tracing::info!(channel = receiver.channel_key(), "Crop follows broadcast");
        self.shared.inner.lock().broadcast = Some(receiver);
    }

    pub fn begin_selection(&self) -> SwingResult<()> {
        self.transition(RecordingAction::SelectArea)
    }

    /// Apply the current crop preset and arm the engine.
    pub fn configure(&self) -> SwingResult<CropRectangle> {
        let mut inner = self.shared.inner.lock();
        let next = next_state(&inner.session, RecordingAction::Configure)?;
        let applied = inner.crop.apply(None);
        inner.session.state = next;
        tracing::info!(
            width = applied.width,
            height = applied.height,
            offset_x = applied.offset_x,
            offset_y = applied.offset_y,
            "Crop applied"
        );
        self.publish(&inner);
        Ok(applied)
    }

    /// Return to a startable state: another take after a stop, or back to
    /// idle while still configuring.
    pub fn reset(&self) -> SwingResult<()> {
        let mut inner = self.shared.inner.lock();
        let next = next_state(&inner.session, RecordingAction::Reset)?;
        if next == RecordingState::Idle {
            inner.crop.reset();
        }
        inner.session.state = next;
        self.publish(&inner);
        Ok(())
    }

    /// Start a take. Video is mandatory; the microphone is best effort.
    pub async fn start(&self) -> SwingResult<()> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.starting || inner.live.is_some() {
                return Err(SwingError::invalid_state(inner.session.state, "start"));
            }
            next_state(&inner.session, RecordingAction::Start)?;
            inner.starting = true;
            inner.cancel_start = false;
        }

        match self.start_take().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut inner = self.shared.inner.lock();
                inner.starting = false;
                if matches!(e, SwingError::Permission { .. }) {
                    inner.session.raise(RecordingWarning::CaptureUnavailable);
                }
                self.publish(&inner);
                Err(e)
            }
        }
    }

    async fn start_take(&self) -> SwingResult<()> {
        let shared = &self.shared;
        let settings = &shared.settings;

        let capture = shared.backend.acquire_capture().await.map_err(|e| {
            tracing::warn!(error = %e, "Screen capture unavailable");
            e
        })?;

        let mut mic_error = None;
        let microphone = if settings.microphone {
            match shared.backend.acquire_microphone().await {
                Ok(mic) => Some(mic),
                Err(e) => {
                    tracing::warn!(error = %e, "Recording without audio");
                    mic_error = Some(e);
                    None
                }
            }
        } else {
            None
        };

        let release = |capture: &Arc<dyn CaptureStream>,
                       microphone: &Option<Arc<dyn MicrophoneStream>>| {
            capture.stop();
            if let Some(mic) = microphone {
                mic.stop();
            }
        };

        let (crop, broadcast) = {
            let mut inner = shared.inner.lock();
            if inner.cancel_start {
                drop(inner);
                release(&capture, &microphone);
                return Err(SwingError::capture("recording start was cancelled"));
            }
            // Lock the preset against the geometry the stream negotiated.
            let geometry = capture.geometry();
            inner.crop.apply(geometry.as_ref());
            (
                inner.crop.clone(),
                inner.broadcast.as_ref().map(CropReceiver::resubscribe),
            )
        };

        let geometry = capture.geometry();
        let output = FrameCompositor::output_size_for(&crop, geometry.as_ref());
        let mixer = AudioMixer::new(
            settings.audio_sample_rate,
            capture.has_audio(),
            microphone.is_some(),
        );
        let index = shared.segment_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let encoder_settings = EncoderSettings {
            width: output.0 & !1,
            height: output.1 & !1,
            fps: settings.fps,
            video_bitrate_bps: settings.encoder_bitrate_bps,
            audio_sample_rate: mixer.has_sources().then_some(settings.audio_sample_rate),
            output_path: settings.segments_dir.join(format!(
                "take-{}-{index}.webm",
                chrono::Utc::now().timestamp_millis()
            )),
        };

        let encoder = std::fs::create_dir_all(&settings.segments_dir)
            .map_err(SwingError::from)
            .and_then(|_| shared.backend.create_encoder(&encoder_settings))
            .and_then(|mut encoder| match encoder.start() {
                Ok(()) => Ok(encoder),
                Err(e) => {
                    encoder.abort();
                    Err(e)
                }
            });
        let encoder = match encoder {
            Ok(encoder) => encoder,
            Err(e) => {
                tracing::error!(error = %e, "Encoder failed to start");
                release(&capture, &microphone);
                return Err(e);
            }
        };

        let source = match broadcast {
            Some(receiver) => CropSource::Broadcast(receiver),
            None => CropSource::Applied(crop),
        };
        let compositor = Arc::new(Mutex::new(FrameCompositor::new(
            source,
            (encoder_settings.width, encoder_settings.height),
            settings.debug,
        )));
        let encoder = Arc::new(tokio::sync::Mutex::new(encoder));
        let paused = Arc::new(AtomicBool::new(false));

        let mut inner = shared.inner.lock();
        if inner.cancel_start {
            drop(inner);
            if let Ok(mut encoder) = encoder.try_lock() {
                encoder.abort();
            }
            release(&capture, &microphone);
            return Err(SwingError::capture("recording start was cancelled"));
        }

        let weak = Arc::downgrade(shared);
        let tasks = vec![
            spawn_compositor(
                weak.clone(),
                capture.clone(),
                compositor.clone(),
                encoder.clone(),
                paused.clone(),
            ),
            spawn_audio_pump(
                weak.clone(),
                capture.clone(),
                microphone.clone(),
                encoder.clone(),
                paused.clone(),
                mixer,
            ),
            spawn_duration_ticker(weak.clone()),
            spawn_track_watcher(weak, capture.clone()),
        ];

        inner.session.begin_take();
        inner.session.state = RecordingState::Recording;
        match (&microphone, mic_error) {
            (Some(mic), _) => inner.monitor.attach(mic.clone()),
            (None, Some(e)) => {
                inner.monitor.report_failure(&e);
                inner.session.raise(RecordingWarning::NoMicrophone);
            }
            (None, None) => {}
        }
        inner.live = Some(LiveTake {
            capture,
            microphone,
            encoder,
            compositor,
            clock: RecordingClock::start(shared.clock.as_ref()),
            paused,
            tasks,
        });
        inner.starting = false;
        tracing::info!(
            width = encoder_settings.width,
            height = encoder_settings.height,
            audio = encoder_settings.audio_sample_rate.is_some(),
            output = %encoder_settings.output_path.display(),
            "Recording started"
        );
        self.publish(&inner);
        Ok(())
    }

    pub async fn pause(&self) -> SwingResult<()> {
        let encoder = {
            let mut inner = self.shared.inner.lock();
            let next = next_state(&inner.session, RecordingAction::Pause)?;
            let clock = self.shared.clock.clone();
            let live = inner
                .live
                .as_mut()
                .ok_or_else(|| SwingError::invalid_state(RecordingState::Stopped, "pause"))?;
            live.paused.store(true, Ordering::SeqCst);
            live.clock.pause(clock.as_ref());
            let encoder = live.encoder.clone();
            inner.sync_clock(clock.as_ref());
            inner.session.state = next;
            self.publish(&inner);
            encoder
        };
        encoder.lock().await.pause()?;
        tracing::info!("Recording paused");
        Ok(())
    }

    pub async fn resume(&self) -> SwingResult<()> {
        let (encoder, paused) = {
            let inner = self.shared.inner.lock();
            next_state(&inner.session, RecordingAction::Resume)?;
            let live = inner
                .live
                .as_ref()
                .ok_or_else(|| SwingError::invalid_state(RecordingState::Stopped, "resume"))?;
            (live.encoder.clone(), live.paused.clone())
        };
        encoder.lock().await.resume()?;

        let mut inner = self.shared.inner.lock();
        let next = next_state(&inner.session, RecordingAction::Resume)?;
        let clock = self.shared.clock.clone();
        if let Some(live) = inner.live.as_mut() {
            live.clock.resume(clock.as_ref());
            paused.store(false, Ordering::SeqCst);
        }
        inner.sync_clock(clock.as_ref());
        inner.session.state = next;
        self.publish(&inner);
        tracing::info!("Recording resumed");
        Ok(())
    }

    /// Stop the current take. Safe from any state; returns `None` when
    /// nothing was recording.
    pub async fn stop(&self) -> SwingResult<Option<Segment>> {
        self.stop_with(StopReason::Manual).await
    }

    /// Stop and release everything, e.g. when the recorder is closed.
    pub async fn shutdown(&self) -> SwingResult<()> {
        self.stop_with(StopReason::Manual).await?;
        self.shared.inner.lock().monitor.reset();
        Ok(())
    }

    /// The single teardown path.
    pub async fn stop_with(&self, reason: StopReason) -> SwingResult<Option<Segment>> {
        teardown(&self.shared, reason).await
    }

    pub fn segments(&self) -> Vec<Segment> {
        self.shared.inner.lock().session.segments.clone()
    }

    /// Delete a segment and its artifact.
    pub fn delete_segment(&self, id: &str) -> SwingResult<Option<Segment>> {
        let mut inner = self.shared.inner.lock();
        let removed = inner.session.delete_segment(id)?;
        self.publish(&inner);
        Ok(removed)
    }

    pub fn clear_segments(&self) -> SwingResult<()> {
        let mut inner = self.shared.inner.lock();
        inner.session.clear_segments()?;
        self.publish(&inner);
        Ok(())
    }

    /// Latest compositor snapshot of the live take, if debugging.
    pub fn compositor_snapshot(&self) -> Option<crate::compositor::CompositorSnapshot> {
        let inner = self.shared.inner.lock();
        let live = inner.live.as_ref()?;
        let compositor = live.compositor.lock();
        compositor.diagnostics().last_snapshot().cloned()
    }

    fn transition(&self, action: RecordingAction) -> SwingResult<()> {
        let mut inner = self.shared.inner.lock();
        let next = next_state(&inner.session, action)?;
        tracing::debug!(from = ?inner.session.state, to = ?next, ?action, "State transition");
        inner.session.state = next;
        self.publish(&inner);
        Ok(())
    }

    fn publish(&self, inner: &Inner) {
        publish(&self.shared, inner);
    }
}

fn next_state(session: &RecordingSession, action: RecordingAction) -> SwingResult<RecordingState> {
    session
        .state
        .next(action)
        .ok_or_else(|| SwingError::invalid_state(session.state, format!("{action:?}").to_lowercase()))
}

fn publish(shared: &Shared, inner: &Inner) {
    let ceiling = shared.settings.max_duration_secs;
    shared.status_tx.send_replace(EngineStatus {
        state: inner.session.state,
        duration_secs: inner.session.duration_secs,
        max_duration_secs: ceiling,
        warning: inner.session.warning,
        warning_text: inner.session.warning.map(|w| w.message(ceiling)),
        mic_status: inner.monitor.reading().status,
        segments: inner.session.segments.len(),
    });
}

async fn teardown(shared: &Arc<Shared>, reason: StopReason) -> SwingResult<Option<Segment>> {
    let (mut live, duration_secs) = {
        let mut inner = shared.inner.lock();
        if inner.starting {
            inner.cancel_start = true;
        }
        // Fold a pause still in progress into the totals.
        if let Some(live) = inner.live.as_mut() {
            live.clock.resume(shared.clock.as_ref());
        }
        let duration = inner.sync_clock(shared.clock.as_ref());
        let Some(live) = inner.live.take() else {
            return Ok(None);
        };
        inner.monitor.detach();
        (live, duration)
    };

    tracing::info!(?reason, duration_secs, "Stopping recording");
    for task in live.tasks.drain(..) {
        task.abort();
    }

    let finished = {
        let mut encoder = live.encoder.lock().await;
        match tokio::time::timeout(ENCODER_FINISH_TIMEOUT, encoder.finish()).await {
            Ok(Ok(artifact)) => Ok(artifact),
            Ok(Err(e)) => {
                encoder.abort();
                Err(e)
            }
            Err(_) => {
                encoder.abort();
                Err(SwingError::encoding("encoder did not finalize in time"))
            }
        }
    };

    live.capture.stop();
    if let Some(mic) = &live.microphone {
        mic.stop();
    }
    live.compositor.lock().clear();

    let mut inner = shared.inner.lock();
    if let Some(next) = inner.session.state.next(RecordingAction::Stop) {
        inner.session.state = next;
    }
    let result = match finished {
        Ok(artifact) => {
            let index = shared.segment_counter.load(Ordering::SeqCst);
            let segment = Segment {
                id: format!("segment-{index}"),
                path: artifact.path,
                duration_secs,
                size_bytes: artifact.size_bytes,
                mime_type: artifact.mime_type,
                created_at: chrono::Utc::now(),
            };
            tracing::info!(
                id = %segment.id,
                size_bytes = segment.size_bytes,
                duration_secs,
                "Segment recorded"
            );
            inner.session.add_segment(segment.clone());
            Ok(Some(segment))
        }
        Err(e) => {
            tracing::error!(error = %e, "Recording could not be finalized");
            Err(e)
        }
    };
    publish(shared, &inner);
    result
}

/// Spawn teardown detached so it is never aborted by its own cleanup.
fn request_stop(shared: Arc<Shared>, reason: StopReason) {
    tokio::spawn(async move {
        if let Err(e) = teardown(&shared, reason).await {
            tracing::warn!(?reason, error = %e, "Automatic stop finished with error");
        }
    });
}

fn spawn_compositor(
    shared: Weak<Shared>,
    capture: Arc<dyn CaptureStream>,
    compositor: Arc<Mutex<FrameCompositor>>,
    encoder: Arc<tokio::sync::Mutex<Box<dyn MediaEncoder>>>,
    paused: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(fps) = shared.upgrade().map(|s| s.settings.fps) else {
            return;
        };
        let mut ticker = tokio::time::interval(Duration::from_millis(1000 / fps.max(1) as u64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sequence = 0u64;
        loop {
            ticker.tick().await;
            if paused.load(Ordering::SeqCst) {
                continue;
            }
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let now_ms = shared.clock.now_ms();
            let frame = {
                let mut compositor = compositor.lock();
                let outcome = compositor.draw_frame(capture.as_ref(), now_ms);
                if !outcome.is_fresh() {
                    continue;
                }
                sequence += 1;
                compositor.current_frame(sequence)
            };
            if let Err(e) = encoder.lock().await.push_video(&frame) {
                tracing::error!(error = %e, "Encoder rejected frame");
                request_stop(shared, StopReason::Error);
                return;
            }
        }
    })
}

fn spawn_audio_pump(
    shared: Weak<Shared>,
    capture: Arc<dyn CaptureStream>,
    microphone: Option<Arc<dyn MicrophoneStream>>,
    encoder: Arc<tokio::sync::Mutex<Box<dyn MediaEncoder>>>,
    paused: Arc<AtomicBool>,
    mut mixer: AudioMixer,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !mixer.has_sources() {
            return;
        }
        let mut ticker = tokio::time::interval(AUDIO_PUMP_INTERVAL);
        loop {
            ticker.tick().await;
            for chunk in capture.drain_audio() {
                mixer.push_capture(&chunk);
            }
            if let Some(mic) = &microphone {
                for chunk in mic.drain_chunks() {
                    mixer.push_microphone(&chunk);
                }
            }
            if paused.load(Ordering::SeqCst) {
                mixer.discard();
                continue;
            }
            let Some(chunk) = mixer.mix() else {
                continue;
            };
            if let Err(e) = encoder.lock().await.push_audio(&chunk) {
                tracing::warn!(error = %e, "Dropping audio chunk");
                if shared.upgrade().is_none() {
                    return;
                }
            }
        }
    })
}

fn spawn_duration_ticker(shared: Weak<Shared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DURATION_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let ceiling = shared.settings.max_duration_secs;
            let limit_reached = {
                let mut inner = shared.inner.lock();
                if inner.live.is_none() {
                    return;
                }
                let elapsed = inner.sync_clock(shared.clock.as_ref());
                let warning = DurationWarning::for_elapsed(elapsed, ceiling);
                if let Some(w) = warning {
                    if inner.session.raise(RecordingWarning::Duration(w)) {
                        tracing::info!(elapsed, warning = %w.message(ceiling), "Duration warning");
                    }
                }
                publish(&shared, &inner);
                warning == Some(DurationWarning::LimitReached)
            };
            if limit_reached {
                request_stop(shared, StopReason::Timeout);
                return;
            }
        }
    })
}

fn spawn_track_watcher(shared: Weak<Shared>, capture: Arc<dyn CaptureStream>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ended = capture.ended();
        loop {
            if *ended.borrow_and_update() {
                break;
            }
            if ended.changed().await.is_err() {
                return;
            }
        }
        tracing::info!("Capture track ended externally");
        if let Some(shared) = shared.upgrade() {
            request_stop(shared, StopReason::TrackEnded);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::SnapshotSource;
    use crate::sync::CropBroadcastHub;
    use crate::testing::{segments_dir, FakeBackend};
    use swingcast_capture_model::{BroadcastedRect, SessionId};

    fn engine_with(backend: Arc<FakeBackend>, max_secs: u64) -> (RecordingEngine, tempfile::TempDir) {
        let (dir, segments) = segments_dir();
        let settings = EngineSettings {
            max_duration_secs: max_secs,
            fps: 30,
            encoder_bitrate_bps: 6_000_000,
            microphone: true,
            audio_sample_rate: 48_000,
            segments_dir: segments,
            crop: CropRectangle::from_height(180),
            crop_step_px: 25,
            debug: true,
        };
        let engine = RecordingEngine::new(backend, settings, Arc::new(TokioClock::new()));
        (engine, dir)
    }

    fn arm(engine: &RecordingEngine) {
        engine.begin_selection().unwrap();
        engine.configure().unwrap();
        assert_eq!(engine.state(), RecordingState::Configured);
    }

    async fn wait_for(engine: &RecordingEngine, state: RecordingState) {
        let mut rx = engine.subscribe();
        while rx.borrow_and_update().state != state {
            rx.changed().await.unwrap();
        }
    }

    fn assert_released(backend: &FakeBackend) {
        assert!(backend.captures().iter().all(|c| c.is_stopped()));
        assert!(backend.microphones().iter().all(|m| m.is_stopped()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_stop_produces_segment() {
        let backend = Arc::new(FakeBackend::new());
        backend.set_mic_samples(vec![0.1; 4800]);
        let (engine, _dir) = engine_with(backend.clone(), 300);
        arm(&engine);

        engine.start().await.unwrap();
        assert_eq!(engine.state(), RecordingState::Recording);
        tokio::time::sleep(Duration::from_secs(3)).await;

        let segment = engine.stop().await.unwrap().unwrap();
        assert_eq!(engine.state(), RecordingState::Stopped);
        assert_eq!(segment.duration_secs, 3);
        assert!(segment.path.exists());
        assert_released(&backend);

        let log = &backend.encoder_logs()[0];
        assert!(log.started && log.finished);
        assert!(log.video_frames >= 1);
        assert_eq!(log.audio_samples, 4800);
        assert_eq!(log.settings.as_ref().unwrap().width, 320);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let backend = Arc::new(FakeBackend::new());
        let (engine, _dir) = engine_with(backend.clone(), 300);
        assert!(engine.stop().await.unwrap().is_none());

        arm(&engine);
        engine.start().await.unwrap();
        assert!(engine.stop().await.unwrap().is_some());
        assert!(engine.stop().await.unwrap().is_none());
        assert_eq!(engine.state(), RecordingState::Stopped);
        assert_eq!(engine.segments().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_excluded_from_duration() {
        let backend = Arc::new(FakeBackend::new());
        let (engine, _dir) = engine_with(backend.clone(), 300);
        arm(&engine);
        engine.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        engine.pause().await.unwrap();
        assert_eq!(engine.state(), RecordingState::Paused);
        tokio::time::sleep(Duration::from_secs(5)).await;
        engine.resume().await.unwrap();
        assert_eq!(engine.state(), RecordingState::Recording);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let segment = engine.stop().await.unwrap().unwrap();
        assert_eq!(segment.duration_secs, 20);
        let log = &backend.encoder_logs()[0];
        assert_eq!((log.pauses, log.resumes), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_tracks_paused_time() {
        let backend = Arc::new(FakeBackend::new());
        let (engine, _dir) = engine_with(backend, 300);
        arm(&engine);
        engine.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        engine.pause().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        engine.resume().await.unwrap();
        assert_eq!(engine.session().paused_accum_ms, 5_000);

        tokio::time::sleep(Duration::from_secs(10)).await;
        engine.pause().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        engine.stop().await.unwrap();

        let session = engine.session();
        assert_eq!(session.paused_accum_ms, 7_000);
        assert_eq!(session.duration_secs, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_paused() {
        let backend = Arc::new(FakeBackend::new());
        let (engine, _dir) = engine_with(backend.clone(), 300);
        arm(&engine);
        engine.start().await.unwrap();
        engine.pause().await.unwrap();
        assert!(engine.stop().await.unwrap().is_some());
        assert_eq!(engine.state(), RecordingState::Stopped);
        assert_released(&backend);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stops_at_ceiling_with_warnings() {
        let backend = Arc::new(FakeBackend::new());
        let (engine, _dir) = engine_with(backend.clone(), 300);
        arm(&engine);
        engine.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(310)).await;
        wait_for(&engine, RecordingState::Stopped).await;

        let session = engine.session();
        assert_eq!(session.duration_secs, 300);
        assert_eq!(session.segments.len(), 1);
        let fired: Vec<u64> = session
            .warning_history
            .iter()
            .filter(|e| matches!(e.warning, RecordingWarning::Duration(_)))
            .map(|e| e.at_secs)
            .collect();
        assert_eq!(fired, vec![120, 180, 240, 270, 300]);
        assert_eq!(
            engine.status().warning_text.as_deref(),
            Some("Recording stopped - 5 minute limit reached")
        );
        assert_released(&backend);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_track_end_stops() {
        let backend = Arc::new(FakeBackend::new());
        let (engine, _dir) = engine_with(backend.clone(), 300);
        arm(&engine);
        engine.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        backend.captures()[0].end_track();
        wait_for(&engine, RecordingState::Stopped).await;
        assert_eq!(engine.segments().len(), 1);
        assert_released(&backend);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_microphone_records_video_only() {
        let backend = Arc::new(FakeBackend::new());
        backend.deny_microphone();
        let (engine, _dir) = engine_with(backend.clone(), 300);
        arm(&engine);
        engine.start().await.unwrap();

        let status = engine.status();
        assert_eq!(status.warning, Some(RecordingWarning::NoMicrophone));
        assert_eq!(status.mic_status, MicStatus::Denied);
        assert_eq!(
            status.warning_text.as_deref(),
            Some("No microphone detected - recording without audio")
        );

        let segment = engine.stop().await.unwrap();
        assert!(segment.is_some());
        let log = &backend.encoder_logs()[0];
        assert!(log.settings.as_ref().unwrap().audio_sample_rate.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_denied_fails_start() {
        let backend = Arc::new(FakeBackend::new());
        backend.deny_capture();
        let (engine, _dir) = engine_with(backend.clone(), 300);
        arm(&engine);
        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, SwingError::Permission { .. }));
        assert_eq!(engine.state(), RecordingState::Configured);
        assert_eq!(engine.status().warning, Some(RecordingWarning::CaptureUnavailable));
        assert!(backend.microphones().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_encoder_still_releases_streams() {
        let backend = Arc::new(FakeBackend::new());
        backend.hang_encoder_finish();
        let (engine, _dir) = engine_with(backend.clone(), 300);
        arm(&engine);
        engine.start().await.unwrap();

        let err = engine.stop().await.unwrap_err();
        assert!(matches!(err, SwingError::Encoding { .. }));
        assert_eq!(engine.state(), RecordingState::Stopped);
        assert!(backend.encoder_logs()[0].aborted);
        assert_released(&backend);
    }

    #[tokio::test(start_paused = true)]
    async fn test_encoder_error_tears_down() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail_encoder_push();
        let (engine, _dir) = engine_with(backend.clone(), 300);
        arm(&engine);
        engine.start().await.unwrap();
        wait_for(&engine, RecordingState::Stopped).await;
        assert_released(&backend);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_pending_capture_cancels_start() {
        let backend = Arc::new(FakeBackend::new());
        let gate = backend.gate_capture();
        let (engine, _dir) = engine_with(backend.clone(), 300);
        arm(&engine);

        let starter = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.start().await })
        };
        tokio::task::yield_now().await;
        assert!(engine.stop().await.unwrap().is_none());
        gate.notify_one();

        assert!(starter.await.unwrap().is_err());
        assert_eq!(engine.state(), RecordingState::Configured);
        assert_released(&backend);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_transitions_are_rejected() {
        let backend = Arc::new(FakeBackend::new());
        let (engine, _dir) = engine_with(backend, 300);
        assert!(engine.start().await.is_err());
        assert!(engine.pause().await.is_err());
        assert!(engine.configure().is_err());
        arm(&engine);
        assert!(engine.resume().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_another_take_and_segment_cleanup() {
        let backend = Arc::new(FakeBackend::new());
        let (engine, _dir) = engine_with(backend.clone(), 300);
        arm(&engine);
        engine.start().await.unwrap();
        let first = engine.stop().await.unwrap().unwrap();

        engine.reset().unwrap();
        assert_eq!(engine.state(), RecordingState::Configured);
        engine.start().await.unwrap();
        let second = engine.stop().await.unwrap().unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(engine.segments().len(), 2);

        engine.delete_segment(&first.id).unwrap();
        assert!(!first.path.exists());
        engine.clear_segments().unwrap();
        assert!(!second.path.exists());
        assert_eq!(engine.status().segments, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crop_edits_blocked_while_live() {
        let backend = Arc::new(FakeBackend::new());
        let (engine, _dir) = engine_with(backend, 300);
        engine.edit_crop(|c| c.increase(None)).unwrap();
        assert_eq!(engine.crop().preset().height, 205);
        arm(&engine);
        engine.start().await.unwrap();
        assert!(engine.edit_crop(|c| c.reset()).is_err());
        engine.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_crop_drives_compositor() {
        let backend = Arc::new(FakeBackend::new());
        let (engine, _dir) = engine_with(backend, 300);
        let hub = CropBroadcastHub::new();
        let session = SessionId::new("engine");
        engine.attach_broadcast(hub.receiver(&session));
        arm(&engine);
        engine.start().await.unwrap();

        hub.sender(&session)
            .publish(BroadcastedRect::new(10.0, 20.0, 320.0, 180.0, 640.0, 360.0, 1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        let snapshot = engine.compositor_snapshot().unwrap();
        assert_eq!(snapshot.crop_origin, (10, 20));
        engine.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_follows_every_take() {
        let backend = Arc::new(FakeBackend::new());
        let (engine, _dir) = engine_with(backend, 300);
        let hub = CropBroadcastHub::new();
        let session = SessionId::new("two-takes");
        engine.attach_broadcast(hub.receiver(&session));
        let sender = hub.sender(&session);
        arm(&engine);

        engine.start().await.unwrap();
        sender.publish(BroadcastedRect::new(10.0, 20.0, 320.0, 180.0, 640.0, 360.0, 1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.compositor_snapshot().unwrap().source, SnapshotSource::Broadcast);
        engine.stop().await.unwrap();

        engine.reset().unwrap();
        engine.start().await.unwrap();
        sender.publish(BroadcastedRect::new(40.0, 30.0, 320.0, 180.0, 640.0, 360.0, 2));
        tokio::time::sleep(Duration::from_millis(100)).await;
        let snapshot = engine.compositor_snapshot().unwrap();
        assert_eq!(snapshot.source, SnapshotSource::Broadcast);
        assert_eq!(snapshot.crop_origin, (40, 30));
        engine.stop().await.unwrap();
    }
}
