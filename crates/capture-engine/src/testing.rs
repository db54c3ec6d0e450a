//! In-memory media fakes used by the unit tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use swingcast_capture_model::CaptureGeometry;
use swingcast_common::error::{SwingError, SwingResult};
use tokio::sync::{watch, Notify};

use crate::media::{
    AudioChunk, CaptureStream, EncodedArtifact, EncoderSettings, MediaBackend, MediaEncoder,
    MicrophoneStream, VideoFrame,
};

pub struct FakeCapture {
    geometry: Mutex<Option<CaptureGeometry>>,
    frame: Mutex<Option<VideoFrame>>,
    sequence: AtomicU64,
    audio: Mutex<Vec<AudioChunk>>,
    has_audio: AtomicBool,
    ended_tx: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl FakeCapture {
    pub fn new(geometry: CaptureGeometry) -> Arc<Self> {
        let capture = Arc::new(Self {
            geometry: Mutex::new(Some(geometry)),
            frame: Mutex::new(None),
            sequence: AtomicU64::new(0),
            audio: Mutex::new(Vec::new()),
            has_audio: AtomicBool::new(false),
            ended_tx: watch::channel(false).0,
            stopped: AtomicBool::new(false),
        });
        capture.push_frame();
        capture
    }

    /// Replace the geometry and, when present, emit a frame of that size.
    pub fn set_geometry(&self, geometry: Option<CaptureGeometry>) {
        *self.geometry.lock() = geometry;
        if geometry.is_some() {
            self.push_frame();
        }
    }

    /// Emit a new frame matching the current geometry.
    pub fn push_frame(&self) {
        let (w, h) = self
            .geometry
            .lock()
            .map(|g| (g.capture_width, g.capture_height))
            .unwrap_or((16, 16));
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        *self.frame.lock() = Some(VideoFrame::solid(w, h, [10, 200, 30, 255], sequence));
    }

    pub fn clear_frame(&self) {
        *self.frame.lock() = None;
    }

    pub fn push_audio(&self, samples: Vec<f32>) {
        self.has_audio.store(true, Ordering::SeqCst);
        self.audio.lock().push(AudioChunk {
            sample_rate: 48_000,
            samples,
        });
    }

    /// Simulate the user closing the share from outside the app.
    pub fn end_track(&self) {
        self.ended_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl CaptureStream for FakeCapture {
    fn geometry(&self) -> Option<CaptureGeometry> {
        *self.geometry.lock()
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        self.frame.lock().clone()
    }

    fn has_audio(&self) -> bool {
        self.has_audio.load(Ordering::SeqCst)
    }

    fn drain_audio(&self) -> Vec<AudioChunk> {
        std::mem::take(&mut *self.audio.lock())
    }

    fn ended(&self) -> watch::Receiver<bool> {
        self.ended_tx.subscribe()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

pub struct FakeMicrophone {
    samples: Mutex<Vec<f32>>,
    pending: Mutex<Vec<AudioChunk>>,
    stopped: AtomicBool,
}

impl FakeMicrophone {
    pub fn with_samples(samples: Vec<f32>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(vec![AudioChunk {
                sample_rate: 48_000,
                samples: samples.clone(),
            }]),
            samples: Mutex::new(samples),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MicrophoneStream for FakeMicrophone {
    fn recent_samples(&self, len: usize) -> Vec<f32> {
        let samples = self.samples.lock();
        let tail = &samples[samples.len().saturating_sub(len)..];
        let mut out = vec![0.0; len - tail.len()];
        out.extend_from_slice(tail);
        out
    }

    fn drain_chunks(&self) -> Vec<AudioChunk> {
        std::mem::take(&mut *self.pending.lock())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Everything a [`FakeEncoder`] was asked to do.
#[derive(Debug, Default, Clone)]
pub struct EncoderLog {
    pub settings: Option<EncoderSettings>,
    pub started: bool,
    pub pauses: u32,
    pub resumes: u32,
    pub video_frames: u64,
    pub audio_samples: u64,
    pub finished: bool,
    pub aborted: bool,
}

pub struct FakeEncoder {
    settings: EncoderSettings,
    log: Arc<Mutex<EncoderLog>>,
    hang_on_finish: bool,
    fail_push: bool,
}

#[async_trait::async_trait]
impl MediaEncoder for FakeEncoder {
    fn start(&mut self) -> SwingResult<()> {
        self.log.lock().started = true;
        Ok(())
    }

    fn pause(&mut self) -> SwingResult<()> {
        self.log.lock().pauses += 1;
        Ok(())
    }

    fn resume(&mut self) -> SwingResult<()> {
        self.log.lock().resumes += 1;
        Ok(())
    }

    fn push_video(&mut self, _frame: &VideoFrame) -> SwingResult<()> {
        if self.fail_push {
            return Err(SwingError::encoding("encoder rejected frame"));
        }
        self.log.lock().video_frames += 1;
        Ok(())
    }

    fn push_audio(&mut self, chunk: &AudioChunk) -> SwingResult<()> {
        self.log.lock().audio_samples += chunk.samples.len() as u64;
        Ok(())
    }

    async fn finish(&mut self) -> SwingResult<EncodedArtifact> {
        if self.hang_on_finish {
            std::future::pending::<()>().await;
        }
        let frames = self.log.lock().video_frames;
        let bytes = vec![0u8; 64 + frames as usize];
        std::fs::write(&self.settings.output_path, &bytes)?;
        self.log.lock().finished = true;
        Ok(EncodedArtifact {
            path: self.settings.output_path.clone(),
            size_bytes: bytes.len() as u64,
            mime_type: "video/webm".to_string(),
        })
    }

    fn abort(&mut self) {
        self.log.lock().aborted = true;
    }
}

#[derive(Default)]
struct BackendState {
    geometry: Option<CaptureGeometry>,
    deny_capture: bool,
    deny_microphone: bool,
    fail_microphone: bool,
    hang_on_finish: bool,
    fail_push: bool,
    mic_samples: Vec<f32>,
    capture_gate: Option<Arc<Notify>>,
    captures: Vec<Arc<FakeCapture>>,
    microphones: Vec<Arc<FakeMicrophone>>,
    encoders: Vec<Arc<Mutex<EncoderLog>>>,
}

/// Backend handing out fakes and remembering every resource it created.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        backend.state.lock().geometry = Some(CaptureGeometry::new(
            640,
            360,
            1.0,
            swingcast_capture_model::DisplaySurfaceKind::Browser,
        ));
        backend
    }

    pub fn deny_capture(&self) {
        self.state.lock().deny_capture = true;
    }

    pub fn deny_microphone(&self) {
        self.state.lock().deny_microphone = true;
    }

    pub fn fail_microphone(&self) {
        self.state.lock().fail_microphone = true;
    }

    pub fn hang_encoder_finish(&self) {
        self.state.lock().hang_on_finish = true;
    }

    pub fn fail_encoder_push(&self) {
        self.state.lock().fail_push = true;
    }

    pub fn set_mic_samples(&self, samples: Vec<f32>) {
        self.state.lock().mic_samples = samples;
    }

    /// Make capture acquisition wait until the returned gate is notified.
    pub fn gate_capture(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().capture_gate = Some(gate.clone());
        gate
    }

    pub fn captures(&self) -> Vec<Arc<FakeCapture>> {
        self.state.lock().captures.clone()
    }

    pub fn microphones(&self) -> Vec<Arc<FakeMicrophone>> {
        self.state.lock().microphones.clone()
    }

    pub fn encoder_logs(&self) -> Vec<EncoderLog> {
        self.state
            .lock()
            .encoders
            .iter()
            .map(|log| log.lock().clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl MediaBackend for FakeBackend {
    async fn acquire_capture(&self) -> SwingResult<Arc<dyn CaptureStream>> {
        let gate = self.state.lock().capture_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut state = self.state.lock();
        if state.deny_capture {
            return Err(SwingError::permission("screen capture denied"));
        }
        let geometry = state.geometry.ok_or_else(|| SwingError::capture("no display"))?;
        let capture = FakeCapture::new(geometry);
        state.captures.push(capture.clone());
        Ok(capture)
    }

    async fn acquire_microphone(&self) -> SwingResult<Arc<dyn MicrophoneStream>> {
        let mut state = self.state.lock();
        if state.deny_microphone {
            return Err(SwingError::permission("microphone denied"));
        }
        if state.fail_microphone {
            return Err(SwingError::capture("no input device"));
        }
        let mic = FakeMicrophone::with_samples(state.mic_samples.clone());
        state.microphones.push(mic.clone());
        Ok(mic)
    }

    fn create_encoder(&self, settings: &EncoderSettings) -> SwingResult<Box<dyn MediaEncoder>> {
        let mut state = self.state.lock();
        let log = Arc::new(Mutex::new(EncoderLog {
            settings: Some(settings.clone()),
            ..EncoderLog::default()
        }));
        state.encoders.push(log.clone());
        Ok(Box::new(FakeEncoder {
            settings: settings.clone(),
            log,
            hang_on_finish: state.hang_on_finish,
            fail_push: state.fail_push,
        }))
    }
}

/// Scratch directory for encoder output.
pub fn segments_dir() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("segments");
    (dir, path)
}
