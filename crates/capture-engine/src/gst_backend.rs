//! GStreamer implementation of the media seams.
//!
//! Captures run as `source ! videoconvert ! appsink` pipelines whose
//! callbacks keep the newest frame. The encoder is an `appsrc`-fed VP8/Opus
//! WebM pipeline that is finalized by sending EOS and draining the bus.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use parking_lot::Mutex;
use swingcast_capture_model::{CaptureGeometry, DisplaySurfaceKind};
use swingcast_common::config::RecordingDefaults;
use swingcast_common::error::{SwingError, SwingResult};
use tokio::sync::watch;

use crate::media::{
    AudioChunk, CaptureStream, EncodedArtifact, EncoderSettings, MediaBackend, MediaEncoder,
    MicrophoneStream, VideoFrame,
};

const STATE_CHANGE_TIMEOUT: Duration = Duration::from_secs(10);
const EOS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);
const BUS_POLL: Duration = Duration::from_millis(100);
/// Microphone audio buffered for an encoder that has not drained yet.
const MAX_PENDING_AUDIO_SECS: usize = 10;

/// A launched pipeline with state helpers.
struct LaunchedPipeline {
    name: &'static str,
    pipeline: gst::Pipeline,
}

impl LaunchedPipeline {
    fn from_launch(name: &'static str, launch: &str) -> SwingResult<Self> {
        init_gstreamer()?;
        tracing::debug!(pipeline = name, %launch, "Building pipeline");

        let element = gst::parse::launch(launch)
            .map_err(|e| SwingError::capture(format!("Failed to build {name} pipeline: {e}")))?;
        let pipeline = element
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| SwingError::capture("Launch string did not produce a pipeline"))?;
        Ok(Self { name, pipeline })
    }

    fn element<T: IsA<gst::Element>>(&self, name: &str) -> SwingResult<T> {
        self.pipeline
            .by_name(name)
            .and_then(|e| e.dynamic_cast::<T>().ok())
            .ok_or_else(|| SwingError::capture(format!("{} pipeline has no `{name}`", self.name)))
    }

    fn start(&self) -> SwingResult<()> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| SwingError::capture(format!("Failed to start {} pipeline: {e:?}", self.name)))?;

        match self
            .pipeline
            .state(gst::ClockTime::from_mseconds(STATE_CHANGE_TIMEOUT.as_millis() as u64))
        {
            (Ok(_), gst::State::Playing, _) => Ok(()),
            (Ok(_), state, _) => {
                tracing::warn!(pipeline = self.name, ?state, "Pipeline did not reach Playing in time");
                Ok(())
            }
            (Err(_), _, _) => Err(self.pending_error().unwrap_or_else(|| {
                SwingError::capture(format!("{} pipeline failed to reach Playing", self.name))
            })),
        }
    }

    /// The first error message waiting on the bus, classified.
    fn pending_error(&self) -> Option<SwingError> {
        let bus = self.pipeline.bus()?;
        while let Some(msg) = bus.pop() {
            if let gst::MessageView::Error(e) = msg.view() {
                return Some(classify_source_error(&e.error().to_string()));
            }
        }
        None
    }

    fn set_paused(&self, paused: bool) -> SwingResult<()> {
        let state = if paused {
            gst::State::Paused
        } else {
            gst::State::Playing
        };
        self.pipeline
            .set_state(state)
            .map(|_| ())
            .map_err(|e| SwingError::encoding(format!("{} pipeline to {state:?}: {e:?}", self.name)))
    }

    /// Block until EOS reaches the bus, an error appears, or the timeout
    /// elapses. Returns whether EOS arrived.
    fn drain_eos(&self, timeout: Duration) -> bool {
        let Some(bus) = self.pipeline.bus() else {
            return false;
        };
        let start = std::time::Instant::now();
        loop {
            let Some(remaining) = timeout.checked_sub(start.elapsed()) else {
                tracing::warn!(pipeline = self.name, "EOS drain timed out");
                return false;
            };
            let Some(msg) = bus.timed_pop(gst::ClockTime::from_nseconds(remaining.as_nanos() as u64))
            else {
                tracing::warn!(pipeline = self.name, "EOS drain timed out");
                return false;
            };
            match msg.view() {
                gst::MessageView::Eos(_) => {
                    tracing::debug!(pipeline = self.name, "EOS received; pipeline drained");
                    return true;
                }
                gst::MessageView::Error(e) => {
                    tracing::warn!(pipeline = self.name, error = %e.error(), "Pipeline error during EOS drain");
                    return false;
                }
                _ => {}
            }
        }
    }

    fn shutdown(&self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            tracing::warn!(pipeline = self.name, error = ?e, "Failed to stop pipeline");
        }
    }

    /// Watch the bus on a thread and flip `ended` on EOS or error.
    fn watch_end(&self, ended: Arc<watch::Sender<bool>>, stopped: Arc<AtomicBool>) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        let name = self.name;
        let spawned = std::thread::Builder::new()
            .name(format!("swingcast-{name}-bus"))
            .spawn(move || {
                while !stopped.load(Ordering::SeqCst) {
                    let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(BUS_POLL.as_millis() as u64))
                    else {
                        continue;
                    };
                    match msg.view() {
                        gst::MessageView::Eos(_) => {
                            tracing::info!(pipeline = name, "Source reached end of stream");
                            ended.send_replace(true);
                            return;
                        }
                        gst::MessageView::Error(e) => {
                            tracing::warn!(pipeline = name, error = %e.error(), "Source failed");
                            ended.send_replace(true);
                            return;
                        }
                        _ => {}
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(pipeline = name, error = %e, "Failed to spawn bus watcher");
        }
    }
}

fn init_gstreamer() -> SwingResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    match GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string())) {
        Ok(()) => Ok(()),
        Err(e) => Err(SwingError::capture(format!("Failed to initialize GStreamer: {e}"))),
    }
}

/// Initialize GStreamer and report its version string.
pub fn gstreamer_version() -> SwingResult<String> {
    init_gstreamer()?;
    Ok(gst::version_string().to_string())
}

/// Map a source error message onto permission vs generic capture failure.
fn classify_source_error(message: &str) -> SwingError {
    let lower = message.to_lowercase();
    if ["denied", "permission", "not authorized", "cancelled"]
        .iter()
        .any(|k| lower.contains(k))
    {
        SwingError::permission(message.to_string())
    } else {
        SwingError::capture(message.to_string())
    }
}

fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('"', "\\\"")
}

fn capture_launch(source: &str) -> String {
    format!(
        "{source} ! queue max-size-buffers=4 leaky=downstream ! videoconvert ! video/x-raw,format=RGBA ! appsink name=frames max-buffers=1 drop=true sync=false"
    )
}

fn microphone_launch(source: &str, sample_rate: u32) -> String {
    format!(
        "{source} ! audioconvert ! audioresample ! audio/x-raw,format=F32LE,layout=interleaved,channels=1,rate={sample_rate} ! appsink name=samples sync=false"
    )
}

fn encoder_launch(settings: &EncoderSettings) -> String {
    let path = escape_path(&settings.output_path);
    let fps = settings.fps.max(1);
    // One keyframe every two seconds.
    let keyint = fps.saturating_mul(2);
    let mut launch = format!(
        "appsrc name=video is-live=true format=time do-timestamp=true \
         caps=video/x-raw,format=RGBA,width={w},height={h},framerate=0/1 \
         ! queue max-size-buffers=8 ! videoconvert ! videorate ! video/x-raw,framerate={fps}/1 \
         ! vp8enc deadline=1 target-bitrate={bitrate} keyframe-max-dist={keyint} \
         ! queue ! webmmux name=mux ! filesink location=\"{path}\"",
        w = settings.width,
        h = settings.height,
        bitrate = settings.video_bitrate_bps,
    );
    if let Some(rate) = settings.audio_sample_rate {
        launch.push_str(&format!(
            " appsrc name=audio is-live=true format=time do-timestamp=true \
             caps=audio/x-raw,format=F32LE,layout=interleaved,channels=1,rate={rate} \
             ! queue ! audioconvert ! audioresample ! opusenc ! queue ! mux."
        ));
    }
    launch
}

fn f32_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Screen capture through an appsink.
pub struct GstCaptureStream {
    pipeline: LaunchedPipeline,
    latest: Arc<Mutex<Option<VideoFrame>>>,
    geometry: Arc<Mutex<Option<CaptureGeometry>>>,
    ended: Arc<watch::Sender<bool>>,
    stopped: Arc<AtomicBool>,
}

impl GstCaptureStream {
    fn launch(source: &str, device_pixel_ratio: f64) -> SwingResult<Self> {
        let pipeline = LaunchedPipeline::from_launch("capture", &capture_launch(source))?;
        let sink: gst_app::AppSink = pipeline.element("frames")?;

        let latest = Arc::new(Mutex::new(None));
        let geometry = Arc::new(Mutex::new(None));
        let sequence = Arc::new(AtomicU64::new(0));
        {
            let latest = latest.clone();
            let geometry = geometry.clone();
            sink.set_callbacks(
                gst_app::AppSinkCallbacks::builder()
                    .new_sample(move |sink| {
                        let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                        let structure = sample
                            .caps()
                            .and_then(|caps| caps.structure(0))
                            .ok_or(gst::FlowError::NotNegotiated)?;
                        let width = structure.get::<i32>("width").map_err(|_| gst::FlowError::NotNegotiated)?;
                        let height = structure.get::<i32>("height").map_err(|_| gst::FlowError::NotNegotiated)?;
                        let (width, height) = (width.max(0) as u32, height.max(0) as u32);
                        let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                        let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                        let len = width as usize * height as usize * 4;
                        let Some(pixels) = map.as_slice().get(..len) else {
                            return Ok(gst::FlowSuccess::Ok);
                        };

                        let seq = sequence.fetch_add(1, Ordering::Relaxed) + 1;
                        *geometry.lock() = Some(CaptureGeometry::new(
                            width,
                            height,
                            device_pixel_ratio,
                            DisplaySurfaceKind::Monitor,
                        ));
                        *latest.lock() = Some(VideoFrame::new(width, height, pixels.to_vec(), seq));
                        Ok(gst::FlowSuccess::Ok)
                    })
                    .build(),
            );
        }

        pipeline.start()?;
        let ended = Arc::new(watch::channel(false).0);
        let stopped = Arc::new(AtomicBool::new(false));
        pipeline.watch_end(ended.clone(), stopped.clone());
        Ok(Self {
            pipeline,
            latest,
            geometry,
            ended,
            stopped,
        })
    }
}

impl CaptureStream for GstCaptureStream {
    fn geometry(&self) -> Option<CaptureGeometry> {
        *self.geometry.lock()
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        self.latest.lock().clone()
    }

    fn ended(&self) -> watch::Receiver<bool> {
        self.ended.subscribe()
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pipeline.shutdown();
        self.latest.lock().take();
        tracing::debug!("Capture stream stopped");
    }
}

impl Drop for GstCaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Microphone through an appsink, keeping a short ring for metering.
pub struct GstMicrophone {
    pipeline: LaunchedPipeline,
    ring: Arc<Mutex<VecDeque<f32>>>,
    pending: Arc<Mutex<VecDeque<AudioChunk>>>,
    stopped: AtomicBool,
}

impl GstMicrophone {
    fn launch(source: &str, sample_rate: u32) -> SwingResult<Self> {
        let pipeline = LaunchedPipeline::from_launch(
            "microphone",
            &microphone_launch(source, sample_rate),
        )?;
        let sink: gst_app::AppSink = pipeline.element("samples")?;

        let ring_len = sample_rate as usize;
        let max_pending = sample_rate as usize * MAX_PENDING_AUDIO_SECS;
        let ring = Arc::new(Mutex::new(VecDeque::with_capacity(ring_len)));
        let pending = Arc::new(Mutex::new(VecDeque::new()));
        {
            let ring = ring.clone();
            let pending = pending.clone();
            sink.set_callbacks(
                gst_app::AppSinkCallbacks::builder()
                    .new_sample(move |sink| {
                        let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                        let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                        let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                        let samples = f32_samples(map.as_slice());

                        {
                            let mut ring = ring.lock();
                            ring.extend(samples.iter().copied());
                            let excess = ring.len().saturating_sub(ring_len);
                            ring.drain(..excess);
                        }
                        let mut pending = pending.lock();
                        pending.push_back(AudioChunk {
                            sample_rate,
                            samples,
                        });
                        while pending.iter().map(|c| c.samples.len()).sum::<usize>() > max_pending {
                            pending.pop_front();
                        }
                        Ok(gst::FlowSuccess::Ok)
                    })
                    .build(),
            );
        }

        pipeline.start()?;
        Ok(Self {
            pipeline,
            ring,
            pending,
            stopped: AtomicBool::new(false),
        })
    }
}

impl MicrophoneStream for GstMicrophone {
    fn recent_samples(&self, len: usize) -> Vec<f32> {
        let ring = self.ring.lock();
        let take = ring.len().min(len);
        let mut out = vec![0.0; len - take];
        out.extend(ring.iter().skip(ring.len() - take).copied());
        out
    }

    fn drain_chunks(&self) -> Vec<AudioChunk> {
        self.pending.lock().drain(..).collect()
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pipeline.shutdown();
        tracing::debug!("Microphone stopped");
    }
}

impl Drop for GstMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

/// VP8/Opus WebM encoder fed through appsrc elements.
pub struct GstEncoder {
    settings: EncoderSettings,
    pipeline: Arc<LaunchedPipeline>,
    video: gst_app::AppSrc,
    audio: Option<gst_app::AppSrc>,
    closed: bool,
}

impl GstEncoder {
    fn launch(settings: &EncoderSettings) -> SwingResult<Self> {
        let pipeline = LaunchedPipeline::from_launch("encoder", &encoder_launch(settings))
            .map_err(|e| SwingError::encoding(e.to_string()))?;
        let video = pipeline.element::<gst_app::AppSrc>("video")?;
        let audio = match settings.audio_sample_rate {
            Some(_) => Some(pipeline.element::<gst_app::AppSrc>("audio")?),
            None => None,
        };
        Ok(Self {
            settings: settings.clone(),
            pipeline: Arc::new(pipeline),
            video,
            audio,
            closed: false,
        })
    }
}

#[async_trait::async_trait]
impl MediaEncoder for GstEncoder {
    fn start(&mut self) -> SwingResult<()> {
        self.pipeline
            .start()
            .map_err(|e| SwingError::encoding(e.to_string()))
    }

    fn pause(&mut self) -> SwingResult<()> {
        self.pipeline.set_paused(true)
    }

    fn resume(&mut self) -> SwingResult<()> {
        self.pipeline.set_paused(false)
    }

    fn push_video(&mut self, frame: &VideoFrame) -> SwingResult<()> {
        if frame.width != self.settings.width || frame.height != self.settings.height {
            return Err(SwingError::encoding(format!(
                "frame {}x{} does not match encoder {}x{}",
                frame.width, frame.height, self.settings.width, self.settings.height
            )));
        }
        self.video
            .push_buffer(gst::Buffer::from_slice(frame.data.as_ref().clone()))
            .map(|_| ())
            .map_err(|e| SwingError::encoding(format!("video push failed: {e:?}")))
    }

    fn push_audio(&mut self, chunk: &AudioChunk) -> SwingResult<()> {
        let Some(audio) = &self.audio else {
            return Ok(());
        };
        let bytes: Vec<u8> = chunk.samples.iter().copied().flat_map(f32::to_le_bytes).collect();
        audio
            .push_buffer(gst::Buffer::from_slice(bytes))
            .map(|_| ())
            .map_err(|e| SwingError::encoding(format!("audio push failed: {e:?}")))
    }

    async fn finish(&mut self) -> SwingResult<EncodedArtifact> {
        if self.closed {
            return Err(SwingError::encoding("encoder already closed"));
        }

        // Paused pipelines never drain.
        self.pipeline.set_paused(false)?;
        for src in std::iter::once(&self.video).chain(self.audio.as_ref()) {
            if let Err(e) = src.end_of_stream() {
                tracing::warn!(error = ?e, "Failed to signal end of stream");
            }
        }

        let pipeline = self.pipeline.clone();
        let drained = tokio::task::spawn_blocking(move || {
            let drained = pipeline.drain_eos(EOS_DRAIN_TIMEOUT);
            pipeline.shutdown();
            drained
        })
        .await
        .map_err(|e| SwingError::encoding(format!("encoder drain task failed: {e}")))?;
        self.closed = true;
        if !drained {
            tracing::warn!("Encoder output may be truncated");
        }

        let size_bytes = std::fs::metadata(&self.settings.output_path)?.len();
        Ok(EncodedArtifact {
            path: self.settings.output_path.clone(),
            size_bytes,
            mime_type: "video/webm".to_string(),
        })
    }

    fn abort(&mut self) {
        if !self.closed {
            self.closed = true;
            self.pipeline.shutdown();
        }
    }
}

impl Drop for GstEncoder {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Media backend built from the recording defaults.
pub struct GstBackend {
    defaults: RecordingDefaults,
}

impl GstBackend {
    pub fn new(defaults: RecordingDefaults) -> Self {
        Self { defaults }
    }
}

#[async_trait::async_trait]
impl MediaBackend for GstBackend {
    async fn acquire_capture(&self) -> SwingResult<Arc<dyn CaptureStream>> {
        let source = self.defaults.capture_source.clone();
        let dpr = self.defaults.device_pixel_ratio;
        let stream = tokio::task::spawn_blocking(move || GstCaptureStream::launch(&source, dpr))
            .await
            .map_err(|e| SwingError::capture(format!("capture task failed: {e}")))??;

        // Geometry is only known once caps are negotiated and a frame lands.
        let deadline = tokio::time::Instant::now() + FIRST_FRAME_TIMEOUT;
        while stream.geometry().is_none() {
            if *stream.ended.borrow() || tokio::time::Instant::now() >= deadline {
                stream.stop();
                return Err(stream
                    .pipeline
                    .pending_error()
                    .unwrap_or_else(|| SwingError::capture("capture produced no frames")));
            }
            tokio::time::sleep(BUS_POLL).await;
        }
        tracing::info!(geometry = ?stream.geometry(), "Screen capture acquired");
        Ok(Arc::new(stream))
    }

    async fn acquire_microphone(&self) -> SwingResult<Arc<dyn MicrophoneStream>> {
        let source = self.defaults.microphone_source.clone();
        let rate = self.defaults.audio_sample_rate;
        let mic = tokio::task::spawn_blocking(move || GstMicrophone::launch(&source, rate))
            .await
            .map_err(|e| SwingError::capture(format!("microphone task failed: {e}")))??;
        tracing::info!(sample_rate = rate, "Microphone acquired");
        Ok(Arc::new(mic))
    }

    fn create_encoder(&self, settings: &EncoderSettings) -> SwingResult<Box<dyn MediaEncoder>> {
        Ok(Box::new(GstEncoder::launch(settings)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn settings(audio: Option<u32>) -> EncoderSettings {
        EncoderSettings {
            width: 640,
            height: 360,
            fps: 30,
            video_bitrate_bps: 6_000_000,
            audio_sample_rate: audio,
            output_path: PathBuf::from("/tmp/take \"1\".webm"),
        }
    }

    #[test]
    fn encoder_launch_without_audio_has_single_source() {
        let launch = encoder_launch(&settings(None));
        assert!(launch.contains("width=640,height=360"));
        assert!(launch.contains("target-bitrate=6000000"));
        assert!(launch.contains("keyframe-max-dist=60"));
        assert!(launch.contains("location=\"/tmp/take \\\"1\\\".webm\""));
        assert!(!launch.contains("name=audio"));
    }

    #[test]
    fn encoder_launch_with_audio_joins_muxer() {
        let launch = encoder_launch(&settings(Some(48_000)));
        assert!(launch.contains("appsrc name=audio"));
        assert!(launch.contains("rate=48000"));
        assert!(launch.ends_with("mux."));
    }

    fn bare_encoder(extra: Option<gst::Element>) -> (GstEncoder, gst::Pipeline) {
        init_gstreamer().unwrap();
        let pipeline = gst::Pipeline::new();
        let video = gst_app::AppSrc::builder().name("video").build();
        pipeline.add(&video).unwrap();
        if let Some(element) = extra {
            pipeline.add(&element).unwrap();
        }
        let encoder = GstEncoder {
            settings: settings(None),
            pipeline: Arc::new(LaunchedPipeline {
                name: "encoder",
                pipeline: pipeline.clone(),
            }),
            video,
            audio: None,
            closed: false,
        };
        (encoder, pipeline)
    }

    #[tokio::test]
    async fn failed_finish_leaves_encoder_abortable() {
        // A filesink without a location cannot leave Null.
        let sink = gst::ElementFactory::make("filesink").build().unwrap();
        let (mut encoder, pipeline) = bare_encoder(Some(sink));

        assert!(encoder.finish().await.is_err());
        assert!(!encoder.closed);
        encoder.abort();
        assert!(encoder.closed);
        assert_eq!(pipeline.current_state(), gst::State::Null);
    }

    #[test]
    fn dropped_encoder_stops_pipeline() {
        let (encoder, pipeline) = bare_encoder(None);
        pipeline.set_state(gst::State::Ready).unwrap();
        assert_eq!(pipeline.current_state(), gst::State::Ready);
        drop(encoder);
        assert_eq!(pipeline.current_state(), gst::State::Null);
    }

    #[test]
    fn capture_launch_ends_in_rgba_appsink() {
        let launch = capture_launch("ximagesrc use-damage=false");
        assert!(launch.starts_with("ximagesrc use-damage=false !"));
        assert!(launch.contains("format=RGBA ! appsink name=frames"));
        assert!(microphone_launch("autoaudiosrc", 44_100).contains("channels=1,rate=44100"));
    }

    #[test]
    fn permission_errors_are_classified() {
        assert!(matches!(
            classify_source_error("Access denied by portal"),
            SwingError::Permission { .. }
        ));
        assert!(matches!(
            classify_source_error("Could not open display"),
            SwingError::Capture { .. }
        ));
    }

    #[test]
    fn f32_samples_decode_little_endian() {
        let bytes: Vec<u8> = [0.5f32, -1.0].iter().copied().flat_map(f32::to_le_bytes).collect();
        assert_eq!(f32_samples(&bytes), vec![0.5, -1.0]);
    }
}
