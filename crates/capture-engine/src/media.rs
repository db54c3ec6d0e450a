//! Media seams between the recording engine and whatever produces and
//! consumes frames.
//!
//! The engine never talks to a capture API directly. It acquires a
//! [`CaptureStream`] and an optional [`MicrophoneStream`] from a
//! [`MediaBackend`] and feeds composited frames into a [`MediaEncoder`].
//! The GStreamer implementation lives in [`crate::gst_backend`].

use std::path::PathBuf;
use std::sync::Arc;

use swingcast_capture_model::CaptureGeometry;
use swingcast_common::error::SwingResult;
use tokio::sync::watch;

/// One RGBA video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA rows, `width * height * 4` bytes.
    pub data: Arc<Vec<u8>>,
    /// Monotonic sequence number assigned by the producer.
    pub sequence: u64,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>, sequence: u64) -> Self {
        Self {
            width,
            height,
            data: Arc::new(data),
            sequence,
        }
    }

    /// A frame filled with one RGBA color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4], sequence: u64) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::new(width, height, data, sequence)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.data
            .get(i..i + 4)
            .map(|p| [p[0], p[1], p[2], p[3]])
    }
}

/// Mono `f32` samples at a fixed rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

/// A live screen capture.
pub trait CaptureStream: Send + Sync {
    /// Current track dimensions. `None` until the stream negotiates caps.
    fn geometry(&self) -> Option<CaptureGeometry>;

    /// Most recent frame, or `None` if the source is not ready yet.
    fn latest_frame(&self) -> Option<VideoFrame>;

    /// Whether the capture carries its own audio (shared tab/system audio).
    fn has_audio(&self) -> bool {
        false
    }

    /// Capture audio received since the last drain.
    fn drain_audio(&self) -> Vec<AudioChunk> {
        Vec::new()
    }

    /// Flips to `true` when the track ends outside our control.
    fn ended(&self) -> watch::Receiver<bool>;

    /// Stop every track of this stream. Must be idempotent.
    fn stop(&self);
}

/// A live microphone.
pub trait MicrophoneStream: Send + Sync {
    /// The newest `len` samples, zero-padded at the front when fewer exist.
    fn recent_samples(&self, len: usize) -> Vec<f32>;

    /// Samples captured since the last drain, for the encoder.
    fn drain_chunks(&self) -> Vec<AudioChunk>;

    /// Stop every track of this stream. Must be idempotent.
    fn stop(&self);
}

/// Parameters for the live encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate_bps: u32,
    /// Sample rate of the single mixed audio track, if any.
    pub audio_sample_rate: Option<u32>,
    pub output_path: PathBuf,
}

/// The file produced by a finished encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mime_type: String,
}

/// Encoder consuming the composited raster and the mixed audio track.
#[async_trait::async_trait]
pub trait MediaEncoder: Send {
    fn start(&mut self) -> SwingResult<()>;

    fn pause(&mut self) -> SwingResult<()>;

    fn resume(&mut self) -> SwingResult<()>;

    fn push_video(&mut self, frame: &VideoFrame) -> SwingResult<()>;

    fn push_audio(&mut self, chunk: &AudioChunk) -> SwingResult<()>;

    /// Flush and finalize the output.
    async fn finish(&mut self) -> SwingResult<EncodedArtifact>;

    /// Release the encoder without finalizing. Must be idempotent.
    fn abort(&mut self);
}

/// Factory for permission-gated media resources.
#[async_trait::async_trait]
pub trait MediaBackend: Send + Sync {
    /// Ask for the screen. May wait on a permission prompt indefinitely.
    async fn acquire_capture(&self) -> SwingResult<Arc<dyn CaptureStream>>;

    /// Ask for the microphone. Denial is reported as a permission error.
    async fn acquire_microphone(&self) -> SwingResult<Arc<dyn MicrophoneStream>>;

    fn create_encoder(&self, settings: &EncoderSettings) -> SwingResult<Box<dyn MediaEncoder>>;
}
