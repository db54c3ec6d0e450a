//! Swingcast Capture Engine
//!
//! Turns a live screen capture into a cropped, encoded swing take.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                   RecordingEngine                     │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────────┐  │
//! │  │ CaptureStream│  │ Microphone   │  │ CropSource  │  │
//! │  │              │  │ + LevelMeter │  │ applied or  │  │
//! │  └──────┬───────┘  └──────┬───────┘  │ broadcast   │  │
//! │         │                 │          └──────┬──────┘  │
//! │         ▼                 ▼                 ▼         │
//! │  ┌─────────────┐   ┌────────────┐   ┌──────────────┐  │
//! │  │ Compositor  │   │ AudioMixer │   │ Geometry     │  │
//! │  │ (raster)    │◄──┼────────────┼───┤ Resolver     │  │
//! │  └──────┬──────┘   └─────┬──────┘   └──────────────┘  │
//! │         ▼                ▼                            │
//! │  ┌─────────────────────────────────┐                  │
//! │  │        MediaEncoder (WebM)      │──► Segment       │
//! │  └─────────────────────────────────┘                  │
//! └───────────────────────────────────────────────────────┘
//! ```

pub mod audio_monitor;
pub mod compositor;
pub mod engine;
pub mod gst_backend;
pub mod media;
pub mod mixer;
pub mod raster;
pub mod sync;

#[cfg(test)]
mod testing;

pub use audio_monitor::{test_microphone, AudioLevelMonitor, MicReading, MicStatus};
pub use compositor::{CompositorSnapshot, CropSource, FrameCompositor, FrameOutcome};
pub use engine::{EngineSettings, EngineStatus, RecordingEngine, TokioClock};
pub use gst_backend::{gstreamer_version, GstBackend};
pub use media::*;
pub use sync::{CropBroadcastHub, CropReceiver, CropSender, ElementBounds};
