//! Swingcast Compression
//!
//! Brings a recorded segment under the upload size ceiling.
//!
//! ```text
//! segment.webm ── size ≤ threshold ───────────────────────────► unchanged
//!      │
//!      └─ probe duration ─► bitrate plan ─► re-encode ─► ≤ hard limit ─► done
//!                               ▲                │
//!                               └── 720p retry ◄─┘ (once)
//! ```

pub mod pipeline;
pub mod plan;
pub mod transcode;

pub use pipeline::*;
pub use plan::*;
pub use transcode::{FfmpegTranscoder, MediaInfo, TranscodeJob, Transcoder};
