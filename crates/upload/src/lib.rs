//! Swingcast Upload
//!
//! Delivers a finished analysis to the submission API:
//!
//! ```text
//! SessionStore ──► submission id ──► POST /api/analysis/upload-to-stream
//!                                          │ uploadUrl
//!                                          ▼
//!                 segment file ──► multipart POST (progress) ──► clear store
//! ```
//!
//! Transport failures are surfaced with the raw status and body and are
//! never retried here.

pub mod orchestrator;
pub mod store;

pub use orchestrator::*;
pub use store::*;
