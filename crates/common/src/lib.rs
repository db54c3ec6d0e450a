//! Swingcast Common Utilities
//!
//! Shared infrastructure for all Swingcast crates:
//! - Error taxonomy and result aliases
//! - Clocks for elapsed-time accounting and frame pacing
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
