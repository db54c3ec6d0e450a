//! Error types shared across Swingcast crates.

use std::path::PathBuf;

/// Top-level error type for Swingcast operations.
///
/// Permission failures downgrade functionality where a fallback exists.
/// Upload failures carry the raw server response.
#[derive(Debug, thiserror::Error)]
pub enum SwingError {
    #[error("Permission denied: {message}")]
    Permission { message: String },

    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Encoding error: {message}")]
    Encoding { message: String },

    #[error("Compression error: {message}")]
    Compression { message: String },

    #[error(
        "Recording is {size_mb:.1} MB, above the {limit_mb:.0} MB upload limit even after compression. Please record a shorter take (under 3 minutes recommended)."
    )]
    TooLarge {
        size_bytes: u64,
        limit_bytes: u64,
        size_mb: f64,
        limit_mb: f64,
    },

    #[error("Upload failed: {status} {body}")]
    Upload { status: u16, body: String },

    #[error("Upload transport error: {message}")]
    Transport { message: String },

    #[error("Cannot {action} while {state}")]
    InvalidState { state: String, action: String },

    #[error("{message}")]
    Validation { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SwingError.
pub type SwingResult<T> = Result<T, SwingError>;

impl SwingError {
    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission {
            message: msg.into(),
        }
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding {
            message: msg.into(),
        }
    }

    pub fn compression(msg: impl Into<String>) -> Self {
        Self::Compression {
            message: msg.into(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
        }
    }

    /// A precondition the user has to fix, shown verbatim.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    pub fn too_large(size_bytes: u64, limit_bytes: u64) -> Self {
        Self::TooLarge {
            size_bytes,
            limit_bytes,
            size_mb: size_bytes as f64 / BYTES_PER_MB,
            limit_mb: limit_bytes as f64 / BYTES_PER_MB,
        }
    }

    pub fn invalid_state(state: impl std::fmt::Debug, action: impl Into<String>) -> Self {
        Self::InvalidState {
            state: format!("{state:?}"),
            action: action.into(),
        }
    }
}

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
