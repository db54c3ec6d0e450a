//! Element rectangles announced by the analyzer surface.

use serde::{Deserialize, Serialize};

/// Prefix of every crop broadcast channel key.
pub const CHANNEL_PREFIX: &str = "bc-crop-";

/// Identifier shared out-of-band between the analyzer and recorder surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh id derived from the current time, for senders that start
    /// without a pre-shared one.
    pub fn generate() -> Self {
        Self(format!("crop-{}", chrono::Utc::now().timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The channel key both surfaces must agree on.
    pub fn channel_key(&self) -> String {
        format!("{CHANNEL_PREFIX}{}", self.0)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The sender's last-known element bounding box plus its viewport size.
///
/// Coordinates are logical pixels relative to the sender's viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastedRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
    /// Unix milliseconds at publish time.
    pub timestamp: i64,
}

impl BroadcastedRect {
    pub fn new(
        left: f64,
        top: f64,
        width: f64,
        height: f64,
        viewport_width: f64,
        viewport_height: f64,
        timestamp: i64,
    ) -> Self {
        Self {
            left,
            top,
            width,
            height,
            viewport_width,
            viewport_height,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_key() {
        assert_eq!(SessionId::new("abc").channel_key(), "bc-crop-abc");
    }

    #[test]
    fn test_generated_id_has_prefix() {
        assert!(SessionId::generate().as_str().starts_with("crop-"));
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let rect = BroadcastedRect::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7);
        let json = serde_json::to_value(rect).unwrap();
        assert_eq!(json["viewportWidth"], 5.0);
        assert_eq!(json["timestamp"], 7);
    }
}
