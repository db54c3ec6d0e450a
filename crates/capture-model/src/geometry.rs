//! Capture geometry and the crop resolver.
//!
//! Capture dimensions are volatile: the platform may renegotiate the
//! capture resolution mid-session (window resize, display change). Callers
//! must read a fresh [`CaptureGeometry`] for every frame and resolve again;
//! nothing here caches across calls.

use serde::{Deserialize, Serialize};

use crate::broadcast::BroadcastedRect;
use crate::crop::CropRectangle;

/// What kind of surface the user chose to share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisplaySurfaceKind {
    Monitor,
    Window,
    Browser,
    #[default]
    Unknown,
}

/// Snapshot of the live capture stream's dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureGeometry {
    /// Capture width in physical pixels.
    pub capture_width: u32,
    /// Capture height in physical pixels.
    pub capture_height: u32,
    /// Ratio of physical to logical pixels.
    pub device_pixel_ratio: f64,
    pub display_surface: DisplaySurfaceKind,
}

impl CaptureGeometry {
    pub fn new(
        capture_width: u32,
        capture_height: u32,
        device_pixel_ratio: f64,
        display_surface: DisplaySurfaceKind,
    ) -> Self {
        Self {
            capture_width,
            capture_height,
            device_pixel_ratio,
            display_surface,
        }
    }

    /// Device pixel ratio, treating non-finite or non-positive values as 1.
    pub fn dpr(&self) -> f64 {
        if self.device_pixel_ratio.is_finite() && self.device_pixel_ratio > 0.0 {
            self.device_pixel_ratio
        } else {
            1.0
        }
    }

    /// Capture size in logical pixels.
    pub fn logical_size(&self) -> (u32, u32) {
        let dpr = self.dpr();
        (
            (self.capture_width as f64 / dpr).floor() as u32,
            (self.capture_height as f64 / dpr).floor() as u32,
        )
    }

    fn validate(&self) -> Result<(), GeometryError> {
        if self.capture_width == 0 || self.capture_height == 0 {
            return Err(GeometryError::EmptyCapture {
                width: self.capture_width,
                height: self.capture_height,
            });
        }
        Ok(())
    }
}

/// A rectangle in capture-pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRect {
    pub sx: u32,
    pub sy: u32,
    pub sw: u32,
    pub sh: u32,
}

impl SourceRect {
    /// The whole capture frame.
    pub fn full(geometry: &CaptureGeometry) -> Self {
        Self {
            sx: 0,
            sy: 0,
            sw: geometry.capture_width,
            sh: geometry.capture_height,
        }
    }

    pub fn right(&self) -> u32 {
        self.sx + self.sw
    }

    pub fn bottom(&self) -> u32 {
        self.sy + self.sh
    }

    /// Whether this rectangle lies entirely within the capture frame.
    pub fn fits(&self, geometry: &CaptureGeometry) -> bool {
        self.sw > 0
            && self.sh > 0
            && self.right() <= geometry.capture_width
            && self.bottom() <= geometry.capture_height
    }
}

/// Why a crop could not be mapped onto the capture frame.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("no capture geometry available")]
    NoCaptureGeometry,

    #[error("capture frame is empty ({width}x{height})")]
    EmptyCapture { width: u32, height: u32 },

    #[error("no crop broadcast received yet")]
    NoBroadcast,

    #[error("broadcast rectangle lies outside the capture frame")]
    OutsideCapture,
}

/// Resolve a logical crop against a geometry snapshot, failing when no
/// snapshot is available.
pub fn resolve(
    crop: &CropRectangle,
    geometry: Option<&CaptureGeometry>,
) -> Result<SourceRect, GeometryError> {
    let geometry = geometry.ok_or(GeometryError::NoCaptureGeometry)?;
    resolve_crop(crop, geometry)
}

/// Map a logical crop onto absolute capture pixels.
///
/// The crop is scaled by the device pixel ratio and clamped to the capture
/// size. The capture area is assumed centered on the logical viewport, so
/// the normalized offset moves the crop within the margins left over on
/// each axis.
pub fn resolve_crop(
    crop: &CropRectangle,
    geometry: &CaptureGeometry,
) -> Result<SourceRect, GeometryError> {
    geometry.validate()?;
    let dpr = geometry.dpr();
    let (cw, ch) = (geometry.capture_width, geometry.capture_height);

    let desired_w = cw.min((crop.width as f64 * dpr).round() as u32).max(1);
    let desired_h = ch.min((crop.height as f64 * dpr).round() as u32).max(1);

    let sx = place_on_axis(cw, desired_w, crop.offset_x);
    let sy = place_on_axis(ch, desired_h, crop.offset_y);

    Ok(SourceRect {
        sx,
        sy,
        sw: desired_w,
        sh: desired_h,
    })
}

fn place_on_axis(capture: u32, desired: u32, offset: f64) -> u32 {
    let margin = ((capture as f64 - desired as f64) / 2.0).max(0.0);
    let offset = if offset.is_finite() {
        offset.clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let max_start = capture.saturating_sub(desired) as f64;
    (margin + offset * margin).floor().clamp(0.0, max_start) as u32
}

/// Translate a broadcast element rectangle into capture pixels.
///
/// The platform centers the sender's viewport inside the capture frame, so
/// `(capture_center - viewport_center)` is added before the element's
/// `left`/`top` are read as capture coordinates. The result is clipped to
/// the capture frame.
pub fn resolve_broadcast(
    rect: &BroadcastedRect,
    geometry: &CaptureGeometry,
) -> Result<SourceRect, GeometryError> {
    geometry.validate()?;
    let dpr = geometry.dpr();
    let cw = geometry.capture_width as f64;
    let ch = geometry.capture_height as f64;

    let offset_x = cw / 2.0 - rect.viewport_width * dpr / 2.0;
    let offset_y = ch / 2.0 - rect.viewport_height * dpr / 2.0;

    let x1 = (rect.left * dpr + offset_x).max(0.0);
    let y1 = (rect.top * dpr + offset_y).max(0.0);
    let x2 = ((rect.left + rect.width) * dpr + offset_x).min(cw);
    let y2 = ((rect.top + rect.height) * dpr + offset_y).min(ch);

    if !(x2 - x1 >= 1.0 && y2 - y1 >= 1.0) {
        return Err(GeometryError::OutsideCapture);
    }

    let sx = x1.floor() as u32;
    let sy = y1.floor() as u32;
    let sw = ((x2.floor() as u32).saturating_sub(sx)).max(1);
    let sh = ((y2.floor() as u32).saturating_sub(sy)).max(1);
    Ok(SourceRect { sx, sy, sw, sh })
}
