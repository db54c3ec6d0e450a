//! Logical crop rectangle and the configuration workflow around it.

use serde::{Deserialize, Serialize};

use crate::geometry::{resolve_crop, CaptureGeometry, SourceRect};

/// Smallest crop height, in logical pixels.
pub const MIN_CROP_HEIGHT: u32 = 180;

/// Default stepping increment used by increase/decrease.
pub const DEFAULT_CROP_STEP: u32 = 25;

const ASPECT_W: f64 = 16.0;
const ASPECT_H: f64 = 9.0;

/// The logical region of the capture stream to record.
///
/// `width`/`height` are logical (CSS-like) pixels. `offset_x`/`offset_y`
/// are normalized to `[-1.0, 1.0]` and position the rectangle within the
/// centered capture area: `0.0` is centered, `-1.0` hugs the left/top edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRectangle {
    pub width: u32,
    pub height: u32,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl CropRectangle {
    /// A centered crop of the given size.
    pub fn centered(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    /// A centered 16:9 crop derived from a height, clamped to the minimum.
    pub fn from_height(height: u32) -> Self {
        let height = height.max(MIN_CROP_HEIGHT);
        Self::centered(width_for_height(height), height)
    }

    /// Return a copy with offsets clamped to `[-1.0, 1.0]`.
    pub fn with_offset(self, offset_x: f64, offset_y: f64) -> Self {
        Self {
            offset_x: clamp_offset(offset_x),
            offset_y: clamp_offset(offset_y),
            ..self
        }
    }

    /// Grow or shrink by `delta` logical pixels of height, keeping 16:9.
    ///
    /// The result never drops below [`MIN_CROP_HEIGHT`] and, when `bounds`
    /// (logical capture width/height) are given, never exceeds them.
    pub fn stepped(self, delta: i64, bounds: Option<(u32, u32)>) -> Self {
        let mut height = (self.height as i64 + delta).max(MIN_CROP_HEIGHT as i64) as u32;
        if let Some((max_w, max_h)) = bounds {
            let fit_h = max_h.min((max_w as f64 * ASPECT_H / ASPECT_W).floor() as u32);
            height = height.min(fit_h.max(MIN_CROP_HEIGHT));
        }
        Self {
            width: width_for_height(height),
            height,
            ..self
        }
    }

    pub fn increase(self, step: u32, bounds: Option<(u32, u32)>) -> Self {
        self.stepped(step as i64, bounds)
    }

    pub fn decrease(self, step: u32, bounds: Option<(u32, u32)>) -> Self {
        self.stepped(-(step as i64), bounds)
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

impl Default for CropRectangle {
    fn default() -> Self {
        Self::centered(1280, 720)
    }
}

/// 16:9 width for a given height, rounded to the nearest pixel.
pub fn width_for_height(height: u32) -> u32 {
    (height as f64 * ASPECT_W / ASPECT_H).round() as u32
}

fn clamp_offset(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// A crop already resolved to absolute capture pixels at apply time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LockedRect {
    pub sx: u32,
    pub sy: u32,
    pub w: u32,
    pub h: u32,
    /// Capture geometry the rectangle was resolved against.
    pub geometry: CaptureGeometry,
}

impl LockedRect {
    /// The locked pixels, only while the capture still has the geometry
    /// they were resolved against.
    pub fn source_rect_for(&self, geometry: &CaptureGeometry) -> Option<SourceRect> {
        let rect = SourceRect {
            sx: self.sx,
            sy: self.sy,
            sw: self.w,
            sh: self.h,
        };
        (self.geometry == *geometry && rect.fits(geometry)).then_some(rect)
    }
}

/// Editable crop configuration.
///
/// The preset is what the user is adjusting; the applied crop is what the
/// compositor reads. Applying optionally locks an absolute rectangle when
/// capture dimensions are known at that moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropConfig {
    preset: CropRectangle,
    applied: Option<CropRectangle>,
    locked: Option<LockedRect>,
    step_px: u32,
}

impl CropConfig {
    pub fn new(preset: CropRectangle, step_px: u32) -> Self {
        Self {
            preset,
            applied: None,
            locked: None,
            step_px: step_px.max(1),
        }
    }

    pub fn preset(&self) -> CropRectangle {
        self.preset
    }

    pub fn applied(&self) -> Option<CropRectangle> {
        self.applied
    }

    pub fn locked(&self) -> Option<LockedRect> {
        self.locked
    }

    pub fn is_applied(&self) -> bool {
        self.applied.is_some()
    }

    pub fn increase(&mut self, bounds: Option<(u32, u32)>) {
        self.preset = self.preset.increase(self.step_px, bounds);
    }

    pub fn decrease(&mut self, bounds: Option<(u32, u32)>) {
        self.preset = self.preset.decrease(self.step_px, bounds);
    }

    pub fn set_offset(&mut self, offset_x: f64, offset_y: f64) {
        self.preset = self.preset.with_offset(offset_x, offset_y);
    }

    /// Freeze the preset as the applied crop.
    ///
    /// When `geometry` is known the absolute rectangle is locked so every
    /// frame uses the same pixels; otherwise it resolves per frame.
    pub fn apply(&mut self, geometry: Option<&CaptureGeometry>) -> CropRectangle {
        self.applied = Some(self.preset);
        self.locked = geometry.and_then(|g| {
            resolve_crop(&self.preset, g).ok().map(|r| LockedRect {
                sx: r.sx,
                sy: r.sy,
                w: r.sw,
                h: r.sh,
                geometry: *g,
            })
        });
        self.preset
    }

    /// Restore the default centered 1280x720 preset and clear applied state.
    pub fn reset(&mut self) {
        self.preset = CropRectangle::default();
        self.applied = None;
        self.locked = None;
    }
}

impl Default for CropConfig {
    fn default() -> Self {
        Self::new(CropRectangle::default(), DEFAULT_CROP_STEP)
    }
}
