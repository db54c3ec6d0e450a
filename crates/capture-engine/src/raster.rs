//! Fixed-size RGBA drawing target handed to the encoder.

use swingcast_capture_model::SourceRect;

use crate::media::VideoFrame;

const BACKGROUND: [u8; 4] = [0, 0, 0, 255];
const DIAGNOSTIC_A: [u8; 4] = [180, 20, 40, 255];
const DIAGNOSTIC_B: [u8; 4] = [30, 30, 30, 255];
const DIAGNOSTIC_STRIPE: u32 = 24;

/// Where a source region landed on the raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub dx: u32,
    pub dy: u32,
    pub dw: u32,
    pub dh: u32,
}

/// The raster the compositor draws into.
///
/// Its size is fixed for the lifetime of a take. Regions larger than the
/// raster are scaled down to fit; smaller regions are drawn at native size
/// and centered, never upscaled.
#[derive(Debug, Clone)]
pub struct RasterSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RasterSurface {
    /// Create a surface. Dimensions are rounded down to even values (min 2)
    /// for 4:2:0 encoders.
    pub fn new(width: u32, height: u32) -> Self {
        let width = (width & !1).max(2);
        let height = (height & !1).max(2);
        let mut surface = Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        };
        surface.clear(BACKGROUND);
        surface
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn clear(&mut self, rgba: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Draw `rect` of `frame` onto the surface using nearest-neighbour
    /// sampling. Returns `None` if the rectangle misses the frame entirely.
    pub fn draw_region(&mut self, frame: &VideoFrame, rect: SourceRect) -> Option<Placement> {
        // Geometry can lag the frame by one negotiation; clip to what we have.
        let sw = rect.sw.min(frame.width.saturating_sub(rect.sx));
        let sh = rect.sh.min(frame.height.saturating_sub(rect.sy));
        if sw == 0 || sh == 0 || frame.data.len() < frame.width as usize * frame.height as usize * 4
        {
            return None;
        }

        let scale = (self.width as f64 / sw as f64)
            .min(self.height as f64 / sh as f64)
            .min(1.0);
        let dw = ((sw as f64 * scale).round() as u32).clamp(1, self.width);
        let dh = ((sh as f64 * scale).round() as u32).clamp(1, self.height);
        let dx = (self.width - dw) / 2;
        let dy = (self.height - dh) / 2;

        if dw != self.width || dh != self.height {
            self.clear(BACKGROUND);
        }

        let src_stride = frame.width as usize * 4;
        let dst_stride = self.width as usize * 4;
        for row in 0..dh {
            let sy = rect.sy + (row as u64 * sh as u64 / dh as u64) as u32;
            let src_row = sy as usize * src_stride;
            let dst_row = (dy + row) as usize * dst_stride;
            for col in 0..dw {
                let sx = rect.sx + (col as u64 * sw as u64 / dw as u64) as u32;
                let s = src_row + sx as usize * 4;
                let d = dst_row + (dx + col) as usize * 4;
                self.pixels[d..d + 4].copy_from_slice(&frame.data[s..s + 4]);
            }
        }

        Some(Placement { dx, dy, dw, dh })
    }

    /// Paint the diagnostic pattern shown when no valid crop is available.
    pub fn draw_diagnostic(&mut self) {
        let stride = self.width as usize * 4;
        for y in 0..self.height {
            for x in 0..self.width {
                let band = ((x + y) / DIAGNOSTIC_STRIPE) % 2;
                let color = if band == 0 { DIAGNOSTIC_A } else { DIAGNOSTIC_B };
                let i = y as usize * stride + x as usize * 4;
                self.pixels[i..i + 4].copy_from_slice(&color);
            }
        }
    }

    /// Copy the current contents out as a frame.
    pub fn snapshot(&self, sequence: u64) -> VideoFrame {
        VideoFrame::new(self.width, self.height, self.pixels.clone(), sequence)
    }

    pub fn is_diagnostic_pattern(&self) -> bool {
        self.pixels.get(0..4) == Some(&DIAGNOSTIC_A[..])
    }
}
