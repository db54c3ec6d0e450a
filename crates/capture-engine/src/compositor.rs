//! Frame Compositor.
//!
//! Each tick reads the newest capture frame, resolves the crop against the
//! capture geometry of that same moment, and draws the region into the
//! fixed-size [`RasterSurface`]. When no valid crop can be resolved the
//! raster shows an explicit diagnostic pattern instead of a guess.

use std::collections::HashSet;

use serde::Serialize;
use swingcast_capture_model::{
    resolve_broadcast, resolve_crop, CaptureGeometry, CropConfig, CropRectangle, GeometryError,
    LockedRect, SourceRect,
};
use swingcast_common::clock::RateController;

use crate::media::{CaptureStream, VideoFrame};
use crate::raster::RasterSurface;
use crate::sync::CropReceiver;

/// Interval between debug snapshots.
pub const SNAPSHOT_INTERVAL_MS: u64 = 200;

/// Where the compositor takes its crop from.
pub enum CropSource {
    /// A crop configured locally and applied before recording.
    Applied(CropConfig),
    /// Rectangles announced by the analyzer surface.
    Broadcast(CropReceiver),
}

/// Which branch produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotSource {
    Locked,
    Applied,
    /// The desired crop exceeded the capture; the native source was used.
    NativeFallback,
    Broadcast,
}

/// Debug view of one compositing decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositorSnapshot {
    pub capture: CaptureGeometry,
    pub applied: Option<CropRectangle>,
    pub locked: Option<LockedRect>,
    pub desired: (u32, u32),
    pub margins: (u32, u32),
    pub crop_origin: (u32, u32),
    pub output: (u32, u32),
    pub source: SnapshotSource,
}

/// Per-session diagnostic bookkeeping.
#[derive(Debug)]
pub struct DiagnosticState {
    emitted: HashSet<&'static str>,
    snapshot_rate: RateController,
    last_snapshot: Option<CompositorSnapshot>,
    last_error: Option<GeometryError>,
    diagnostic_frames: u64,
}

impl DiagnosticState {
    pub fn new() -> Self {
        Self {
            emitted: HashSet::new(),
            snapshot_rate: RateController::with_interval_ms(SNAPSHOT_INTERVAL_MS),
            last_snapshot: None,
            last_error: None,
            diagnostic_frames: 0,
        }
    }

    /// True the first time `key` is seen since the last reset.
    pub fn first_time(&mut self, key: &'static str) -> bool {
        self.emitted.insert(key)
    }

    pub fn last_snapshot(&self) -> Option<&CompositorSnapshot> {
        self.last_snapshot.as_ref()
    }

    /// The geometry error currently shown, if any.
    pub fn last_error(&self) -> Option<&GeometryError> {
        self.last_error.as_ref()
    }

    /// Number of diagnostic frames drawn.
    pub fn diagnostic_frames(&self) -> u64 {
        self.diagnostic_frames
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for DiagnosticState {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one compositor tick.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// The source has no frame yet. Nothing was drawn.
    NotReady,
    /// Same frame and region as last tick. Nothing was drawn.
    Unchanged,
    Drawn(SourceRect),
    Diagnostic(GeometryError),
}

impl FrameOutcome {
    /// Whether the raster changed and should be handed to the encoder.
    pub fn is_fresh(&self) -> bool {
        matches!(self, FrameOutcome::Drawn(_) | FrameOutcome::Diagnostic(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum DrawKey {
    Frame { sequence: u64, rect: SourceRect },
    Diagnostic(GeometryError),
}

struct Resolved {
    rect: SourceRect,
    source: SnapshotSource,
    applied: Option<CropRectangle>,
    locked: Option<LockedRect>,
}

pub struct FrameCompositor {
    source: CropSource,
    raster: RasterSurface,
    diagnostics: DiagnosticState,
    debug: bool,
    last_key: Option<DrawKey>,
}

impl FrameCompositor {
    pub fn new(source: CropSource, output: (u32, u32), debug: bool) -> Self {
        Self {
            source,
            raster: RasterSurface::new(output.0, output.1),
            diagnostics: DiagnosticState::new(),
            debug,
            last_key: None,
        }
    }

    /// Raster size for a take: the locked rectangle if one exists, else the
    /// crop resolved against the current geometry, else the logical crop.
    pub fn output_size_for(crop: &CropConfig, geometry: Option<&CaptureGeometry>) -> (u32, u32) {
        if let Some(locked) = crop.locked() {
            return (locked.w, locked.h);
        }
        let applied = crop.applied().unwrap_or_else(|| crop.preset());
        match geometry.map(|g| resolve_crop(&applied, g)) {
            Some(Ok(rect)) => (rect.sw, rect.sh),
            _ => (applied.width, applied.height),
        }
    }

    pub fn raster(&self) -> &RasterSurface {
        &self.raster
    }

    pub fn diagnostics(&self) -> &DiagnosticState {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut DiagnosticState {
        &mut self.diagnostics
    }

    /// Copy the raster out for the encoder.
    pub fn current_frame(&self, sequence: u64) -> VideoFrame {
        self.raster.snapshot(sequence)
    }

    /// Blank the raster and forget the last drawn frame.
    pub fn clear(&mut self) {
        self.raster.clear([0, 0, 0, 255]);
        self.last_key = None;
    }

    /// Composite one tick. Calling this before the source is ready is a
    /// no-op.
    pub fn draw_frame(&mut self, capture: &dyn CaptureStream, now_ms: u64) -> FrameOutcome {
        let Some(frame) = capture.latest_frame() else {
            return FrameOutcome::NotReady;
        };
        let Some(geometry) = capture.geometry() else {
            return self.show_diagnostic(GeometryError::NoCaptureGeometry);
        };

        let resolved = match self.resolve(&geometry) {
            Ok(resolved) => resolved,
            Err(e) => return self.show_diagnostic(e),
        };

        let key = DrawKey::Frame {
            sequence: frame.sequence,
            rect: resolved.rect,
        };
        if self.last_key.as_ref() == Some(&key) {
            return FrameOutcome::Unchanged;
        }

        if self.raster.draw_region(&frame, resolved.rect).is_none() {
            return self.show_diagnostic(GeometryError::OutsideCapture);
        }
        self.last_key = Some(key);
        self.diagnostics.last_error = None;

        if self.debug && self.diagnostics.snapshot_rate.should_tick(now_ms) {
            self.record_snapshot(&geometry, &resolved);
        }
        FrameOutcome::Drawn(resolved.rect)
    }

    fn resolve(&mut self, geometry: &CaptureGeometry) -> Result<Resolved, GeometryError> {
        match &mut self.source {
            CropSource::Broadcast(receiver) => {
                let rect = receiver.current().ok_or(GeometryError::NoBroadcast)?;
                Ok(Resolved {
                    rect: resolve_broadcast(&rect, geometry)?,
                    source: SnapshotSource::Broadcast,
                    applied: None,
                    locked: None,
                })
            }
            CropSource::Applied(config) => {
                let applied = config.applied().unwrap_or_else(|| config.preset());
                let locked = config.locked();
                if let Some(l) = locked {
                    if let Some(rect) = l.source_rect_for(geometry) {
                        return Ok(Resolved {
                            rect,
                            source: SnapshotSource::Locked,
                            applied: Some(applied),
                            locked,
                        });
                    }
                    if self.diagnostics.first_time("locked-rect-stale") {
                        tracing::info!(
                            locked_width = l.geometry.capture_width,
                            locked_height = l.geometry.capture_height,
                            width = geometry.capture_width,
                            height = geometry.capture_height,
                            "Capture geometry changed since the crop was locked; resolving per frame"
                        );
                    }
                }

                let rect = resolve_crop(&applied, geometry)?;
                let dpr = geometry.dpr();
                let clamped = (applied.width as f64 * dpr).round() as u32 > geometry.capture_width
                    || (applied.height as f64 * dpr).round() as u32 > geometry.capture_height;
                if self.diagnostics.first_time("crop-resolved") {
                    tracing::info!(
                        capture_width = geometry.capture_width,
                        capture_height = geometry.capture_height,
                        dpr,
                        crop_width = applied.width,
                        crop_height = applied.height,
                        offset_x = applied.offset_x,
                        offset_y = applied.offset_y,
                        "Resolved crop against capture"
                    );
                }
                Ok(Resolved {
                    rect,
                    source: if clamped {
                        SnapshotSource::NativeFallback
                    } else {
                        SnapshotSource::Applied
                    },
                    applied: Some(applied),
                    locked: None,
                })
            }
        }
    }

    fn show_diagnostic(&mut self, error: GeometryError) -> FrameOutcome {
        let key = DrawKey::Diagnostic(error.clone());
        if self.last_key.as_ref() == Some(&key) {
            return FrameOutcome::Unchanged;
        }
        if self.diagnostics.first_time(diagnostic_key(&error)) {
            tracing::warn!(%error, "Compositing diagnostic frame");
        }
        self.raster.draw_diagnostic();
        self.diagnostics.diagnostic_frames += 1;
        self.diagnostics.last_error = Some(error.clone());
        self.last_key = Some(key);
        FrameOutcome::Diagnostic(error)
    }

    fn record_snapshot(&mut self, geometry: &CaptureGeometry, resolved: &Resolved) {
        let rect = resolved.rect;
        let snapshot = CompositorSnapshot {
            capture: *geometry,
            applied: resolved.applied,
            locked: resolved.locked,
            desired: (rect.sw, rect.sh),
            margins: (
                geometry.capture_width.saturating_sub(rect.sw) / 2,
                geometry.capture_height.saturating_sub(rect.sh) / 2,
            ),
            crop_origin: (rect.sx, rect.sy),
            output: (self.raster.width(), self.raster.height()),
            source: resolved.source,
        };
        tracing::debug!(snapshot = ?snapshot, "Compositor snapshot");
        self.diagnostics.last_snapshot = Some(snapshot);
    }
}

fn diagnostic_key(error: &GeometryError) -> &'static str {
    match error {
        GeometryError::NoCaptureGeometry => "no-capture-geometry",
        GeometryError::EmptyCapture { .. } => "empty-capture",
        GeometryError::NoBroadcast => "no-broadcast",
        GeometryError::OutsideCapture => "outside-capture",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::CropBroadcastHub;
    use crate::testing::FakeCapture;
    use swingcast_capture_model::{BroadcastedRect, DisplaySurfaceKind, SessionId};

    fn applied_config(geometry: Option<&CaptureGeometry>) -> CropConfig {
        let mut config = CropConfig::new(CropRectangle::from_height(180), 25);
        config.apply(geometry);
        config
    }

    fn window(w: u32, h: u32) -> CaptureGeometry {
        CaptureGeometry::new(w, h, 1.0, DisplaySurfaceKind::Window)
    }

    #[test]
    fn test_not_ready_is_noop() {
        let capture = FakeCapture::new(window(640, 360));
        capture.clear_frame();
        let mut compositor =
            FrameCompositor::new(CropSource::Applied(applied_config(None)), (320, 180), false);
        assert_eq!(compositor.draw_frame(capture.as_ref(), 0), FrameOutcome::NotReady);
        assert_eq!(compositor.diagnostics().diagnostic_frames(), 0);
    }

    #[test]
    fn test_applied_crop_resolves_each_frame() {
        let capture = FakeCapture::new(window(640, 360));
        let mut compositor =
            FrameCompositor::new(CropSource::Applied(applied_config(None)), (320, 180), true);

        let outcome = compositor.draw_frame(capture.as_ref(), 0);
        assert_eq!(outcome, FrameOutcome::Drawn(SourceRect { sx: 160, sy: 90, sw: 320, sh: 180 }));
        assert_eq!(compositor.draw_frame(capture.as_ref(), 10), FrameOutcome::Unchanged);

        capture.set_geometry(Some(window(1280, 720)));
        let outcome = compositor.draw_frame(capture.as_ref(), 20);
        assert_eq!(outcome, FrameOutcome::Drawn(SourceRect { sx: 480, sy: 270, sw: 320, sh: 180 }));

        let snapshot = compositor.diagnostics().last_snapshot().unwrap();
        assert_eq!(snapshot.source, SnapshotSource::Applied);
        assert_eq!(snapshot.output, (320, 180));
    }

    #[test]
    fn test_locked_crop_reresolves_after_capture_resize() {
        let geometry = window(1920, 1080);
        let capture = FakeCapture::new(geometry);
        let mut config = CropConfig::default();
        config.apply(Some(&geometry));
        let mut compositor = FrameCompositor::new(CropSource::Applied(config), (1280, 720), true);
        assert_eq!(
            compositor.draw_frame(capture.as_ref(), 0),
            FrameOutcome::Drawn(SourceRect { sx: 320, sy: 180, sw: 1280, sh: 720 })
        );

        let grown = window(2560, 1440);
        capture.set_geometry(Some(grown));
        let expected = resolve_crop(&CropRectangle::default(), &grown).unwrap();
        assert_eq!(expected, SourceRect { sx: 640, sy: 360, sw: 1280, sh: 720 });
        assert_eq!(compositor.draw_frame(capture.as_ref(), 500), FrameOutcome::Drawn(expected));
        assert_eq!(
            compositor.diagnostics().last_snapshot().unwrap().source,
            SnapshotSource::Applied
        );
    }

    #[test]
    fn test_locked_rect_is_used_while_geometry_holds() {
        let geometry = window(640, 360);
        let capture = FakeCapture::new(geometry);
        let config = applied_config(Some(&geometry));
        assert!(config.locked().is_some());
        let mut compositor = FrameCompositor::new(CropSource::Applied(config), (320, 180), true);
        compositor.draw_frame(capture.as_ref(), 0);
        assert_eq!(
            compositor.diagnostics().last_snapshot().unwrap().source,
            SnapshotSource::Locked
        );

        capture.set_geometry(Some(window(400, 200)));
        capture.push_frame();
        assert!(compositor.draw_frame(capture.as_ref(), 500).is_fresh());
        assert_eq!(
            compositor.diagnostics().last_snapshot().unwrap().source,
            SnapshotSource::Applied
        );
    }

    #[test]
    fn test_small_source_uses_native_fallback() {
        let capture = FakeCapture::new(window(200, 100));
        let mut compositor =
            FrameCompositor::new(CropSource::Applied(applied_config(None)), (320, 180), true);
        let outcome = compositor.draw_frame(capture.as_ref(), 0);
        assert_eq!(outcome, FrameOutcome::Drawn(SourceRect { sx: 0, sy: 0, sw: 200, sh: 100 }));
        assert_eq!(
            compositor.diagnostics().last_snapshot().unwrap().source,
            SnapshotSource::NativeFallback
        );
    }

    #[test]
    fn test_missing_geometry_draws_diagnostic() {
        let capture = FakeCapture::new(window(640, 360));
        capture.set_geometry(None);
        let mut compositor =
            FrameCompositor::new(CropSource::Applied(applied_config(None)), (320, 180), false);
        assert_eq!(
            compositor.draw_frame(capture.as_ref(), 0),
            FrameOutcome::Diagnostic(GeometryError::NoCaptureGeometry)
        );
        assert!(compositor.raster().is_diagnostic_pattern());
        assert_eq!(compositor.draw_frame(capture.as_ref(), 16), FrameOutcome::Unchanged);
        assert_eq!(compositor.diagnostics().diagnostic_frames(), 1);
    }

    #[test]
    fn test_broadcast_without_message_is_diagnostic() {
        let hub = CropBroadcastHub::new();
        let session = SessionId::new("diag");
        let receiver = hub.receiver(&session);
        let capture = FakeCapture::new(window(1440, 900));
        let mut compositor =
            FrameCompositor::new(CropSource::Broadcast(receiver), (320, 180), false);

        assert_eq!(
            compositor.draw_frame(capture.as_ref(), 0),
            FrameOutcome::Diagnostic(GeometryError::NoBroadcast)
        );

        hub.sender(&session)
            .publish(BroadcastedRect::new(100.0, 50.0, 640.0, 360.0, 1440.0, 900.0, 1));
        assert_eq!(
            compositor.draw_frame(capture.as_ref(), 16),
            FrameOutcome::Drawn(SourceRect { sx: 100, sy: 50, sw: 640, sh: 360 })
        );
        assert!(compositor.diagnostics().last_error().is_none());
    }

    #[test]
    fn test_diagnostic_state_resets() {
        let mut state = DiagnosticState::new();
        assert!(state.first_time("x"));
        assert!(!state.first_time("x"));
        state.reset();
        assert!(state.first_time("x"));
    }
}
