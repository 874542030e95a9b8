//! The map widget as seen by the renderer.

use std::collections::BTreeMap;
use std::sync::Arc;

use formats::feature::Feature;
use foundation::bounds::Aabb2;
use foundation::ids::{ClusterId, PointId};
use tracing::trace;

use crate::symbology::MarkerStyle;

/// Visible lon/lat rectangle plus integer zoom.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ViewportBounds {
    pub bounds: Aabb2,
    pub zoom: u8,
}

impl ViewportBounds {
    pub fn new(bounds: Aabb2, zoom: u8) -> Self {
        Self { bounds, zoom }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OverlayHandle(pub u64);

/// One drawable thing on the map.
#[derive(Debug, Clone, PartialEq)]
pub enum Overlay {
    Cluster {
        position: [f64; 2],
        count: u32,
        cluster: ClusterId,
        style: MarkerStyle,
    },
    /// A single representative point drawn as a pin.
    Point { point_id: PointId, position: [f64; 2] },
    /// A feature drawn with its exact geometry.
    Feature {
        point_id: PointId,
        feature: Arc<Feature>,
    },
}

/// Map widget primitives. The renderer drives a surface but never owns its
/// lifecycle; `viewport()` returning `None` means the map is not mounted.
pub trait MapSurface: Send {
    fn viewport(&self) -> Option<ViewportBounds>;
    fn add_overlay(&mut self, overlay: &Overlay) -> OverlayHandle;
    fn remove_overlay(&mut self, handle: OverlayHandle);
    /// Replace what `handle` shows without re-adding it.
    fn update_overlay(&mut self, handle: OverlayHandle, overlay: &Overlay);
    fn fit_bounds(&mut self, bounds: Aabb2, padding_px: u32);
    fn set_view(&mut self, center: [f64; 2], zoom: u8);
}

/// Zoom at which `bounds` roughly fills a 256px-per-tile viewport.
pub fn fit_zoom(bounds: &Aabb2, max_zoom: u8) -> u8 {
    let span = bounds
        .width()
        .max(bounds.max[1] - bounds.min[1])
        .max(f64::EPSILON);
    let z = (360.0 / span).log2().floor();
    if z.is_finite() {
        z.clamp(0.0, f64::from(max_zoom)) as u8
    } else {
        0
    }
}

/// In-memory surface that keeps what it was asked to draw.
///
/// Used by the headless viewer and in tests.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    viewport: Option<ViewportBounds>,
    overlays: BTreeMap<OverlayHandle, Overlay>,
    next_handle: u64,
    max_zoom: u8,
    pub fits: Vec<(Aabb2, u32)>,
    pub views: Vec<([f64; 2], u8)>,
}

impl RecordingSurface {
    pub fn mounted(viewport: ViewportBounds) -> Self {
        Self {
            viewport: Some(viewport),
            max_zoom: 20,
            ..Self::default()
        }
    }

    pub fn unmounted() -> Self {
        Self {
            max_zoom: 20,
            ..Self::default()
        }
    }

    /// Simulates the user panning or zooming, or the map mounting.
    pub fn set_viewport(&mut self, viewport: Option<ViewportBounds>) {
        self.viewport = viewport;
    }

    pub fn overlays(&self) -> &BTreeMap<OverlayHandle, Overlay> {
        &self.overlays
    }

    pub fn cluster_overlays(&self) -> impl Iterator<Item = &Overlay> {
        self.overlays
            .values()
            .filter(|o| matches!(o, Overlay::Cluster { .. }))
    }
}

impl MapSurface for RecordingSurface {
    fn viewport(&self) -> Option<ViewportBounds> {
        self.viewport
    }

    fn add_overlay(&mut self, overlay: &Overlay) -> OverlayHandle {
        self.next_handle += 1;
        let handle = OverlayHandle(self.next_handle);
        trace!(handle = handle.0, "overlay added");
        self.overlays.insert(handle, overlay.clone());
        handle
    }

    fn remove_overlay(&mut self, handle: OverlayHandle) {
        trace!(handle = handle.0, "overlay removed");
        self.overlays.remove(&handle);
    }

    fn update_overlay(&mut self, handle: OverlayHandle, overlay: &Overlay) {
        if let Some(slot) = self.overlays.get_mut(&handle) {
            *slot = overlay.clone();
        }
    }

    fn fit_bounds(&mut self, bounds: Aabb2, padding_px: u32) {
        self.fits.push((bounds, padding_px));
        if self.viewport.is_some() {
            self.viewport = Some(ViewportBounds::new(bounds, fit_zoom(&bounds, self.max_zoom)));
        }
    }

    fn set_view(&mut self, center: [f64; 2], zoom: u8) {
        self.views.push((center, zoom));
        let Some(current) = self.viewport else {
            return;
        };
        // Keep the screen size: each zoom step halves the visible span.
        let scale = 2f64.powi(i32::from(current.zoom) - i32::from(zoom));
        let half_w = current.bounds.width() * 0.5 * scale;
        let half_h = (current.bounds.max[1] - current.bounds.min[1]) * 0.5 * scale;
        let bounds = Aabb2::from_wsen(
            center[0] - half_w,
            (center[1] - half_h).max(-90.0),
            center[0] + half_w,
            (center[1] + half_h).min(90.0),
        );
        self.viewport = Some(ViewportBounds::new(bounds, zoom));
    }
}
