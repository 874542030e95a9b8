//! Viewport-driven reconciliation of cluster index results against the
//! overlays currently on the map.

use std::collections::BTreeMap;
use std::sync::Arc;

use cluster::index::{ClusterNotFoundError, ClusterOrPoint};
use cluster::snapshot::IndexSnapshot;
use foundation::ids::{ClusterId, PointId};
use foundation::math::precision::StableF64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::surface::{MapSurface, Overlay, OverlayHandle, ViewportBounds};
use crate::symbology::MarkerStyle;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Cluster markers and single-point pins.
    #[default]
    Clustered,
    /// Every visible feature with its exact geometry.
    Features,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub mode: RenderMode,
    /// Padding applied when auto-fitting to the loaded data (px).
    pub fit_padding_px: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            mode: RenderMode::Clustered,
            fit_padding_px: 20,
        }
    }
}

/// Identity of an overlay across rebuilds.
///
/// Clusters are keyed by content, not by `ClusterId`: ids change with every
/// rebuild, but a cluster at the same centroid with the same count is the
/// same marker on screen. A kept cluster's overlay is refreshed with its
/// current id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OverlayKey {
    Cluster { lon: StableF64, lat: StableF64, count: u32 },
    Point(PointId),
    Feature(PointId),
}

#[derive(Debug, Copy, Clone)]
struct Drawn {
    handle: OverlayHandle,
    cluster: Option<ClusterId>,
    position: [f64; 2],
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub added: usize,
    pub removed: usize,
    pub kept: usize,
}

pub struct ViewportRenderer<S: MapSurface> {
    surface: S,
    config: RendererConfig,
    drawn: BTreeMap<OverlayKey, Drawn>,
    snapshot: Option<Arc<IndexSnapshot>>,
    fitted: bool,
}

impl<S: MapSurface> ViewportRenderer<S> {
    pub fn new(surface: S, config: RendererConfig) -> Self {
        Self {
            surface,
            config,
            drawn: BTreeMap::new(),
            snapshot: None,
            fitted: false,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn mode(&self) -> RenderMode {
        self.config.mode
    }

    /// Switch modes; overlays are replaced on the next pass.
    pub fn set_mode(&mut self, mode: RenderMode) -> Option<RenderStats> {
        self.config.mode = mode;
        self.redraw()
    }

    pub fn drawn_len(&self) -> usize {
        self.drawn.len()
    }

    pub fn has_fitted(&self) -> bool {
        self.fitted
    }

    /// Drop every overlay and per-session state.
    pub fn reset_session(&mut self) {
        for (_, d) in std::mem::take(&mut self.drawn) {
            self.surface.remove_overlay(d.handle);
        }
        self.snapshot = None;
        self.fitted = false;
    }

    /// A new batch was indexed. Auto-fits on the first batch with bounds in
    /// a session, then reconciles. `None` when the map is not mounted.
    pub fn render(&mut self, snapshot: &Arc<IndexSnapshot>) -> Option<RenderStats> {
        self.snapshot = Some(Arc::clone(snapshot));
        self.surface.viewport()?;

        if !self.fitted {
            if let Some(bounds) = snapshot.bounds {
                self.surface.fit_bounds(bounds, self.config.fit_padding_px);
                self.fitted = true;
                info!(
                    west = bounds.min[0],
                    south = bounds.min[1],
                    east = bounds.max[0],
                    north = bounds.max[1],
                    "fitted map to loaded data"
                );
            }
        }
        self.redraw()
    }

    /// Re-query the last snapshot for the surface's current viewport.
    pub fn redraw(&mut self) -> Option<RenderStats> {
        let viewport = self.surface.viewport()?;
        let snapshot = self.snapshot.clone()?;
        Some(self.reconcile(&snapshot, viewport))
    }

    fn reconcile(&mut self, snapshot: &IndexSnapshot, viewport: ViewportBounds) -> RenderStats {
        let zoom = match self.config.mode {
            RenderMode::Clustered => viewport.zoom,
            RenderMode::Features => snapshot.clusters.options().max_zoom.saturating_add(1),
        };

        let mut wanted: BTreeMap<OverlayKey, (Overlay, Option<ClusterId>)> = BTreeMap::new();
        for item in snapshot.clusters.query(&viewport.bounds, zoom) {
            if let Some((key, overlay, cluster)) = self.overlay_for(snapshot, item) {
                wanted.entry(key).or_insert((overlay, cluster));
            }
        }

        let mut stats = RenderStats::default();
        let gone: Vec<OverlayKey> = self
            .drawn
            .keys()
            .filter(|k| !wanted.contains_key(k))
            .copied()
            .collect();
        for key in gone {
            if let Some(d) = self.drawn.remove(&key) {
                self.surface.remove_overlay(d.handle);
                stats.removed += 1;
            }
        }

        for (key, (overlay, cluster)) in wanted {
            match self.drawn.get_mut(&key) {
                Some(d) => {
                    if d.cluster != cluster {
                        self.surface.update_overlay(d.handle, &overlay);
                        d.cluster = cluster;
                    }
                    stats.kept += 1;
                }
                None => {
                    let handle = self.surface.add_overlay(&overlay);
                    let position = overlay_position(&overlay);
                    self.drawn.insert(
                        key,
                        Drawn {
                            handle,
                            cluster,
                            position,
                        },
                    );
                    stats.added += 1;
                }
            }
        }

        debug!(
            zoom,
            generation = snapshot.generation(),
            added = stats.added,
            removed = stats.removed,
            kept = stats.kept,
            "viewport reconciled"
        );
        stats
    }

    fn overlay_for(
        &self,
        snapshot: &IndexSnapshot,
        item: ClusterOrPoint,
    ) -> Option<(OverlayKey, Overlay, Option<ClusterId>)> {
        match item {
            ClusterOrPoint::Cluster(c) => {
                let key = OverlayKey::Cluster {
                    lon: StableF64(c.lon),
                    lat: StableF64(c.lat),
                    count: c.count,
                };
                let overlay = Overlay::Cluster {
                    position: [c.lon, c.lat],
                    count: c.count,
                    cluster: c.id,
                    style: MarkerStyle::for_count(c.count),
                };
                Some((key, overlay, Some(c.id)))
            }
            ClusterOrPoint::Leaf(leaf) => match self.config.mode {
                RenderMode::Clustered => Some((
                    OverlayKey::Point(leaf.point_id),
                    Overlay::Point {
                        point_id: leaf.point_id,
                        position: [leaf.lon, leaf.lat],
                    },
                    None,
                )),
                RenderMode::Features => {
                    let feature = snapshot.features.get(leaf.point_id)?;
                    Some((
                        OverlayKey::Feature(leaf.point_id),
                        Overlay::Feature {
                            point_id: leaf.point_id,
                            feature: Arc::clone(feature),
                        },
                        None,
                    ))
                }
            },
        }
    }

    /// The cluster currently drawn with `handle`, if any.
    pub fn cluster_for(&self, handle: OverlayHandle) -> Option<ClusterId> {
        self.drawn
            .values()
            .find(|d| d.handle == handle)
            .and_then(|d| d.cluster)
    }

    /// Zoom the map to where `id` splits apart.
    ///
    /// A stale or unknown id leaves the view untouched.
    pub fn click_cluster(&mut self, id: ClusterId) -> Result<u8, ClusterNotFoundError> {
        let result = self.expansion_target(id);
        match result {
            Ok((center, zoom)) => {
                self.surface.set_view(center, zoom);
                debug!(cluster = %id, zoom, "zoomed into cluster");
            }
            Err(_) => debug!(cluster = %id, "ignoring click on stale cluster"),
        }
        result.map(|(_, zoom)| zoom)
    }

    fn expansion_target(&self, id: ClusterId) -> Result<([f64; 2], u8), ClusterNotFoundError> {
        let snapshot = self.snapshot.as_ref().ok_or(ClusterNotFoundError(id))?;
        let drawn = self
            .drawn
            .values()
            .find(|d| d.cluster == Some(id))
            .ok_or(ClusterNotFoundError(id))?;
        let zoom = snapshot.clusters.expansion_zoom(id)?;
        Ok((drawn.position, zoom))
    }
}

fn overlay_position(overlay: &Overlay) -> [f64; 2] {
    match overlay {
        Overlay::Cluster { position, .. } | Overlay::Point { position, .. } => *position,
        Overlay::Feature { feature, .. } => feature
            .geometry
            .as_ref()
            .and_then(|g| g.envelope().center())
            .unwrap_or([0.0, 0.0]),
    }
}
