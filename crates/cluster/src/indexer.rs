use std::sync::Arc;

use formats::feature::Feature;
use foundation::bounds::Aabb2;
use foundation::ids::PointId;
use tracing::debug;

use crate::representative::representative_point;

/// A feature's stand-in location for clustering.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RepresentativePoint {
    pub point_id: PointId,
    pub lon: f64,
    pub lat: f64,
}

/// `PointId -> Feature` for one session. Rows are only ever appended.
#[derive(Debug, Default, Clone)]
pub struct FeatureTable {
    rows: Vec<Arc<Feature>>,
}

impl FeatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: PointId) -> Option<&Arc<Feature>> {
        self.rows.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Arc<Feature>] {
        &self.rows
    }

    fn next_id(&self) -> Option<PointId> {
        u32::try_from(self.rows.len()).ok().map(PointId)
    }

    fn clear(&mut self) {
        self.rows.clear();
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub received: usize,
    pub indexed: usize,
    pub skipped: usize,
}

/// Turns incoming features into representative points.
///
/// Owns the session's feature table, the points buffer, and the running
/// bounding box of every point seen. Point ids are sequential from zero, so
/// the buffer and the table always have the same length.
#[derive(Debug, Default)]
pub struct GeometryIndexer {
    table: FeatureTable,
    points: Vec<RepresentativePoint>,
    bounds: Aabb2,
}

impl GeometryIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything; used when a new session starts.
    pub fn reset(&mut self) {
        self.table.clear();
        self.points.clear();
        self.bounds = Aabb2::empty();
    }

    /// Index one batch. Features without a usable geometry are dropped.
    pub fn ingest(&mut self, batch: Vec<Feature>) -> BatchSummary {
        let mut summary = BatchSummary {
            received: batch.len(),
            ..BatchSummary::default()
        };

        for feature in batch {
            let point = match representative_point(&feature) {
                Ok(p) => p,
                Err(err) => {
                    debug!(%err, "skipping feature");
                    summary.skipped += 1;
                    continue;
                }
            };
            let Some(point_id) = self.table.next_id() else {
                debug!(feature_id = feature.id, "point id space exhausted");
                summary.skipped += 1;
                continue;
            };

            self.table.rows.push(Arc::new(feature));
            self.points.push(RepresentativePoint {
                point_id,
                lon: point.lon_deg,
                lat: point.lat_deg,
            });
            self.bounds.extend_point([point.lon_deg, point.lat_deg]);
            summary.indexed += 1;
        }

        summary
    }

    pub fn table(&self) -> &FeatureTable {
        &self.table
    }

    pub fn points(&self) -> &[RepresentativePoint] {
        &self.points
    }

    /// Bounding box of all points so far, or `None` before the first point.
    pub fn bounds(&self) -> Option<Aabb2> {
        if self.bounds.is_empty() {
            None
        } else {
            Some(self.bounds)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchSummary, GeometryIndexer};
    use formats::feature::{Feature, GeoPoint, Geometry};
    use foundation::bounds::Aabb2;
    use foundation::ids::PointId;
    use serde_json::Map;

    fn point(id: u64, lon: f64, lat: f64) -> Feature {
        Feature::new(id, Map::new(), Some(Geometry::Point(GeoPoint::new(lon, lat))))
    }

    #[test]
    fn assigns_sequential_ids_across_batches() {
        let mut ix = GeometryIndexer::new();
        ix.ingest(vec![point(100, 0.0, 0.0), point(101, 1.0, 1.0)]);
        ix.ingest(vec![point(205, 2.0, 2.0)]);

        let ids: Vec<PointId> = ix.points().iter().map(|p| p.point_id).collect();
        assert_eq!(ids, vec![PointId(0), PointId(1), PointId(2)]);
        assert_eq!(ix.table().get(PointId(2)).map(|f| f.id), Some(205));
        assert_eq!(ix.table().len(), ix.points().len());
    }

    #[test]
    fn drops_bad_geometry_without_consuming_an_id() {
        let mut ix = GeometryIndexer::new();
        let summary = ix.ingest(vec![
            point(1, 0.0, 0.0),
            Feature::new(2, Map::new(), None),
            point(3, 5.0, 5.0),
        ]);
        assert_eq!(
            summary,
            BatchSummary {
                received: 3,
                indexed: 2,
                skipped: 1
            }
        );
        assert_eq!(ix.table().get(PointId(1)).map(|f| f.id), Some(3));
    }

    #[test]
    fn accumulates_bounds_and_resets() {
        let mut ix = GeometryIndexer::new();
        assert_eq!(ix.bounds(), None);
        ix.ingest(vec![point(1, -10.0, 5.0)]);
        ix.ingest(vec![point(2, 20.0, -3.0)]);
        assert_eq!(ix.bounds(), Some(Aabb2::from_wsen(-10.0, -3.0, 20.0, 5.0)));

        ix.reset();
        assert!(ix.points().is_empty());
        assert!(ix.table().is_empty());
        assert_eq!(ix.bounds(), None);
    }
}
