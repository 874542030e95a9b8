/// Axis-aligned bounding box in `[lon, lat]` degrees (or any planar 2D space).
///
/// An "empty" box has `min > max` on both axes; extending it with a point
/// produces a degenerate box at that point.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb2 {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl Aabb2 {
    pub fn new(min: [f64; 2], max: [f64; 2]) -> Self {
        Aabb2 { min, max }
    }

    /// Build from `west, south, east, north` in degrees.
    pub fn from_wsen(west: f64, south: f64, east: f64, north: f64) -> Self {
        Aabb2::new([west, south], [east, north])
    }

    pub fn empty() -> Self {
        Aabb2 {
            min: [f64::INFINITY, f64::INFINITY],
            max: [f64::NEG_INFINITY, f64::NEG_INFINITY],
        }
    }

    /// The whole lon/lat world.
    pub fn world() -> Self {
        Aabb2::from_wsen(-180.0, -90.0, 180.0, 90.0)
    }

    pub fn is_empty(&self) -> bool {
        self.min[0] > self.max[0] || self.min[1] > self.max[1]
    }

    pub fn extend_point(&mut self, p: [f64; 2]) {
        self.min[0] = self.min[0].min(p[0]);
        self.min[1] = self.min[1].min(p[1]);
        self.max[0] = self.max[0].max(p[0]);
        self.max[1] = self.max[1].max(p[1]);
    }

    /// Centre of the box, or `None` when empty.
    pub fn center(&self) -> Option<[f64; 2]> {
        if self.is_empty() {
            return None;
        }
        Some([
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
        ])
    }

    pub fn width(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    pub fn contains_point(&self, p: [f64; 2]) -> bool {
        p[0] >= self.min[0] && p[0] <= self.max[0] && p[1] >= self.min[1] && p[1] <= self.max[1]
    }
}

impl Default for Aabb2 {
    fn default() -> Self {
        Self::empty()
    }
}
