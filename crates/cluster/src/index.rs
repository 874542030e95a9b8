use foundation::bounds::Aabb2;
use foundation::ids::{ClusterId, PointId};
use foundation::math::mercator::{lat_y, lng_x, unit_radius, wrap_lng, x_lng, y_lat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::indexer::RepresentativePoint;
use crate::kdtree::KdTree;

/// Zoom is packed into 5 bits of a cluster code.
const MAX_SUPPORTED_ZOOM: u8 = 30;
/// Marks a node not yet visited at any zoom.
const UNVISITED: u8 = u8::MAX;

/// Clustering parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    pub min_zoom: u8,
    /// Highest zoom that still clusters; `max_zoom + 1` shows raw points.
    pub max_zoom: u8,
    /// Smallest group that forms a cluster.
    pub min_points: u32,
    /// Merge radius in screen pixels.
    pub radius: f64,
    /// Tile size in pixels the radius is measured against.
    pub extent: f64,
    /// KD-tree leaf size.
    pub node_size: usize,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            min_zoom: 0,
            max_zoom: 16,
            min_points: 2,
            radius: 60.0,
            extent: 512.0,
            node_size: 64,
        }
    }
}

impl ClusterOptions {
    fn normalized(mut self) -> Self {
        self.max_zoom = self.max_zoom.min(MAX_SUPPORTED_ZOOM - 1);
        self.min_zoom = self.min_zoom.min(self.max_zoom);
        self.min_points = self.min_points.max(2);
        self.node_size = self.node_size.max(1);
        self
    }
}

/// The id does not name a cluster in this build of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cluster {0} not found in the current index")]
pub struct ClusterNotFoundError(pub ClusterId);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterSummary {
    pub id: ClusterId,
    pub lon: f64,
    pub lat: f64,
    pub count: u32,
    /// Zoom at which this cluster splits.
    pub expansion_zoom: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafPoint {
    pub point_id: PointId,
    pub lon: f64,
    pub lat: f64,
}

/// One entry of a viewport query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClusterOrPoint {
    Cluster(ClusterSummary),
    Leaf(LeafPoint),
}

impl ClusterOrPoint {
    /// Number of indexed points this entry stands for.
    pub fn point_count(&self) -> u32 {
        match self {
            ClusterOrPoint::Cluster(c) => c.count,
            ClusterOrPoint::Leaf(_) => 1,
        }
    }

    pub fn lon_lat(&self) -> [f64; 2] {
        match self {
            ClusterOrPoint::Cluster(c) => [c.lon, c.lat],
            ClusterOrPoint::Leaf(l) => [l.lon, l.lat],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum NodeRef {
    Leaf(u32),
    Cluster(u64),
}

#[derive(Debug, Clone, Copy)]
struct Node {
    x: f64,
    y: f64,
    /// Last zoom this node was visited at while clustering the level below.
    zoom: u8,
    node: NodeRef,
    parent: Option<u64>,
    num_points: u32,
}

#[derive(Debug, Clone)]
struct Level {
    tree: KdTree,
    nodes: Vec<Node>,
}

impl Level {
    fn new(nodes: Vec<Node>, node_size: usize) -> Self {
        let tree = KdTree::build(nodes.iter().map(|n| [n.x, n.y]), node_size);
        Self { tree, nodes }
    }
}

/// Hierarchical greedy point clustering.
///
/// One KD-tree per zoom: `max_zoom + 1` holds the raw points and each lower
/// zoom clusters the level above it. The structure is immutable once built;
/// new data means building a fresh index.
#[derive(Debug, Clone)]
pub struct ClusterIndex {
    options: ClusterOptions,
    generation: u64,
    points: Vec<RepresentativePoint>,
    /// Indexed by zoom; `None` below `min_zoom`.
    levels: Vec<Option<Level>>,
}

impl ClusterIndex {
    pub fn empty(options: ClusterOptions, generation: u64) -> Self {
        Self::build(options, generation, &[])
    }

    /// Build over the full point set. `generation` stamps every cluster id.
    pub fn build(options: ClusterOptions, generation: u64, points: &[RepresentativePoint]) -> Self {
        let options = options.normalized();
        let top = usize::from(options.max_zoom) + 1;

        let leaves: Vec<Node> = points
            .iter()
            .enumerate()
            .map(|(slot, p)| Node {
                x: lng_x(wrap_lng(p.lon)),
                y: lat_y(p.lat),
                zoom: UNVISITED,
                node: NodeRef::Leaf(slot as u32),
                parent: None,
                num_points: 1,
            })
            .collect();

        let mut levels: Vec<Option<Level>> = vec![None; top + 1];
        levels[top] = Some(Level::new(leaves, options.node_size));

        for zoom in (options.min_zoom..=options.max_zoom).rev() {
            let z = usize::from(zoom);
            let next = match levels[z + 1].as_mut() {
                Some(above) => cluster_level(above, zoom, &options),
                None => Vec::new(),
            };
            levels[z] = Some(Level::new(next, options.node_size));
        }

        Self {
            options,
            generation,
            points: points.to_vec(),
            levels,
        }
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn limit_zoom(&self, zoom: u8) -> u8 {
        zoom.clamp(self.options.min_zoom, self.options.max_zoom + 1)
    }

    /// Clusters and points visible in `bounds` (lon/lat degrees) at `zoom`.
    ///
    /// Boxes crossing the antimeridian are split; a span of 360° or more
    /// covers the whole world. Output order is deterministic.
    pub fn query(&self, bounds: &Aabb2, zoom: u8) -> Vec<ClusterOrPoint> {
        let min_lat = bounds.min[1].clamp(-90.0, 90.0);
        let max_lat = bounds.max[1].clamp(-90.0, 90.0);

        if bounds.max[0] - bounds.min[0] >= 360.0 {
            return self.query_unwrapped(-180.0, min_lat, 180.0, max_lat, zoom);
        }

        let min_lng = wrap_lng(bounds.min[0]);
        let max_lng = if bounds.max[0] == 180.0 {
            180.0
        } else {
            wrap_lng(bounds.max[0])
        };

        if min_lng > max_lng {
            let mut out = self.query_unwrapped(min_lng, min_lat, 180.0, max_lat, zoom);
            out.extend(self.query_unwrapped(-180.0, min_lat, max_lng, max_lat, zoom));
            return out;
        }
        self.query_unwrapped(min_lng, min_lat, max_lng, max_lat, zoom)
    }

    fn query_unwrapped(
        &self,
        min_lng: f64,
        min_lat: f64,
        max_lng: f64,
        max_lat: f64,
        zoom: u8,
    ) -> Vec<ClusterOrPoint> {
        let Some(level) = self.level(self.limit_zoom(zoom)) else {
            return Vec::new();
        };
        level
            .tree
            .range(lng_x(min_lng), lat_y(max_lat), lng_x(max_lng), lat_y(min_lat))
            .into_iter()
            .filter_map(|i| self.describe(&level.nodes[i as usize]))
            .collect()
    }

    /// Minimum zoom at which the cluster's members first separate.
    pub fn expansion_zoom(&self, id: ClusterId) -> Result<u8, ClusterNotFoundError> {
        let (_, origin_zoom) = self.decode(id)?;
        let mut current = id;
        let mut expansion = origin_zoom - 1;
        while expansion <= self.options.max_zoom {
            let children = self.child_nodes(current)?;
            expansion += 1;
            match children.as_slice() {
                [only] => match only.node {
                    NodeRef::Cluster(code) => current = ClusterId::new(self.generation, code),
                    NodeRef::Leaf(_) => break,
                },
                _ => break,
            }
        }
        Ok(expansion)
    }

    /// The clusters and points merged into `id` one zoom level up.
    pub fn children(&self, id: ClusterId) -> Result<Vec<ClusterOrPoint>, ClusterNotFoundError> {
        Ok(self
            .child_nodes(id)?
            .into_iter()
            .filter_map(|n| self.describe(n))
            .collect())
    }

    fn child_nodes(&self, id: ClusterId) -> Result<Vec<&Node>, ClusterNotFoundError> {
        let (origin_slot, origin_zoom) = self.decode(id)?;
        let level = self.level(origin_zoom).ok_or(ClusterNotFoundError(id))?;
        let origin = level
            .nodes
            .get(origin_slot)
            .ok_or(ClusterNotFoundError(id))?;

        let r = unit_radius(self.options.radius, self.options.extent, origin_zoom - 1);
        let children: Vec<&Node> = level
            .tree
            .within(origin.x, origin.y, r)
            .into_iter()
            .map(|i| &level.nodes[i as usize])
            .filter(|n| n.parent == Some(id.code))
            .collect();

        if children.is_empty() {
            return Err(ClusterNotFoundError(id));
        }
        Ok(children)
    }

    /// Up to `limit` member points of `id`, skipping the first `offset`.
    pub fn leaves(
        &self,
        id: ClusterId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LeafPoint>, ClusterNotFoundError> {
        let mut out = Vec::new();
        let mut skipped = 0usize;
        self.append_leaves(id, limit, offset, &mut skipped, &mut out)?;
        Ok(out)
    }

    fn append_leaves(
        &self,
        id: ClusterId,
        limit: usize,
        offset: usize,
        skipped: &mut usize,
        out: &mut Vec<LeafPoint>,
    ) -> Result<(), ClusterNotFoundError> {
        for child in self.child_nodes(id)? {
            if out.len() >= limit {
                break;
            }
            match child.node {
                NodeRef::Cluster(code) => {
                    let count = child.num_points as usize;
                    if *skipped + count <= offset {
                        // Whole subtree lies before the requested window.
                        *skipped += count;
                    } else {
                        let inner = ClusterId::new(self.generation, code);
                        self.append_leaves(inner, limit, offset, skipped, out)?;
                    }
                }
                NodeRef::Leaf(slot) => {
                    if *skipped < offset {
                        *skipped += 1;
                    } else if let Some(p) = self.points.get(slot as usize) {
                        out.push(LeafPoint {
                            point_id: p.point_id,
                            lon: p.lon,
                            lat: p.lat,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn level(&self, zoom: u8) -> Option<&Level> {
        self.levels.get(usize::from(zoom)).and_then(Option::as_ref)
    }

    fn decode(&self, id: ClusterId) -> Result<(usize, u8), ClusterNotFoundError> {
        if id.generation != self.generation {
            return Err(ClusterNotFoundError(id));
        }
        let origin_zoom = (id.code & 0x1f) as u8;
        if origin_zoom == 0 || origin_zoom > self.options.max_zoom + 1 {
            return Err(ClusterNotFoundError(id));
        }
        Ok(((id.code >> 5) as usize, origin_zoom))
    }

    fn describe(&self, node: &Node) -> Option<ClusterOrPoint> {
        match node.node {
            NodeRef::Leaf(slot) => self.points.get(slot as usize).map(|p| {
                ClusterOrPoint::Leaf(LeafPoint {
                    point_id: p.point_id,
                    lon: p.lon,
                    lat: p.lat,
                })
            }),
            NodeRef::Cluster(code) => {
                let id = ClusterId::new(self.generation, code);
                // A cluster always absorbs at least one neighbour, so it
                // splits at the zoom it was formed from.
                let expansion_zoom = (code & 0x1f) as u8;
                Some(ClusterOrPoint::Cluster(ClusterSummary {
                    id,
                    lon: x_lng(node.x),
                    lat: y_lat(node.y),
                    count: node.num_points,
                    expansion_zoom,
                }))
            }
        }
    }
}

/// Greedily merge the nodes of `above` (zoom + 1) into the nodes of `zoom`.
fn cluster_level(above: &mut Level, zoom: u8, options: &ClusterOptions) -> Vec<Node> {
    let r = unit_radius(options.radius, options.extent, zoom);
    let Level { tree, nodes } = above;
    let mut next: Vec<Node> = Vec::new();

    for i in 0..nodes.len() {
        if nodes[i].zoom <= zoom {
            continue;
        }
        nodes[i].zoom = zoom;
        let p = nodes[i];

        let neighbors = tree.within(p.x, p.y, r);
        let origin_count = p.num_points;
        let count = neighbors
            .iter()
            .map(|&n| &nodes[n as usize])
            .filter(|b| b.zoom > zoom)
            .fold(origin_count, |acc, b| acc + b.num_points);

        if count > origin_count && count >= options.min_points {
            let code = ((i as u64) << 5) | u64::from(zoom + 1);
            let mut wx = p.x * f64::from(origin_count);
            let mut wy = p.y * f64::from(origin_count);

            for &n in &neighbors {
                let b = &mut nodes[n as usize];
                if b.zoom <= zoom {
                    continue;
                }
                b.zoom = zoom;
                b.parent = Some(code);
                wx += b.x * f64::from(b.num_points);
                wy += b.y * f64::from(b.num_points);
            }
            nodes[i].parent = Some(code);

            next.push(Node {
                x: wx / f64::from(count),
                y: wy / f64::from(count),
                zoom: UNVISITED,
                node: NodeRef::Cluster(code),
                parent: None,
                num_points: count,
            });
        } else {
            next.push(p);
            if count > 1 {
                // Too few to cluster: the neighbours pass through on their own.
                for &n in &neighbors {
                    let b = &mut nodes[n as usize];
                    if b.zoom <= zoom {
                        continue;
                    }
                    b.zoom = zoom;
                    next.push(*b);
                }
            }
        }
    }

    next
}

#[cfg(test)]
mod tests {
    use super::{ClusterIndex, ClusterNotFoundError, ClusterOptions, ClusterOrPoint};
    use crate::indexer::RepresentativePoint;
    use foundation::bounds::Aabb2;
    use foundation::ids::{ClusterId, PointId};

    fn pts(coords: &[(f64, f64)]) -> Vec<RepresentativePoint> {
        coords
            .iter()
            .enumerate()
            .map(|(i, &(lon, lat))| RepresentativePoint {
                point_id: PointId(i as u32),
                lon,
                lat,
            })
            .collect()
    }

    /// Deterministic pseudo-random scatter.
    fn scatter(n: usize, seed: u64) -> Vec<RepresentativePoint> {
        let mut state = seed;
        let mut next = || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 11) as f64 / (1u64 << 53) as f64
        };
        let coords: Vec<(f64, f64)> = (0..n)
            .map(|_| (next() * 360.0 - 180.0, next() * 160.0 - 80.0))
            .collect();
        pts(&coords)
    }

    fn total(items: &[ClusterOrPoint]) -> u32 {
        items.iter().map(ClusterOrPoint::point_count).sum()
    }

    fn first_cluster(items: &[ClusterOrPoint]) -> ClusterId {
        items
            .iter()
            .find_map(|c| match c {
                ClusterOrPoint::Cluster(c) => Some(c.id),
                ClusterOrPoint::Leaf(_) => None,
            })
            .expect("a cluster")
    }

    #[test]
    fn world_query_at_min_zoom_covers_every_point() {
        for n in [0usize, 1, 2, 37, 1000] {
            let points = scatter(n, 7);
            let index = ClusterIndex::build(ClusterOptions::default(), 1, &points);
            let items = index.query(&Aabb2::world(), 0);
            assert_eq!(total(&items) as usize, n, "n = {n}");
        }
    }

    #[test]
    fn longitudes_past_the_antimeridian_are_wrapped() {
        let points = pts(&[(0.0, 0.0), (190.0, 10.0), (-200.0, -10.0)]);
        let index = ClusterIndex::build(ClusterOptions::default(), 1, &points);
        assert_eq!(total(&index.query(&Aabb2::world(), 0)), 3);

        // 190° east is 170° west.
        let west = index.query(&Aabb2::from_wsen(-175.0, 5.0, -165.0, 15.0), 5);
        assert_eq!(total(&west), 1);
    }

    #[test]
    fn cluster_hint_matches_expansion_zoom() {
        let points = scatter(400, 5);
        let index = ClusterIndex::build(ClusterOptions::default(), 2, &points);
        for z in [0u8, 2, 5, 9] {
            for item in index.query(&Aabb2::world(), z) {
                if let ClusterOrPoint::Cluster(c) = item {
                    assert_eq!(Ok(c.expansion_zoom), index.expansion_zoom(c.id));
                    assert!(c.expansion_zoom > z);
                }
            }
        }
    }

    #[test]
    fn above_max_zoom_returns_raw_points() {
        let points = scatter(200, 3);
        let options = ClusterOptions::default();
        let index = ClusterIndex::build(options, 1, &points);
        let items = index.query(&Aabb2::world(), options.max_zoom + 1);
        assert_eq!(items.len(), 200);
        assert!(items.iter().all(|i| matches!(i, ClusterOrPoint::Leaf(_))));
    }

    #[test]
    fn nearby_points_merge_and_distant_points_stay_apart() {
        let points = pts(&[(10.0, 10.0), (10.001, 10.001), (-120.0, -40.0)]);
        let index = ClusterIndex::build(ClusterOptions::default(), 1, &points);
        let items = index.query(&Aabb2::world(), 2);

        let clusters: Vec<_> = items
            .iter()
            .filter_map(|i| match i {
                ClusterOrPoint::Cluster(c) => Some(c.count),
                ClusterOrPoint::Leaf(_) => None,
            })
            .collect();
        assert_eq!(clusters, vec![2]);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn query_is_deterministic() {
        let points = scatter(500, 11);
        let a = ClusterIndex::build(ClusterOptions::default(), 4, &points);
        let b = ClusterIndex::build(ClusterOptions::default(), 4, &points);
        let bounds = Aabb2::from_wsen(-60.0, -30.0, 90.0, 60.0);
        for z in [0u8, 3, 8] {
            assert_eq!(a.query(&bounds, z), b.query(&bounds, z));
        }
    }

    #[test]
    fn antimeridian_query_sees_both_sides() {
        let points = pts(&[(179.5, 0.0), (-179.5, 0.0), (0.0, 0.0)]);
        let index = ClusterIndex::build(ClusterOptions::default(), 1, &points);
        let z = 17;
        let items = index.query(&Aabb2::from_wsen(179.0, -1.0, 181.0, 1.0), z);
        assert_eq!(items.len(), 2);

        let whole = index.query(&Aabb2::from_wsen(-200.0, -90.0, 200.0, 90.0), z);
        assert_eq!(whole.len(), 3);
    }

    #[test]
    fn expansion_zoom_splits_cluster() {
        let points = pts(&[(0.0, 0.0), (0.01, 0.0)]);
        let index = ClusterIndex::build(ClusterOptions::default(), 1, &points);
        let id = first_cluster(&index.query(&Aabb2::world(), 0));
        let z = index.expansion_zoom(id).expect("expansion zoom");

        let at_expansion = index.query(&Aabb2::world(), z);
        assert_eq!(at_expansion.len(), 2);
        let before = index.query(&Aabb2::world(), z - 1);
        assert_eq!(before.len(), 1);
    }

    #[test]
    fn expansion_zoom_is_non_decreasing_as_members_are_added() {
        // Grow one cluster by stacking extra members onto existing ones.
        let base = [(5.0, 5.0), (5.02, 5.01)];
        let mut coords: Vec<(f64, f64)> = base.to_vec();
        let mut last = 0u8;
        for k in 0..12 {
            let index = ClusterIndex::build(ClusterOptions::default(), 1, &pts(&coords));
            let id = first_cluster(&index.query(&Aabb2::world(), 0));
            let z = index.expansion_zoom(id).expect("expansion zoom");
            assert!(z >= last, "step {k}: {z} < {last}");
            last = z;
            coords.push(base[k % 2]);
        }
    }

    #[test]
    fn leaves_page_through_members() {
        let coords: Vec<(f64, f64)> = (0..25).map(|i| (i as f64 * 0.001, 0.0)).collect();
        let index = ClusterIndex::build(ClusterOptions::default(), 1, &pts(&coords));
        let id = first_cluster(&index.query(&Aabb2::world(), 0));

        let all = index.leaves(id, usize::MAX, 0).expect("leaves");
        assert_eq!(all.len(), 25);
        let mut ids: Vec<u32> = all.iter().map(|l| l.point_id.0).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..25).collect::<Vec<u32>>());

        let page = index.leaves(id, 10, 20).expect("leaves");
        assert_eq!(page.len(), 5);
    }

    #[test]
    fn stale_generation_is_not_found() {
        let points = pts(&[(0.0, 0.0), (0.01, 0.0)]);
        let old = ClusterIndex::build(ClusterOptions::default(), 1, &points);
        let id = first_cluster(&old.query(&Aabb2::world(), 0));

        let new = ClusterIndex::build(ClusterOptions::default(), 2, &points);
        assert_eq!(new.expansion_zoom(id), Err(ClusterNotFoundError(id)));
        assert!(new.children(id).is_err());
    }

    #[test]
    fn malformed_codes_are_not_found() {
        let index = ClusterIndex::build(ClusterOptions::default(), 1, &pts(&[(0.0, 0.0)]));
        for code in [0u64, 31, (999 << 5) | 3] {
            let id = ClusterId::new(1, code);
            assert_eq!(index.expansion_zoom(id), Err(ClusterNotFoundError(id)));
        }
    }
}
