use foundation::math::precision::stable_total_cmp_f64;

/// A static 2D KD-tree over points in unit space.
///
/// Built once by recursive median selection (alternating x/y); no insertion.
/// Items are stored in a single flat array, each median sitting between its
/// two halves, so a query only needs slice bounds on its stack.
///
/// Ordering contract:
/// - `range` and `within` return ids in ascending order.
#[derive(Debug, Clone)]
pub struct KdTree {
    node_size: usize,
    items: Vec<(u32, [f64; 2])>,
}

impl KdTree {
    /// Build over `points`; the id of each point is its position in the input.
    pub fn build(points: impl IntoIterator<Item = [f64; 2]>, node_size: usize) -> Self {
        let node_size = node_size.max(1);
        let mut items: Vec<(u32, [f64; 2])> = points
            .into_iter()
            .enumerate()
            .map(|(i, p)| (i as u32, p))
            .collect();
        sort_kd(&mut items, node_size, 0);
        Self { node_size, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ids of points inside the closed box `[min_x, max_x] × [min_y, max_y]`.
    pub fn range(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<u32> {
        let inside = |p: &[f64; 2]| p[0] >= min_x && p[0] <= max_x && p[1] >= min_y && p[1] <= max_y;
        self.search(inside, |axis, v| {
            if axis == 0 {
                (min_x <= v, max_x >= v)
            } else {
                (min_y <= v, max_y >= v)
            }
        })
    }

    /// Ids of points within euclidean distance `r` of `(x, y)`.
    pub fn within(&self, x: f64, y: f64, r: f64) -> Vec<u32> {
        let r2 = r * r;
        let inside = |p: &[f64; 2]| {
            let dx = p[0] - x;
            let dy = p[1] - y;
            dx * dx + dy * dy <= r2
        };
        self.search(inside, |axis, v| {
            let c = if axis == 0 { x } else { y };
            (c - r <= v, c + r >= v)
        })
    }

    /// Shared traversal. `descend(axis, median)` answers (visit left, visit right).
    fn search(
        &self,
        inside: impl Fn(&[f64; 2]) -> bool,
        descend: impl Fn(usize, f64) -> (bool, bool),
    ) -> Vec<u32> {
        let mut hits: Vec<u32> = Vec::new();
        if self.items.is_empty() {
            return hits;
        }

        let mut stack: Vec<(usize, usize, usize)> = vec![(0, self.items.len(), 0)];
        while let Some((lo, hi, axis)) = stack.pop() {
            if hi - lo <= self.node_size {
                for (id, p) in &self.items[lo..hi] {
                    if inside(p) {
                        hits.push(*id);
                    }
                }
                continue;
            }

            let m = lo + (hi - lo) / 2;
            let (id, p) = &self.items[m];
            if inside(p) {
                hits.push(*id);
            }

            let (left, right) = descend(axis, p[axis]);
            let next_axis = 1 - axis;
            if left {
                stack.push((lo, m, next_axis));
            }
            if right {
                stack.push((m + 1, hi, next_axis));
            }
        }

        hits.sort_unstable();
        hits
    }
}

fn sort_kd(items: &mut [(u32, [f64; 2])], node_size: usize, axis: usize) {
    if items.len() <= node_size {
        return;
    }
    let m = items.len() / 2;
    // Tie-break on id so the layout does not depend on the selection algorithm.
    items.select_nth_unstable_by(m, |a, b| {
        stable_total_cmp_f64(a.1[axis], b.1[axis]).then_with(|| a.0.cmp(&b.0))
    });
    let (left, rest) = items.split_at_mut(m);
    sort_kd(left, node_size, 1 - axis);
    sort_kd(&mut rest[1..], node_size, 1 - axis);
}
