/// Running min/max/sum/count over integer samples.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Histogram {
    pub count: u64,
    pub sum: i64,
    pub min: i64,
    pub max: i64,
}

impl Histogram {
    pub fn record(&mut self, value: i64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.sum as f64 / self.count as f64)
    }
}

/// Per-session load counters.
///
/// Counts only; no wall-clock values, so two identical sessions produce
/// identical metrics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadMetrics {
    pub pages_fetched: u64,
    pub features_received: u64,
    pub features_skipped: u64,
    pub index_rebuilds: u64,
    pub render_passes: u64,
    pub batch_sizes: Histogram,
}

impl LoadMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn record_page(&mut self, received: usize, skipped: usize) {
        self.pages_fetched += 1;
        self.features_received += received as u64;
        self.features_skipped += skipped as u64;
        self.batch_sizes.record(received as i64);
    }

    pub fn record_rebuild(&mut self) {
        self.index_rebuilds += 1;
    }

    pub fn record_render(&mut self) {
        self.render_passes += 1;
    }

    pub fn features_indexed(&self) -> u64 {
        self.features_received
            .saturating_sub(self.features_skipped)
    }
}
