/// Locally assigned, session-sequential id of a representative point.
///
/// Distinct from the upstream feature id. Doubles as the row index into the
/// session's feature table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PointId(pub u32);

impl PointId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for PointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Synthetic cluster id.
///
/// `generation` identifies the index build that produced it; `code` packs the
/// origin slot and zoom within that build. Ids from an older generation are
/// stale and never resolve.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterId {
    pub generation: u64,
    pub code: u64,
}

impl ClusterId {
    pub fn new(generation: u64, code: u64) -> Self {
        ClusterId { generation, code }
    }
}

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}:{}", self.generation, self.code)
    }
}
