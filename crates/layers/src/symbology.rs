/// Size class of a cluster marker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MarkerTier {
    Small,
    Medium,
    Large,
}

impl MarkerTier {
    pub fn for_count(count: u32) -> Self {
        match count {
            0..100 => MarkerTier::Small,
            100..1000 => MarkerTier::Medium,
            _ => MarkerTier::Large,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerStyle {
    pub tier: MarkerTier,
    pub diameter_px: u32,
    pub color: [f32; 4],
    pub label: String,
}

impl MarkerStyle {
    pub fn for_count(count: u32) -> Self {
        let tier = MarkerTier::for_count(count);
        let (diameter_px, color) = match tier {
            MarkerTier::Small => (30, [0.44, 0.80, 0.44, 0.85]),
            MarkerTier::Medium => (40, [0.95, 0.76, 0.25, 0.85]),
            MarkerTier::Large => (50, [0.94, 0.38, 0.33, 0.85]),
        };
        Self {
            tier,
            diameter_px,
            color,
            label: abbreviate_count(count),
        }
    }
}

/// Short marker label: `999`, `1.2k`, `12k`.
pub fn abbreviate_count(count: u32) -> String {
    if count >= 10_000 {
        return format!("{}k", (f64::from(count) / 1000.0).round() as u32);
    }
    if count >= 1000 {
        let tenths = (f64::from(count) / 100.0).round() as u32;
        return if tenths % 10 == 0 {
            format!("{}k", tenths / 10)
        } else {
            format!("{}.{}k", tenths / 10, tenths % 10)
        };
    }
    count.to_string()
}
