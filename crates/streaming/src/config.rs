use std::time::Duration;

use formats::page::DEFAULT_PAGE_LIMIT;
use serde::{Deserialize, Serialize};

/// Configuration for one load session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Features requested per page.
    pub page_size: usize,

    /// Pause between pages so the host can render and take input (ms).
    pub yield_interval_ms: u64,
}

impl LoaderConfig {
    pub fn yield_interval(&self) -> Duration {
        Duration::from_millis(self.yield_interval_ms)
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_LIMIT,
            yield_interval_ms: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LoaderConfig;
    use std::time::Duration;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: LoaderConfig = serde_json::from_str(r#"{ "page_size": 250 }"#).expect("config");
        assert_eq!(cfg.page_size, 250);
        assert_eq!(cfg.yield_interval(), Duration::from_millis(10));
    }
}
