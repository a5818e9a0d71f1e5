use serde::{Deserialize, Serialize};

/// Per-request think time, applied after the response (and any extraction) completes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThinkTime {
    #[default]
    None,
    Fixed {
        ms: u64,
    },
    Uniform {
        min_ms: u64,
        max_ms: u64,
    },
    Gaussian {
        mean_ms: f64,
        std_dev_ms: f64,
    },
}

/// Target aggregate rate for one transaction, shared by every virtual user issuing it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputTarget {
    pub per_minute: f64,
}
