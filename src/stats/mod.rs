// src/stats/mod.rs
// Online mean/variance (Welford) and z-score slow-outlier detection.

use crate::model::PerformanceWarning;
use serde::{Deserialize, Serialize};

/// How eagerly durations are flagged as slow outliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Conservative,
    Normal,
    Aggressive,
}

impl Sensitivity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Some(Sensitivity::Conservative),
            "normal" => Some(Sensitivity::Normal),
            "aggressive" => Some(Sensitivity::Aggressive),
            _ => None,
        }
    }

    /// Z-score threshold. Small sample sets (n < 20) get a wider gate so
    /// early noise does not flag everything.
    fn threshold(&self, sample_count: i64) -> f64 {
        let low_n = sample_count < 20;
        match self {
            Sensitivity::Conservative => {
                if low_n {
                    7.0
                } else {
                    5.0
                }
            }
            Sensitivity::Normal => {
                if low_n {
                    5.0
                } else {
                    3.3
                }
            }
            Sensitivity::Aggressive => {
                if low_n {
                    3.0
                } else {
                    2.5
                }
            }
        }
    }
}

impl Default for Sensitivity {
    fn default() -> Self {
        Sensitivity::Normal
    }
}

/// One Welford step: fold sample `x` into (avg, n, m2).
pub fn welford_step(avg: f64, sample_count: i64, m2: f64, x: f64) -> (f64, i64, f64) {
    let n = sample_count + 1;
    let delta = x - avg;
    let avg_next = avg + delta / n as f64;
    let delta2 = x - avg_next;
    (avg_next, n, m2 + delta * delta2)
}

/// Sample standard deviation from the accumulator: sqrt(m2/(n-1)), 0 for n <= 1.
pub fn stddev(sample_count: i64, m2: f64) -> f64 {
    if sample_count > 1 {
        (m2 / (sample_count - 1) as f64).sqrt()
    } else {
        0.0
    }
}

/// Classify `actual_ms` against the recorded distribution. Only slowness is
/// flagged; fast samples always pass.
pub fn detect_slow_outlier(
    actual_ms: f64,
    avg_ms: f64,
    stddev_ms: f64,
    sample_count: i64,
    sensitivity: Sensitivity,
) -> Option<PerformanceWarning> {
    if sample_count < 2 || stddev_ms == 0.0 {
        return None;
    }
    let diff = actual_ms - avg_ms;
    if diff <= 0.0 {
        return None;
    }
    let z = diff / stddev_ms;
    if z <= sensitivity.threshold(sample_count) {
        return None;
    }
    Some(PerformanceWarning::slow(format!(
        "{:.1}s ({:.1}\u{3c3} from {:.1}s avg, n={})",
        actual_ms / 1000.0,
        z,
        avg_ms / 1000.0,
        sample_count
    )))
}
