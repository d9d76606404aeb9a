use serde::{Deserialize, Serialize};

/// Metrics tracked per cache (spec §4.8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub total_size: u64,
}

impl CacheMetrics {
    /// `hits / (hits + misses)`, or 0 when the denominator is 0 (spec §8
    /// property 4).
    pub fn hit_ratio(&self) -> f64 {
        let denom = self.hits + self.misses;
        if denom == 0 {
            0.0
        } else {
            self.hits as f64 / denom as f64
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_ratio_zero_when_no_samples() {
        let metrics = CacheMetrics::default();
        assert_eq!(metrics.hit_ratio(), 0.0);
    }

    #[test]
    fn hit_ratio_computed_correctly() {
        let metrics = CacheMetrics {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((metrics.hit_ratio() - 0.75).abs() < f64::EPSILON);
    }
}
