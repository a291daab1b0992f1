use serde::{Deserialize, Serialize};

/// Mean, variance accumulator and extremes of a sample stream in O(1) memory
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    var_accum: f64,
    min: f64,
    max: f64,
}

/// Final figures of a [`RunningStats`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningStats {
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            var_accum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn push(&mut self, x: f64) {
        let r = self.count as f64;
        let delta = x - self.mean;

        self.mean += delta / (r + 1.0);
        if self.count > 0 {
            self.var_accum += r * delta * delta / (r + 1.0);
        }

        if x < self.min {
            self.min = x;
        }
        if x > self.max {
            self.max = x;
        }
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sum of squared deviations from the mean
    pub fn var_accum(&self) -> f64 {
        self.var_accum
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    /// `sqrt(var_accum / (count + 1))`
    ///
    /// The denominator is one larger than the sample count. Reported figures
    /// stay comparable with results recorded by earlier tooling that used it.
    pub fn stddev(&self) -> f64 {
        (self.var_accum / (self.count as f64 + 1.0)).sqrt()
    }

    pub fn summary(&self) -> Option<StatsSummary> {
        if self.count == 0 {
            return None;
        }

        Some(StatsSummary {
            avg: self.mean,
            min: self.min,
            max: self.max,
            stddev: self.stddev(),
        })
    }
}
