//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Shared primitives and utilities for the tick engine."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use serde::Serialize;

/// Smoothing factor used for every engine statistic unless configured otherwise.
pub const DEFAULT_SMOOTHING: f64 = 0.25;

/// Exponential moving average over a stream of samples.
///
/// `update` moves the average towards the sample by `alpha` of the gap, so a
/// larger factor reacts faster and a smaller one smooths more.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExponentialMovingAverage {
    alpha: f64,
    value: f64,
}

impl ExponentialMovingAverage {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            value: 0.0,
        }
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        if sample.is_finite() {
            self.value += self.alpha * (sample - self.value);
        }
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}

impl Default for ExponentialMovingAverage {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_towards_constant_sample() {
        let mut ema = ExponentialMovingAverage::new(0.5);
        assert_eq!(ema.update(8.0), 4.0);
        assert_eq!(ema.update(8.0), 6.0);
        assert_eq!(ema.update(8.0), 7.0);
        for _ in 0..64 {
            ema.update(8.0);
        }
        assert!((ema.value() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn reset_zeroes_the_average() {
        let mut ema = ExponentialMovingAverage::default();
        ema.update(100.0);
        assert!(ema.value() > 0.0);
        ema.reset();
        assert_eq!(ema.value(), 0.0);
        assert_eq!(ema.alpha(), DEFAULT_SMOOTHING);
    }

    #[test]
    fn non_finite_samples_are_ignored() {
        let mut ema = ExponentialMovingAverage::new(1.0);
        ema.update(3.0);
        ema.update(f64::NAN);
        ema.update(f64::INFINITY);
        assert_eq!(ema.value(), 3.0);
    }
}
