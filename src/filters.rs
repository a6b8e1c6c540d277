//! Trajectory filters
//!
//! Each filter maps a `FrameSeries` to a series of the same length, only ever
//! invalidating (x, y) samples. Likelihood passes through unchanged.
//!
//! The chain order is fixed: confidence → region → extreme jump → speed.

use crate::config::FilterConfig;
use crate::types::{FrameSeries, Region};
use serde::{Deserialize, Serialize};
use tracing::debug;

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Invalidate frames whose likelihood is below `threshold`
pub fn filter_low_likelihood(series: &FrameSeries, threshold: f64) -> FrameSeries {
    let mut out = series.clone();
    for i in 0..out.len() {
        if out.likelihood[i] < threshold {
            out.invalidate(i);
        }
    }
    out
}

/// Invalidate frames that fall outside `region` (bounds included)
pub fn filter_outside_region(series: &FrameSeries, region: &Region) -> FrameSeries {
    let mut out = series.clone();
    for i in 0..out.len() {
        if let Some((x, y)) = out.point(i) {
            if !region.contains(x, y) {
                out.invalidate(i);
            }
        }
    }
    out
}

/// Coarse de-spike: invalidate frame `i` when it jumps more than `max_jump`
/// pixels away from a valid frame `i - 1`.
///
/// The comparison uses the already-filtered previous sample, so a frame that
/// was just invalidated cannot anchor the next comparison.
pub fn filter_extreme_jumps(series: &FrameSeries, max_jump: f64) -> FrameSeries {
    let mut out = series.clone();
    for i in 1..out.len() {
        if let (Some(prev), Some(curr)) = (out.point(i - 1), out.point(i)) {
            if distance(prev, curr) > max_jump {
                out.invalidate(i);
            }
        }
    }
    out
}

/// Invalidate interior frames whose distance to a valid neighbour exceeds
/// `max_speed` (px/frame).
///
/// Frames 0 and N-1 are never invalidated.
pub fn filter_unreasonable_speed(series: &FrameSeries, max_speed: f64) -> FrameSeries {
    let mut out = series.clone();
    let n = out.len();
    if n < 3 {
        return out;
    }

    for i in 1..n - 1 {
        let Some(curr) = out.point(i) else {
            continue;
        };
        let too_fast_prev = out
            .point(i - 1)
            .is_some_and(|prev| distance(prev, curr) > max_speed);
        let too_fast_next = out
            .point(i + 1)
            .is_some_and(|next| distance(curr, next) > max_speed);
        if too_fast_prev || too_fast_next {
            out.invalidate(i);
        }
    }
    out
}

/// Valid-sample counts after each stage of the chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterReport {
    pub input: usize,
    pub after_confidence: usize,
    pub after_region: usize,
    pub after_jump: usize,
    pub after_speed: usize,
}

/// Fixed-order filter chain for one keypoint series
pub struct FilterChain<'a> {
    config: &'a FilterConfig,
}

impl<'a> FilterChain<'a> {
    pub fn new(config: &'a FilterConfig) -> Self {
        Self { config }
    }

    /// Run every configured stage in order
    pub fn apply(&self, series: &FrameSeries) -> (FrameSeries, FilterReport) {
        let mut report = FilterReport {
            input: series.valid_count(),
            ..FilterReport::default()
        };

        let mut out = filter_low_likelihood(series, self.config.likelihood_threshold);
        report.after_confidence = out.valid_count();
        debug!(valid = report.after_confidence, "confidence filter");

        if let Some(region) = &self.config.position_region {
            out = filter_outside_region(&out, region);
        }
        report.after_region = out.valid_count();
        debug!(valid = report.after_region, "region filter");

        if let Some(max_jump) = self.config.extreme_jump_px {
            out = filter_extreme_jumps(&out, max_jump);
        }
        report.after_jump = out.valid_count();
        debug!(valid = report.after_jump, "extreme jump filter");

        if let Some(max_speed) = self.config.max_speed_px {
            out = filter_unreasonable_speed(&out, max_speed);
        }
        report.after_speed = out.valid_count();
        debug!(valid = report.after_speed, "speed filter");

        (out, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> FrameSeries {
        let points: Vec<(f64, f64)> = (0..n).map(|i| (i as f64, 0.0)).collect();
        FrameSeries::from_points(&points)
    }

    #[test]
    fn test_confidence_filter() {
        let mut series = line(5);
        series.likelihood[2] = 0.1;
        let out = filter_low_likelihood(&series, 0.5);
        assert!(!out.is_valid(2));
        assert_eq!(out.valid_count(), 4);
        assert_eq!(out.likelihood, series.likelihood);
    }

    #[test]
    fn test_confidence_threshold_is_inclusive() {
        let mut series = line(2);
        series.likelihood[0] = 0.5;
        let out = filter_low_likelihood(&series, 0.5);
        assert!(out.is_valid(0));
    }

    #[test]
    fn test_region_filter() {
        let series = FrameSeries::from_points(&[(10.0, 10.0), (500.0, 10.0), (20.0, 20.0)]);
        let out = filter_outside_region(&series, &Region::new(0.0, 100.0, 0.0, 100.0));
        assert!(out.is_valid(0));
        assert!(!out.is_valid(1));
        assert!(out.is_valid(2));
    }

    #[test]
    fn test_extreme_jump_filter() {
        let series = FrameSeries::from_points(&[(0.0, 0.0), (300.0, 0.0), (301.0, 0.0)]);
        let out = filter_extreme_jumps(&series, 200.0);
        assert!(out.is_valid(0));
        assert!(!out.is_valid(1));
        // The invalidated spike does not anchor the next comparison
        assert!(out.is_valid(2));
    }

    #[test]
    fn test_extreme_jump_skips_missing_neighbours() {
        let mut series = FrameSeries::from_points(&[(0.0, 0.0), (0.0, 0.0), (500.0, 0.0)]);
        series.invalidate(1);
        let out = filter_extreme_jumps(&series, 200.0);
        assert!(out.is_valid(2));
    }

    #[test]
    fn test_speed_filter_removes_interior_spike() {
        let series =
            FrameSeries::from_points(&[(0.0, 0.0), (1.0, 0.0), (90.0, 0.0), (3.0, 0.0), (4.0, 0.0)]);
        let out = filter_unreasonable_speed(&series, 50.0);
        assert!(!out.is_valid(2));
        assert_eq!(out.valid_count(), 3);
    }

    #[test]
    fn test_speed_filter_never_touches_edge_frames() {
        let series = FrameSeries::from_points(&[
            (1000.0, 1000.0),
            (1.0, 0.0),
            (2.0, 0.0),
            (3.0, 0.0),
            (-900.0, 0.0),
        ]);
        let out = filter_unreasonable_speed(&series, 1.0);
        assert!(out.is_valid(0));
        assert!(out.is_valid(4));
    }

    #[test]
    fn test_speed_filter_short_series() {
        let series = FrameSeries::from_points(&[(0.0, 0.0), (500.0, 0.0)]);
        let out = filter_unreasonable_speed(&series, 1.0);
        assert_eq!(out.valid_count(), 2);
    }

    #[test]
    fn test_chain_report_is_monotonic() {
        let mut series = line(20);
        series.likelihood[3] = 0.0;
        series.x[10] = 5000.0;
        let config = FilterConfig {
            likelihood_threshold: 0.5,
            position_region: Some(Region::new(-1.0, 100.0, -1.0, 1.0)),
            extreme_jump_px: Some(200.0),
            max_speed_px: Some(5.0),
        };
        let (out, report) = FilterChain::new(&config).apply(&series);
        assert_eq!(report.input, 20);
        assert_eq!(report.after_confidence, 19);
        assert_eq!(report.after_region, 18);
        assert!(report.after_jump <= report.after_region);
        assert!(report.after_speed <= report.after_jump);
        assert_eq!(out.valid_count(), report.after_speed);
        assert_eq!(out.len(), 20);
    }
}
