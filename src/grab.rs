//! Region/peak grab detection
//!
//! A grab is anchored on a frame inside the barrier region. Its start is the
//! lowest point (maximum y) inside the start region shortly before the
//! anchor, and its end is the rightmost point (maximum x) shortly after.

use crate::config::{GrabConfig, SwingValidationConfig};
use crate::types::{CandidateEvent, FrameSeries};
use std::collections::BTreeMap;
use tracing::debug;

/// Disjoint inclusive frame intervals, keyed by start
#[derive(Debug, Default, Clone)]
pub struct ConsumedFrames {
    intervals: BTreeMap<usize, usize>,
}

impl ConsumedFrames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, frame: usize) -> bool {
        self.intervals
            .range(..=frame)
            .next_back()
            .is_some_and(|(_, end)| frame <= *end)
    }

    /// Mark `[start, end]` consumed, coalescing with overlapping intervals
    pub fn insert(&mut self, start: usize, end: usize) {
        let (mut lo, mut hi) = (start, end);
        let overlapping: Vec<usize> = self
            .intervals
            .range(..=end.saturating_add(1))
            .filter(|(s, e)| **e + 1 >= start && **s <= end.saturating_add(1))
            .map(|(s, _)| *s)
            .collect();
        for s in overlapping {
            if let Some(e) = self.intervals.remove(&s) {
                lo = lo.min(s);
                hi = hi.max(e);
            }
        }
        self.intervals.insert(lo, hi);
    }

    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }
}

/// Barrier-anchored grab detector
pub struct GrabDetector<'a> {
    config: &'a GrabConfig,
    fps: f64,
}

impl<'a> GrabDetector<'a> {
    pub fn new(config: &'a GrabConfig, fps: f64) -> Self {
        Self { config, fps }
    }

    fn frames(seconds: f64, fps: f64) -> usize {
        let frames = (seconds * fps).round();
        if frames.is_finite() && frames > 0.0 {
            frames as usize
        } else {
            0
        }
    }

    /// Scan a cleaned trajectory for grab events, in frame order
    pub fn detect(&self, trajectory: &FrameSeries) -> Vec<CandidateEvent> {
        let n = trajectory.len();
        let back = Self::frames(self.config.max_back_time_sec, self.fps);
        let forward = Self::frames(self.config.max_forward_time_sec, self.fps);

        let mut consumed = ConsumedFrames::new();
        let mut events: Vec<CandidateEvent> = Vec::new();

        for candidate in 0..n {
            let in_barrier = trajectory
                .point(candidate)
                .is_some_and(|(x, y)| self.config.barrier_region.contains_strict(x, y));
            if !in_barrier || consumed.contains(candidate) {
                continue;
            }
            if let Some(last) = events.last() {
                if candidate.saturating_sub(last.end) < self.config.min_frame_gap {
                    continue;
                }
            }

            // Strict comparison keeps the earliest frame among equal maxima
            let mut start: Option<(usize, f64)> = None;
            for i in candidate.saturating_sub(back)..=candidate {
                if consumed.contains(i) {
                    continue;
                }
                let Some((x, y)) = trajectory.point(i) else {
                    continue;
                };
                if self.config.start_region.contains_strict(x, y)
                    && start.map_or(true, |(_, best)| y > best)
                {
                    start = Some((i, y));
                }
            }
            let Some((start, _)) = start else {
                continue;
            };

            let mut end: Option<(usize, f64)> = None;
            for i in candidate..=(candidate + forward).min(n - 1) {
                if consumed.contains(i) {
                    continue;
                }
                let Some((x, _)) = trajectory.point(i) else {
                    continue;
                };
                if end.map_or(true, |(_, best)| x > best) {
                    end = Some((i, x));
                }
            }
            let Some((end, _)) = end else {
                continue;
            };

            debug!(start, candidate, end, "grab detected");
            consumed.insert(start, end);
            events.push(CandidateEvent {
                start,
                candidate,
                end,
            });
        }

        events
    }
}

/// Outcome of swing validation with every failed criterion
#[derive(Debug, Clone, PartialEq)]
pub struct SwingVerdict {
    pub distance: f64,
    pub height_change: f64,
    pub duration_frames: usize,
    pub reasons: Vec<String>,
}

impl SwingVerdict {
    pub fn is_valid(&self) -> bool {
        self.reasons.is_empty()
    }
}

/// Multi-criterion check that a grab looks like a real reach
pub struct SwingValidator<'a> {
    config: &'a SwingValidationConfig,
}

impl<'a> SwingValidator<'a> {
    pub fn new(config: &'a SwingValidationConfig) -> Self {
        Self { config }
    }

    /// Validate the segment from `event.start` to `event.end` of a gap-free
    /// trajectory. Events that do not fit in the trajectory are rejected.
    pub fn validate(&self, trajectory: &FrameSeries, event: &CandidateEvent) -> SwingVerdict {
        let cfg = self.config;
        let (start, peak) = (event.start, event.end);
        if peak >= trajectory.len() || start > peak {
            return SwingVerdict {
                distance: 0.0,
                height_change: 0.0,
                duration_frames: 0,
                reasons: vec![format!("event {start}..{peak} lies outside the trajectory")],
            };
        }

        let xs = &trajectory.x[start..=peak];
        let ys = &trajectory.y[start..=peak];
        let (x0, y0) = (xs[0], ys[0]);
        let (x_peak, y_peak) = (xs[xs.len() - 1], ys[ys.len() - 1]);

        let distance = x_peak - x0;
        let height_change = ys.iter().map(|y| (y - y0).abs()).fold(0.0, f64::max);
        let has_lift = ys.windows(2).any(|w| w[1] - w[0] < -cfg.min_lift_speed_px);

        let x_speed: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
        let has_accel_decel = x_speed.len() >= 3 && {
            let changes: Vec<f64> = x_speed.windows(2).map(|w| w[1] - w[0]).collect();
            changes.iter().any(|c| *c > 0.0) && changes.iter().any(|c| *c < 0.0)
        };
        let duration_frames = peak - start;

        let mut reasons = Vec::new();
        if distance < cfg.min_distance_px {
            reasons.push(format!(
                "horizontal distance too small ({distance:.1} < {})",
                cfg.min_distance_px
            ));
        }
        if height_change < cfg.min_height_change_px {
            reasons.push(format!(
                "height change too small ({height_change:.1} < {})",
                cfg.min_height_change_px
            ));
        }
        if !has_lift {
            reasons.push("no lift phase".to_string());
        }
        if !has_accel_decel {
            reasons.push("no acceleration-deceleration pattern".to_string());
        }
        if duration_frames < cfg.min_duration_frames {
            reasons.push(format!(
                "too short ({duration_frames} < {} frames)",
                cfg.min_duration_frames
            ));
        } else if duration_frames > cfg.max_duration_frames {
            reasons.push(format!(
                "too long ({duration_frames} > {} frames)",
                cfg.max_duration_frames
            ));
        }
        if !(x0 >= cfg.start_x_min && y0 <= cfg.start_y_max) {
            reasons.push(format!("invalid start position ({x0:.1}, {y0:.1})"));
        }
        if !(x_peak >= cfg.end_x_min && y_peak <= cfg.end_y_max) {
            reasons.push(format!("invalid end position ({x_peak:.1}, {y_peak:.1})"));
        }

        SwingVerdict {
            distance,
            height_change,
            duration_frames,
            reasons,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// (250, 400) → (400, 300) over frames 0..=40, then back to (250, 420)
    /// by frame 60
    fn reach_trajectory() -> FrameSeries {
        let mut points = Vec::new();
        for i in 0..=40 {
            let t = i as f64 / 40.0;
            points.push((250.0 + 150.0 * t, 400.0 - 100.0 * t));
        }
        for i in 41..=60 {
            let t = (i - 40) as f64 / 20.0;
            points.push((400.0 - 150.0 * t, 300.0 + 120.0 * t));
        }
        FrameSeries::from_points(&points)
    }

    #[test]
    fn test_single_reach_yields_one_event() {
        let config = GrabConfig::default();
        let trajectory = reach_trajectory();
        let events = GrabDetector::new(&config, 120.0).detect(&trajectory);

        assert_eq!(events.len(), 1);
        let event = events[0];
        assert_eq!(event.start, 0);
        assert_eq!(event.end, 40);
        assert!(event.candidate <= event.end);
        let (x, y) = trajectory.point(event.candidate).unwrap();
        assert!(config.barrier_region.contains_strict(x, y));
    }

    #[test]
    fn test_candidate_without_start_is_skipped() {
        // Enters the barrier without passing through the start region
        let points: Vec<(f64, f64)> = (0..30).map(|i| (320.0 + i as f64, 300.0)).collect();
        let config = GrabConfig::default();
        let events = GrabDetector::new(&config, 120.0).detect(&FrameSeries::from_points(&points));
        assert!(events.is_empty());
    }

    #[test]
    fn test_repeated_reaches_respect_frame_gap() {
        let one = reach_trajectory();
        let mut points = Vec::new();
        for _ in 0..3 {
            for i in 0..one.len() {
                points.push((one.x[i], one.y[i]));
            }
            // Rest in the start region long enough to clear the frame gap
            points.extend(std::iter::repeat((250.0, 420.0)).take(40));
        }
        let trajectory = FrameSeries::from_points(&points);
        let config = GrabConfig::default();
        let events = GrabDetector::new(&config, 120.0).detect(&trajectory);

        assert_eq!(events.len(), 3);
        for pair in events.windows(2) {
            assert!(pair[1].start > pair[0].end);
            assert!(pair[1].candidate - pair[0].end >= config.min_frame_gap);
        }
    }

    #[test]
    fn test_start_tie_keeps_first_occurrence() {
        let mut points = vec![(250.0, 400.0); 5];
        points.push((340.0, 300.0));
        let config = GrabConfig::default();
        let events = GrabDetector::new(&config, 120.0).detect(&FrameSeries::from_points(&points));
        assert_eq!(events[0].start, 0);
        assert_eq!(events[0].candidate, 5);
    }

    #[test]
    fn test_missing_frames_are_not_candidates() {
        let mut trajectory = reach_trajectory();
        for i in 20..=40 {
            trajectory.invalidate(i);
        }
        let config = GrabConfig::default();
        let events = GrabDetector::new(&config, 120.0).detect(&trajectory);
        assert!(events.iter().all(|e| trajectory.is_valid(e.candidate)));
    }

    #[test]
    fn test_consumed_frames_coalesce() {
        let mut consumed = ConsumedFrames::new();
        consumed.insert(10, 20);
        consumed.insert(30, 40);
        assert!(consumed.contains(10));
        assert!(consumed.contains(20));
        assert!(!consumed.contains(25));
        assert!(!consumed.contains(9));
        consumed.insert(18, 32);
        assert_eq!(consumed.interval_count(), 1);
        assert!(consumed.contains(25));
        assert!(consumed.contains(40));
        assert!(!consumed.contains(41));
    }

    #[test]
    fn test_swing_validator_accepts_clean_reach() {
        // Lift then reach with an accelerating and decelerating x profile
        let mut points = Vec::new();
        for i in 0..=30 {
            let t = i as f64 / 30.0;
            let ease = 0.5 - 0.5 * (std::f64::consts::PI * t).cos();
            points.push((200.0 + 160.0 * ease, 390.0 - 75.0 * t));
        }
        let trajectory = FrameSeries::from_points(&points);
        let event = CandidateEvent {
            start: 0,
            candidate: 20,
            end: 30,
        };
        let config = SwingValidationConfig::default();
        let verdict = SwingValidator::new(&config).validate(&trajectory, &event);
        assert_eq!(verdict.reasons, Vec::<String>::new());
        assert!(verdict.is_valid());
        assert_eq!(verdict.duration_frames, 30);
    }

    #[test]
    fn test_swing_validator_reports_every_failure() {
        let points: Vec<(f64, f64)> = (0..5).map(|i| (100.0 + i as f64, 420.0)).collect();
        let trajectory = FrameSeries::from_points(&points);
        let event = CandidateEvent {
            start: 0,
            candidate: 2,
            end: 4,
        };
        let config = SwingValidationConfig::default();
        let verdict = SwingValidator::new(&config).validate(&trajectory, &event);
        assert!(!verdict.is_valid());
        assert_eq!(verdict.reasons.len(), 7);
    }
}
