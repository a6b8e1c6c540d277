//! Bout merger
//!
//! Turns a per-frame label series into non-overlapping bouts with a single
//! forward pass. The merger is either `Idle` or holds one `Open` bout; a frame
//! that breaks the open bout (different label, `none`, or invalid) closes it
//! unless the open label reappears on a valid frame within the gap window.

use crate::config::BoutRules;
use crate::metrics::format_timestamp;
use crate::types::{BehaviorLabel, Bout, LabelSeries, MergerState};
use tracing::trace;

/// Single-pass bout segmentation over one label series
pub struct BoutMerger<'a> {
    series: &'a LabelSeries,
    fps: f64,
    min_frames: usize,
    max_frames: Option<usize>,
    gap_frames: usize,
    state: MergerState,
    cursor: usize,
    bouts: Vec<Bout>,
}

impl<'a> BoutMerger<'a> {
    pub fn new(series: &'a LabelSeries, rules: &BoutRules, fps: f64) -> Self {
        Self {
            series,
            fps,
            min_frames: rules.min_duration.to_frames(fps),
            max_frames: rules.max_duration.map(|max| max.to_frames(fps)),
            gap_frames: rules.gap.to_frames(fps),
            state: MergerState::Idle,
            cursor: 0,
            bouts: Vec::new(),
        }
    }

    pub fn state(&self) -> MergerState {
        self.state
    }

    /// Bouts emitted so far
    pub fn bouts(&self) -> &[Bout] {
        &self.bouts
    }

    /// Consume the next frame. Returns false once the series is exhausted.
    pub fn advance(&mut self) -> bool {
        let i = self.cursor;
        if i >= self.series.len() {
            return false;
        }
        self.cursor += 1;

        let current = self.series.valid_label(i).filter(|label| !label.is_none());
        match (self.state, current) {
            (MergerState::Idle, Some(label)) => {
                self.state = MergerState::Open { label, start: i };
            }
            (MergerState::Idle, None) => {}
            (MergerState::Open { label: open, .. }, Some(label)) if label == open => {}
            (MergerState::Open { label: open, start }, next) => {
                if self.can_bridge(i, open) {
                    return true;
                }
                self.close(start, i, open);
                self.state = match next {
                    Some(label) => MergerState::Open { label, start: i },
                    None => MergerState::Idle,
                };
            }
        }
        true
    }

    /// Close any open bout at the end of the series and return all bouts
    pub fn finish(mut self) -> Vec<Bout> {
        while self.advance() {}
        if let MergerState::Open { label, start } = self.state {
            self.close(start, self.series.len(), label);
            self.state = MergerState::Idle;
        }
        self.bouts
    }

    /// Whether `label` reappears on a valid frame in `[from, from + gap)`
    fn can_bridge(&self, from: usize, label: BehaviorLabel) -> bool {
        let end = (from + self.gap_frames).min(self.series.len());
        (from..end).any(|j| self.series.valid_label(j) == Some(label))
    }

    /// Emit `[start, end)` if it satisfies the duration bounds
    fn close(&mut self, start: usize, end: usize, label: BehaviorLabel) {
        let duration = end - start;
        if duration < self.min_frames {
            trace!(start, duration, "bout shorter than minimum, discarded");
            return;
        }
        if self.max_frames.is_some_and(|max| duration > max) {
            trace!(start, duration, "bout longer than maximum, discarded");
            return;
        }

        let last = end - 1;
        let start_s = start as f64 / self.fps;
        let end_s = last as f64 / self.fps;
        self.bouts.push(Bout {
            label,
            start_frame: start,
            end_frame: last,
            duration_frames: duration,
            start_s,
            end_s,
            duration_s: duration as f64 / self.fps,
            start_time: format_timestamp(start_s),
            end_time: format_timestamp(end_s),
            snapshot: self.series.snapshot(last),
        });
    }
}

/// Segment `series` into bouts using `rules`
pub fn merge_bouts(series: &LabelSeries, rules: &BoutRules, fps: f64) -> Vec<Bout> {
    BoutMerger::new(series, rules, fps).finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeSpan;
    use std::collections::BTreeMap;

    use crate::types::BehaviorLabel::{DrugSide, Interaction, None as Idle, Proximity, SalineSide};

    fn series(labels: Vec<BehaviorLabel>) -> LabelSeries {
        LabelSeries {
            valid: vec![true; labels.len()],
            labels,
            features: BTreeMap::new(),
        }
    }

    fn runs(parts: &[(BehaviorLabel, usize)]) -> Vec<BehaviorLabel> {
        parts
            .iter()
            .flat_map(|(label, count)| std::iter::repeat(*label).take(*count))
            .collect()
    }

    fn social_rules() -> BoutRules {
        BoutRules {
            min_duration: TimeSpan::Seconds(2.0),
            max_duration: None,
            gap: TimeSpan::Seconds(2.0),
            label_smoothing: None,
        }
    }

    #[test]
    fn test_short_gap_is_bridged() {
        let labels = runs(&[(Interaction, 90), (Idle, 6), (Interaction, 55)]);
        let bouts = merge_bouts(&series(labels), &social_rules(), 30.0);
        assert_eq!(bouts.len(), 1);
        assert_eq!(bouts[0].start_frame, 0);
        assert_eq!(bouts[0].end_frame, 150);
        assert_eq!(bouts[0].duration_frames, 151);
        assert_eq!(bouts[0].label, Interaction);
    }

    #[test]
    fn test_long_gap_splits_bouts() {
        let labels = runs(&[(Interaction, 90), (Idle, 70), (Interaction, 90)]);
        let bouts = merge_bouts(&series(labels), &social_rules(), 30.0);
        assert_eq!(bouts.len(), 2);
        assert_eq!(bouts[0].end_frame, 89);
        assert_eq!(bouts[1].start_frame, 160);
    }

    #[test]
    fn test_short_bout_is_discarded() {
        let rules = BoutRules {
            min_duration: TimeSpan::Frames(15),
            max_duration: None,
            gap: TimeSpan::Frames(0),
            label_smoothing: None,
        };
        let labels = runs(&[(Idle, 5), (Proximity, 10), (Idle, 5)]);
        assert!(merge_bouts(&series(labels), &rules, 30.0).is_empty());
    }

    #[test]
    fn test_max_duration_is_optional() {
        let labels = runs(&[(DrugSide, 50)]);
        let capped = BoutRules::default();
        assert!(merge_bouts(&series(labels.clone()), &capped, 30.0).is_empty());

        let uncapped = BoutRules {
            max_duration: None,
            ..BoutRules::default()
        };
        assert_eq!(merge_bouts(&series(labels), &uncapped, 30.0).len(), 1);
    }

    #[test]
    fn test_label_switch_without_gap_opens_new_bout() {
        let labels = runs(&[(DrugSide, 20), (SalineSide, 20)]);
        let bouts = merge_bouts(&series(labels), &BoutRules::default(), 30.0);
        assert_eq!(bouts.len(), 2);
        assert_eq!((bouts[0].start_frame, bouts[0].end_frame), (0, 19));
        assert_eq!((bouts[1].start_frame, bouts[1].end_frame), (20, 39));
        assert_eq!(bouts[1].label, SalineSide);
    }

    #[test]
    fn test_invalid_frames_are_bridged_like_gaps() {
        let mut labels = series(runs(&[(Interaction, 100)]));
        for i in 40..45 {
            labels.valid[i] = false;
        }
        let bouts = merge_bouts(&labels, &social_rules(), 30.0);
        assert_eq!(bouts.len(), 1);
        assert_eq!(bouts[0].end_frame, 99);

        let no_gap = BoutRules {
            gap: TimeSpan::Frames(0),
            ..social_rules()
        };
        let bouts = merge_bouts(&labels, &no_gap, 30.0);
        assert_eq!(bouts.len(), 0);
    }

    #[test]
    fn test_snapshot_taken_at_last_frame() {
        let mut labels = series(runs(&[(Interaction, 20), (Idle, 10)]));
        labels
            .features
            .insert("distance".to_string(), (0..30).map(|i| i as f64).collect());
        let rules = BoutRules {
            max_duration: None,
            ..BoutRules::default()
        };
        let bouts = merge_bouts(&labels, &rules, 30.0);
        assert_eq!(bouts[0].end_frame, 19);
        assert_eq!(bouts[0].snapshot["distance"], 19.0);
        assert_eq!(bouts[0].start_time, "00:00.000");
        assert_eq!(bouts[0].end_time, "00:00.633");
    }

    #[test]
    fn test_state_is_visible_while_scanning() {
        let labels = series(runs(&[(Idle, 1), (Proximity, 2)]));
        let rules = BoutRules::default();
        let mut merger = BoutMerger::new(&labels, &rules, 30.0);
        assert_eq!(merger.state(), MergerState::Idle);
        merger.advance();
        assert_eq!(merger.state(), MergerState::Idle);
        merger.advance();
        assert_eq!(
            merger.state(),
            MergerState::Open {
                label: Proximity,
                start: 1
            }
        );
        assert!(merger.bouts().is_empty());
    }

    #[test]
    fn test_bouts_never_overlap_and_respect_minimum() {
        // Deterministic pseudo-random label stream
        let mut state: u32 = 12345;
        let palette = [Idle, Interaction, Proximity];
        let mut labels = Vec::new();
        while labels.len() < 3000 {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let label = palette[(state >> 16) as usize % 3];
            let run = 1 + (state >> 8) as usize % 40;
            labels.extend(std::iter::repeat(label).take(run));
        }
        let rules = BoutRules {
            min_duration: TimeSpan::Frames(15),
            max_duration: None,
            gap: TimeSpan::Frames(10),
            label_smoothing: None,
        };
        let bouts = merge_bouts(&series(labels), &rules, 30.0);
        assert!(!bouts.is_empty());
        for bout in &bouts {
            assert!(bout.end_frame - bout.start_frame + 1 >= 15);
        }
        for pair in bouts.windows(2) {
            assert!(pair[0].end_frame < pair[1].start_frame);
        }
    }
}
