//! Core data types
//!
//! Types that flow through the analysis pipeline: per-frame keypoint series,
//! the keypoint table built once at ingestion, spatial regions, behavior
//! labels, candidate events and finalized bouts.

use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Per-frame coordinates and confidence for one keypoint.
///
/// Invalid samples carry `NaN` in `x` and `y`. All three vectors always share
/// the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSeries {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub likelihood: Vec<f64>,
}

impl FrameSeries {
    /// Build a series from three channel arrays of equal length
    pub fn new(x: Vec<f64>, y: Vec<f64>, likelihood: Vec<f64>) -> Result<Self, AnalysisError> {
        if x.len() != y.len() || x.len() != likelihood.len() {
            return Err(AnalysisError::Parse(format!(
                "channel length mismatch (x={}, y={}, likelihood={})",
                x.len(),
                y.len(),
                likelihood.len()
            )));
        }
        Ok(Self { x, y, likelihood })
    }

    /// Build a fully-confident series from (x, y) points
    pub fn from_points(points: &[(f64, f64)]) -> Self {
        Self {
            x: points.iter().map(|p| p.0).collect(),
            y: points.iter().map(|p| p.1).collect(),
            likelihood: vec![1.0; points.len()],
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Whether frame `i` carries a usable (x, y) sample
    pub fn is_valid(&self, i: usize) -> bool {
        i < self.len() && !self.x[i].is_nan() && !self.y[i].is_nan()
    }

    /// The (x, y) sample at frame `i`, if valid
    pub fn point(&self, i: usize) -> Option<(f64, f64)> {
        self.is_valid(i).then(|| (self.x[i], self.y[i]))
    }

    /// Mark frame `i` as missing. Likelihood is left untouched.
    pub fn invalidate(&mut self, i: usize) {
        if i < self.len() {
            self.x[i] = f64::NAN;
            self.y[i] = f64::NAN;
        }
    }

    pub fn valid_count(&self) -> usize {
        (0..self.len()).filter(|&i| self.is_valid(i)).count()
    }

    /// True when no frame is missing
    pub fn is_complete(&self) -> bool {
        self.valid_count() == self.len()
    }
}

/// Identifies one tracked keypoint, optionally scoped to an individual
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeypointKey {
    pub individual: Option<String>,
    pub bodypart: String,
}

impl KeypointKey {
    pub fn new(individual: Option<&str>, bodypart: &str) -> Self {
        Self {
            individual: individual.map(str::to_string),
            bodypart: bodypart.to_string(),
        }
    }

    pub fn single(bodypart: &str) -> Self {
        Self::new(None, bodypart)
    }
}

impl fmt::Display for KeypointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.individual {
            Some(individual) => write!(f, "{individual}/{}", self.bodypart),
            None => write!(f, "{}", self.bodypart),
        }
    }
}

/// Keypoint table for one video: every series has the same frame count
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeypointTable {
    frame_count: usize,
    series: BTreeMap<KeypointKey, FrameSeries>,
}

impl KeypointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a series; its length must match the series already present
    pub fn insert(&mut self, key: KeypointKey, series: FrameSeries) -> Result<(), AnalysisError> {
        if !self.series.is_empty() && series.len() != self.frame_count {
            return Err(AnalysisError::Parse(format!(
                "keypoint {key} has {} frames, expected {}",
                series.len(),
                self.frame_count
            )));
        }
        self.frame_count = series.len();
        self.series.insert(key, series);
        Ok(())
    }

    /// Builder-style insert for tests and small callers
    pub fn with(mut self, key: KeypointKey, series: FrameSeries) -> Result<Self, AnalysisError> {
        self.insert(key, series)?;
        Ok(self)
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &KeypointKey> {
        self.series.keys()
    }

    /// Look up a keypoint, failing with `MissingInput` when absent
    pub fn get(&self, key: &KeypointKey) -> Result<&FrameSeries, AnalysisError> {
        self.series
            .get(key)
            .ok_or_else(|| AnalysisError::MissingInput(format!("keypoint {key} not found")))
    }

    /// Look up a keypoint by body part, ignoring individuals when the table
    /// is single-animal
    pub fn bodypart(&self, individual: Option<&str>, bodypart: &str) -> Result<&FrameSeries, AnalysisError> {
        let key = KeypointKey::new(individual, bodypart);
        if let Some(series) = self.series.get(&key) {
            return Ok(series);
        }
        if individual.is_none() {
            let mut matches = self.series.iter().filter(|(k, _)| k.bodypart == bodypart);
            if let (Some((_, series)), None) = (matches.next(), matches.next()) {
                return Ok(series);
            }
        }
        Err(AnalysisError::MissingInput(format!("keypoint {key} not found")))
    }

    /// The only series in a single-keypoint table, or the named one
    pub fn primary(&self, bodypart: Option<&str>) -> Result<&FrameSeries, AnalysisError> {
        match bodypart {
            Some(name) => self.bodypart(None, name),
            None => {
                let mut iter = self.series.values();
                match (iter.next(), iter.next()) {
                    (Some(series), None) => Ok(series),
                    (None, _) => Err(AnalysisError::MissingInput(
                        "keypoint table is empty".to_string(),
                    )),
                    _ => Err(AnalysisError::MissingInput(
                        "table has several keypoints; name the body part to analyse".to_string(),
                    )),
                }
            }
        }
    }
}

/// Axis-aligned rectangle in pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Region {
    pub const fn new(x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> Self {
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }

    /// Bounds included; used for plausibility filtering
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    /// Bounds excluded; used for event regions
    pub fn contains_strict(&self, x: f64, y: f64) -> bool {
        x > self.x_min && x < self.x_max && y > self.y_min && y < self.y_max
    }

    pub fn validate(&self, name: &str) -> Result<(), AnalysisError> {
        let finite = [self.x_min, self.x_max, self.y_min, self.y_max]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.x_min >= self.x_max || self.y_min >= self.y_max {
            return Err(AnalysisError::Configuration(format!(
                "region {name} must have finite bounds with min < max, got {self:?}"
            )));
        }
        Ok(())
    }
}

/// Per-frame behavior label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorLabel {
    None,
    Interaction,
    Proximity,
    DrugSide,
    SalineSide,
    Grooming,
    Swimming,
    TailContact,
}

impl BehaviorLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BehaviorLabel::None => "none",
            BehaviorLabel::Interaction => "interaction",
            BehaviorLabel::Proximity => "proximity",
            BehaviorLabel::DrugSide => "drug_side",
            BehaviorLabel::SalineSide => "saline_side",
            BehaviorLabel::Grooming => "grooming",
            BehaviorLabel::Swimming => "swimming",
            BehaviorLabel::TailContact => "tail_contact",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, BehaviorLabel::None)
    }
}

impl fmt::Display for BehaviorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame-level classification of one video
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelSeries {
    /// Frames where every required keypoint passed the confidence check
    pub valid: Vec<bool>,
    pub labels: Vec<BehaviorLabel>,
    /// Named derived feature series, sampled into bout snapshots
    pub features: BTreeMap<String, Vec<f64>>,
}

impl LabelSeries {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }

    /// Label of frame `i` when the frame is valid
    pub fn valid_label(&self, i: usize) -> Option<BehaviorLabel> {
        (self.valid.get(i).copied().unwrap_or(false)).then(|| self.labels[i])
    }

    /// Feature values at frame `i`, used as the bout end snapshot
    pub fn snapshot(&self, i: usize) -> BTreeMap<String, f64> {
        self.features
            .iter()
            .filter_map(|(name, values)| values.get(i).map(|v| (name.clone(), *v)))
            .collect()
    }
}

/// Tentative grab detection before any duration or validity filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEvent {
    pub start: usize,
    pub candidate: usize,
    pub end: usize,
}

impl CandidateEvent {
    pub fn duration_frames(&self) -> usize {
        self.end - self.start
    }
}

/// Finalized, duration-qualified behavior interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bout {
    pub label: BehaviorLabel,
    pub start_frame: usize,
    /// Last frame belonging to the bout (inclusive)
    pub end_frame: usize,
    pub duration_frames: usize,
    pub start_s: f64,
    pub end_s: f64,
    pub duration_s: f64,
    pub start_time: String,
    pub end_time: String,
    /// Derived feature values sampled at `end_frame`
    pub snapshot: BTreeMap<String, f64>,
}

/// Ordered, non-overlapping bouts of one video
pub type BoutTable = Vec<Bout>;

/// Open/closed state of the bout merger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergerState {
    Idle,
    Open { label: BehaviorLabel, start: usize },
}

/// One sample of an event's trajectory
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub frame: usize,
    pub time: f64,
    pub x: f64,
    pub y: f64,
}

/// Cleaned trajectory segment spanning one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySlice {
    /// 1-based event index, matching row order in the event table
    pub event_index: usize,
    pub points: Vec<TrajectoryPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_series_validity() {
        let mut series = FrameSeries::from_points(&[(1.0, 2.0), (3.0, 4.0)]);
        assert!(series.is_valid(0));
        series.invalidate(1);
        assert!(!series.is_valid(1));
        assert_eq!(series.likelihood[1], 1.0);
        assert_eq!(series.valid_count(), 1);
        assert_eq!(series.point(0), Some((1.0, 2.0)));
        assert_eq!(series.point(5), None);
    }

    #[test]
    fn test_frame_series_length_mismatch() {
        let result = FrameSeries::new(vec![1.0], vec![1.0, 2.0], vec![1.0]);
        assert!(matches!(result, Err(AnalysisError::Parse(_))));
    }

    #[test]
    fn test_table_rejects_mismatched_lengths() {
        let mut table = KeypointTable::new();
        table
            .insert(KeypointKey::single("nose"), FrameSeries::from_points(&[(0.0, 0.0); 4]))
            .unwrap();
        let result = table.insert(
            KeypointKey::single("tail"),
            FrameSeries::from_points(&[(0.0, 0.0); 3]),
        );
        assert!(result.is_err());
        assert_eq!(table.frame_count(), 4);
    }

    #[test]
    fn test_table_lookup() {
        let table = KeypointTable::new()
            .with(
                KeypointKey::new(Some("individual1"), "Mouth"),
                FrameSeries::from_points(&[(1.0, 1.0)]),
            )
            .unwrap();

        assert!(table.bodypart(Some("individual1"), "Mouth").is_ok());
        // Unambiguous body part resolves without the individual
        assert!(table.bodypart(None, "Mouth").is_ok());
        assert!(matches!(
            table.bodypart(Some("individual2"), "Mouth"),
            Err(AnalysisError::MissingInput(_))
        ));
        assert!(table.primary(None).is_ok());
    }

    #[test]
    fn test_region_bounds() {
        let region = Region::new(0.0, 10.0, 0.0, 10.0);
        assert!(region.contains(0.0, 10.0));
        assert!(!region.contains_strict(0.0, 5.0));
        assert!(region.contains_strict(5.0, 5.0));
        assert!(!region.contains(f64::NAN, 5.0));
        assert!(Region::new(5.0, 1.0, 0.0, 1.0).validate("bad").is_err());
    }

    #[test]
    fn test_label_series_snapshot() {
        let mut features = BTreeMap::new();
        features.insert("distance".to_string(), vec![10.0, 20.0]);
        let series = LabelSeries {
            valid: vec![true, false],
            labels: vec![BehaviorLabel::Interaction, BehaviorLabel::None],
            features,
        };
        assert_eq!(series.valid_label(0), Some(BehaviorLabel::Interaction));
        assert_eq!(series.valid_label(1), None);
        assert_eq!(series.snapshot(1)["distance"], 20.0);
    }
}
