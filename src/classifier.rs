//! Frame classification
//!
//! One engine serves every label-based domain. The per-domain behavior is
//! data: a `FrameRule` variant plus thresholds, carried in `ClassifierConfig`.

use crate::config::ClassifierConfig;
use crate::error::AnalysisError;
use crate::features::{
    body_bend_angle, centroid, euclidean_distance, facing_angles, min_distance_to, HeadPose,
};
use crate::smoothing::interpolate_missing;
use crate::types::{BehaviorLabel, FrameSeries, KeypointKey, KeypointTable, LabelSeries};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Classification strategy for one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameRule {
    /// Two animals: close and mutually facing ⇒ interaction, close ⇒ proximity
    Social {
        individuals: [String; 2],
        mouth: String,
        left_ear: String,
        right_ear: String,
        close_distance_px: f64,
        facing_angle_deg: f64,
    },
    /// Left/right side of a vertical midline through the body centre
    AreaSplit {
        center_keypoints: Vec<KeypointKey>,
        midline_x: f64,
    },
    /// Any paw within `max_distance_px` of the target keypoint
    PawProximity {
        paws: Vec<KeypointKey>,
        target: KeypointKey,
        max_distance_px: f64,
        label: BehaviorLabel,
    },
    /// Head→body→tail bend angle above `min_angle_deg`
    BodyBend {
        head: KeypointKey,
        body: KeypointKey,
        tail: KeypointKey,
        min_angle_deg: f64,
    },
}

impl FrameRule {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(AnalysisError::Configuration(format!(
                    "{name} must be positive, got {v}"
                )))
            }
        };
        match self {
            FrameRule::Social {
                close_distance_px,
                facing_angle_deg,
                ..
            } => {
                positive("close_distance_px", *close_distance_px)?;
                positive("facing_angle_deg", *facing_angle_deg)
            }
            FrameRule::AreaSplit {
                center_keypoints,
                midline_x,
            } => {
                if center_keypoints.is_empty() || !midline_x.is_finite() {
                    return Err(AnalysisError::Configuration(
                        "area split needs centre keypoints and a finite midline".to_string(),
                    ));
                }
                Ok(())
            }
            FrameRule::PawProximity {
                paws,
                max_distance_px,
                label,
                ..
            } => {
                if paws.is_empty() || label.is_none() {
                    return Err(AnalysisError::Configuration(
                        "paw proximity needs at least one paw and a behavior label".to_string(),
                    ));
                }
                positive("max_distance_px", *max_distance_px)
            }
            FrameRule::BodyBend { min_angle_deg, .. } => positive("min_angle_deg", *min_angle_deg),
        }
    }
}

/// Gap-filled copies of the keypoints a rule reads
struct Filled<'a> {
    table: &'a KeypointTable,
}

impl Filled<'_> {
    fn get(&self, key: &KeypointKey) -> Result<FrameSeries, AnalysisError> {
        self.table
            .bodypart(key.individual.as_deref(), &key.bodypart)
            .map(interpolate_missing)
    }
}

/// Per-frame classifier for the label-based domains
pub struct FrameClassifier<'a> {
    config: &'a ClassifierConfig,
}

impl<'a> FrameClassifier<'a> {
    pub fn new(config: &'a ClassifierConfig) -> Self {
        Self { config }
    }

    /// Frames where every required keypoint is confidently tracked
    pub fn valid_frames(&self, table: &KeypointTable) -> Result<Vec<bool>, AnalysisError> {
        let mut valid = vec![true; table.frame_count()];
        for key in &self.config.required_keypoints {
            let series = table.bodypart(key.individual.as_deref(), &key.bodypart)?;
            for (flag, likelihood) in valid.iter_mut().zip(&series.likelihood) {
                *flag &= *likelihood > self.config.likelihood_threshold;
            }
        }
        Ok(valid)
    }

    /// Label every frame and collect the features used to decide
    pub fn classify(&self, table: &KeypointTable) -> Result<LabelSeries, AnalysisError> {
        let valid = self.valid_frames(table)?;
        let filled = Filled { table };
        let mut features = BTreeMap::new();

        let labels = match &self.config.rule {
            FrameRule::Social {
                individuals,
                mouth,
                left_ear,
                right_ear,
                close_distance_px,
                facing_angle_deg,
            } => {
                let load = |ind: &str, bp: &str| filled.get(&KeypointKey::new(Some(ind), bp));
                let (m1, l1, r1) = (
                    load(individuals[0].as_str(), mouth.as_str())?,
                    load(individuals[0].as_str(), left_ear.as_str())?,
                    load(individuals[0].as_str(), right_ear.as_str())?,
                );
                let (m2, l2, r2) = (
                    load(individuals[1].as_str(), mouth.as_str())?,
                    load(individuals[1].as_str(), left_ear.as_str())?,
                    load(individuals[1].as_str(), right_ear.as_str())?,
                );

                let distance = euclidean_distance(&m1, &m2);
                let (angle1, angle2) = facing_angles(
                    &HeadPose {
                        mouth: &m1,
                        left_ear: &l1,
                        right_ear: &r1,
                    },
                    &HeadPose {
                        mouth: &m2,
                        left_ear: &l2,
                        right_ear: &r2,
                    },
                );

                let labels = (0..distance.len())
                    .map(|i| {
                        let close = distance[i] < *close_distance_px;
                        let mutual = angle1[i] < *facing_angle_deg && angle2[i] < *facing_angle_deg;
                        match (close, mutual) {
                            (true, true) => BehaviorLabel::Interaction,
                            (true, false) => BehaviorLabel::Proximity,
                            _ => BehaviorLabel::None,
                        }
                    })
                    .collect();

                features.insert("distance".to_string(), distance);
                features.insert("mouse1_angle".to_string(), angle1);
                features.insert("mouse2_angle".to_string(), angle2);
                labels
            }
            FrameRule::AreaSplit {
                center_keypoints,
                midline_x,
            } => {
                let points = center_keypoints
                    .iter()
                    .map(|key| filled.get(key))
                    .collect::<Result<Vec<_>, _>>()?;
                let refs: Vec<&FrameSeries> = points.iter().collect();
                let (cx, cy) = centroid(&refs);

                let labels = cx
                    .iter()
                    .map(|x| {
                        if x.is_nan() {
                            BehaviorLabel::None
                        } else if *x < *midline_x {
                            BehaviorLabel::DrugSide
                        } else {
                            BehaviorLabel::SalineSide
                        }
                    })
                    .collect();

                features.insert("center_x".to_string(), cx);
                features.insert("center_y".to_string(), cy);
                labels
            }
            FrameRule::PawProximity {
                paws,
                target,
                max_distance_px,
                label,
            } => {
                let paw_series = paws
                    .iter()
                    .map(|key| filled.get(key))
                    .collect::<Result<Vec<_>, _>>()?;
                let target_series = filled.get(target)?;
                let refs: Vec<&FrameSeries> = paw_series.iter().collect();
                let distance = min_distance_to(&refs, &target_series);

                let labels = distance
                    .iter()
                    .map(|d| {
                        if *d < *max_distance_px {
                            *label
                        } else {
                            BehaviorLabel::None
                        }
                    })
                    .collect();

                features.insert("paw_distance".to_string(), distance);
                labels
            }
            FrameRule::BodyBend {
                head,
                body,
                tail,
                min_angle_deg,
            } => {
                let angles = body_bend_angle(&filled.get(head)?, &filled.get(body)?, &filled.get(tail)?);
                let labels = angles
                    .iter()
                    .map(|a| {
                        if *a > *min_angle_deg {
                            BehaviorLabel::Swimming
                        } else {
                            BehaviorLabel::None
                        }
                    })
                    .collect();

                features.insert("bend_angle".to_string(), angles);
                labels
            }
        };

        let mut series = LabelSeries {
            valid,
            labels,
            features,
        };

        if let Some(window) = self.config.bouts.label_smoothing {
            series.labels = smooth_labels(&series.labels, window.to_frames(self.config.fps));
        }

        debug!(
            frames = series.len(),
            valid = series.valid_count(),
            "classified frames"
        );
        Ok(series)
    }
}

/// Majority vote over a centred window of `window_size` frames.
///
/// Ties go to the label that appears first inside the window.
pub fn smooth_labels(labels: &[BehaviorLabel], window_size: usize) -> Vec<BehaviorLabel> {
    let half = window_size / 2;
    if half == 0 {
        return labels.to_vec();
    }
    let n = labels.len();
    let mut counts: Vec<(BehaviorLabel, usize)> = Vec::with_capacity(8);

    (0..n)
        .map(|i| {
            counts.clear();
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(n);
            for label in &labels[start..end] {
                match counts.iter_mut().find(|(l, _)| l == label) {
                    Some((_, count)) => *count += 1,
                    None => counts.push((*label, 1)),
                }
            }
            let mut best = counts[0];
            for entry in &counts[1..] {
                if entry.1 > best.1 {
                    best = *entry;
                }
            }
            best.0
        })
        .collect()
}
