//! Scratch scoring
//!
//! Counts frames where a confidently tracked paw moves a scratch-sized
//! distance, then aggregates the counts per minute and per interval.

use crate::config::ScratchConfig;
use crate::error::AnalysisError;
use crate::types::FrameSeries;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Scratch counts for one video
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScratchScore {
    /// Frames accepted as scratch movement
    pub kept_frames: Vec<usize>,
    /// Accepted frames per minute, from minute 0 to the last active minute
    pub per_minute_raw: Vec<usize>,
    /// Per-minute counts with sparse minutes zeroed
    pub per_minute: Vec<usize>,
    /// Sums of `per_minute` over consecutive intervals
    pub per_interval: Vec<usize>,
}

impl ScratchScore {
    pub fn total(&self) -> usize {
        self.per_interval.iter().sum()
    }
}

/// Per-frame paw displacement in px; frame 0 is 0
pub fn paw_displacement(series: &FrameSeries) -> Vec<f64> {
    let mut out = Vec::with_capacity(series.len());
    if series.is_empty() {
        return out;
    }
    out.push(0.0);
    out.extend(
        series
            .x
            .windows(2)
            .zip(series.y.windows(2))
            .map(|(x, y)| (x[1] - x[0]).hypot(y[1] - y[0])),
    );
    out
}

pub struct ScratchScorer;

impl ScratchScorer {
    /// Score one paw series.
    ///
    /// Fails with `InsufficientData` when no frame passes the filters.
    pub fn score(series: &FrameSeries, config: &ScratchConfig) -> Result<ScratchScore, AnalysisError> {
        let displacement = paw_displacement(series);
        let kept_frames: Vec<usize> = (0..series.len())
            .filter(|&i| {
                series.likelihood[i] >= config.likelihood_threshold
                    && displacement[i] >= config.min_distance_px
                    && displacement[i] <= config.max_distance_px
            })
            .collect();

        let Some(&last) = kept_frames.last() else {
            return Err(AnalysisError::InsufficientData(
                "no frame passed the scratch filters".to_string(),
            ));
        };

        let frames_per_minute = config.fps * 60.0;
        let minute_of = |frame: usize| (frame as f64 / frames_per_minute) as usize;

        let mut per_minute_raw = vec![0; minute_of(last) + 1];
        for &frame in &kept_frames {
            per_minute_raw[minute_of(frame)] += 1;
        }

        let per_minute: Vec<usize> = per_minute_raw
            .iter()
            .map(|&count| if count <= config.minute_count_floor { 0 } else { count })
            .collect();
        let per_interval = per_minute
            .chunks(config.interval_minutes.max(1))
            .map(|chunk| chunk.iter().sum())
            .collect();

        debug!(kept = kept_frames.len(), minutes = per_minute.len(), "scratch scored");
        Ok(ScratchScore {
            kept_frames,
            per_minute_raw,
            per_minute,
            per_interval,
        })
    }
}
