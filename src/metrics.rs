//! Per-event kinematics
//!
//! Summaries computed from the cleaned trajectory segment of one event:
//! displacement, speed, acceleration, smoothness and lift height.

use crate::error::AnalysisError;
use crate::types::{CandidateEvent, FrameSeries, TrajectoryPoint, TrajectorySlice};
use serde::{Deserialize, Serialize};

/// Format seconds as `MM:SS.mmm`
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    let minutes = (seconds / 60.0).floor();
    let remainder = seconds - minutes * 60.0;
    format!("{:02}:{:06.3}", minutes as u64, remainder)
}

/// Negative log of the mean squared jerk. Higher is smoother.
///
/// Returns 0 when fewer than three acceleration samples exist. The mean is
/// floored at machine epsilon so a jerk-free signal stays finite.
pub fn smoothness(accelerations: &[f64]) -> f64 {
    if accelerations.len() <= 2 {
        return 0.0;
    }
    let jerk: Vec<f64> = accelerations.windows(2).map(|w| w[1] - w[0]).collect();
    let mean_square = jerk.iter().map(|j| j * j).sum::<f64>() / jerk.len() as f64;
    if mean_square.is_nan() {
        return 0.0;
    }
    -mean_square.max(f64::EPSILON).ln()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Frame-to-frame path speed (px/s) and its derivative (px/s²)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Kinematics {
    pub speeds: Vec<f64>,
    pub accelerations: Vec<f64>,
}

impl Kinematics {
    pub fn from_segment(xs: &[f64], ys: &[f64], fps: f64) -> Self {
        let speeds: Vec<f64> = xs
            .windows(2)
            .zip(ys.windows(2))
            .map(|(x, y)| (x[1] - x[0]).hypot(y[1] - y[0]) * fps)
            .collect();
        let accelerations = speeds.windows(2).map(|s| (s[1] - s[0]) * fps).collect();
        Self {
            speeds,
            accelerations,
        }
    }

    pub fn mean_speed(&self) -> f64 {
        mean(&self.speeds)
    }

    pub fn mean_acceleration(&self) -> f64 {
        mean(&self.accelerations)
    }

    /// Largest acceleration magnitude
    pub fn max_acceleration(&self) -> f64 {
        self.accelerations.iter().map(|a| a.abs()).fold(0.0, f64::max)
    }

    pub fn smoothness(&self) -> f64 {
        smoothness(&self.accelerations)
    }
}

/// One row of the catch results table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchRecord {
    pub start_time: String,
    pub peak_time: String,
    pub end_time: String,
    pub start_frame: usize,
    pub peak_frame: usize,
    pub end_frame: usize,
    pub trajectory_distance: f64,
    pub horizontal_displacement: f64,
    pub average_speed: f64,
    pub lift_height: f64,
    pub left_to_right_distance: f64,
    pub left_to_right_speed: f64,
    pub left_to_right_acceleration_mean: f64,
    pub left_to_right_acceleration_max: f64,
    pub left_to_right_smoothness: f64,
    pub right_to_left_distance: f64,
    pub right_to_left_speed: f64,
    pub right_to_left_acceleration_mean: f64,
    pub right_to_left_acceleration_max: f64,
    pub right_to_left_smoothness: f64,
    pub max_height: f64,
    pub duration: f64,
    pub start_pos_x: f64,
    pub start_pos_y: f64,
    pub end_pos_x: f64,
    pub end_pos_y: f64,
}

/// Borrowed view of `[start, end]` of a gap-free trajectory
fn segment<'t>(
    trajectory: &'t FrameSeries,
    start: usize,
    end: usize,
) -> Result<(&'t [f64], &'t [f64]), AnalysisError> {
    if start > end || end >= trajectory.len() {
        return Err(AnalysisError::DegenerateComputation(format!(
            "segment {start}..={end} outside trajectory of {} frames",
            trajectory.len()
        )));
    }
    Ok((&trajectory.x[start..=end], &trajectory.y[start..=end]))
}

/// Computes per-event summaries from a cleaned trajectory
pub struct MetricsExtractor {
    fps: f64,
}

impl MetricsExtractor {
    pub fn new(fps: f64) -> Self {
        Self { fps }
    }

    /// Build the results row for one grab event.
    ///
    /// Rates over a zero-length event are 0.
    pub fn catch_record(
        &self,
        trajectory: &FrameSeries,
        event: &CandidateEvent,
    ) -> Result<CatchRecord, AnalysisError> {
        let (xs, ys) = segment(trajectory, event.start, event.end)?;
        let fps = self.fps;
        let (x0, y0) = (xs[0], ys[0]);
        let (x1, y1) = (xs[xs.len() - 1], ys[ys.len() - 1]);

        // Image y grows downward, so the topmost point is the minimum y
        let (peak_offset, y_top) = ys
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::INFINITY), |best, (i, y)| if y < best.1 { (i, y) } else { best });
        let peak_frame = event.start + peak_offset;

        let duration = event.duration_frames() as f64 / fps;
        let distance = (x1 - x0).abs();
        let average_speed = if duration > 0.0 { distance / duration } else { 0.0 };
        let height_change = ys.iter().map(|y| (y - y0).abs()).fold(0.0, f64::max);
        let kinematics = Kinematics::from_segment(xs, ys, fps);

        Ok(CatchRecord {
            start_time: format_timestamp(event.start as f64 / fps),
            peak_time: format_timestamp(peak_frame as f64 / fps),
            end_time: format_timestamp(event.end as f64 / fps),
            start_frame: event.start,
            peak_frame,
            end_frame: event.end,
            trajectory_distance: distance,
            horizontal_displacement: distance,
            average_speed,
            lift_height: (y_top - y0).abs(),
            left_to_right_distance: distance,
            left_to_right_speed: kinematics.mean_speed(),
            left_to_right_acceleration_mean: kinematics.mean_acceleration(),
            left_to_right_acceleration_max: kinematics.max_acceleration(),
            left_to_right_smoothness: kinematics.smoothness(),
            right_to_left_distance: 0.0,
            right_to_left_speed: 0.0,
            right_to_left_acceleration_mean: 0.0,
            right_to_left_acceleration_max: 0.0,
            right_to_left_smoothness: 0.0,
            max_height: height_change,
            duration,
            start_pos_x: x0,
            start_pos_y: y0,
            end_pos_x: x1,
            end_pos_y: y1,
        })
    }

    /// Cleaned (frame, time, x, y) samples spanning `[start, end]`
    pub fn trajectory_slice(
        &self,
        trajectory: &FrameSeries,
        event_index: usize,
        start: usize,
        end: usize,
    ) -> Result<TrajectorySlice, AnalysisError> {
        let (xs, ys) = segment(trajectory, start, end)?;
        let points = xs
            .iter()
            .zip(ys)
            .enumerate()
            .map(|(offset, (x, y))| {
                let frame = start + offset;
                TrajectoryPoint {
                    frame,
                    time: frame as f64 / self.fps,
                    x: *x,
                    y: *y,
                }
            })
            .collect();
        Ok(TrajectorySlice {
            event_index,
            points,
        })
    }
}
