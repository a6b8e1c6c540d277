//! Gap filling and smoothing
//!
//! Linear interpolation fills invalidated samples per axis, then a
//! Savitzky-Golay filter denoises the completed series.

use crate::config::SmoothingConfig;
use crate::types::FrameSeries;
use nalgebra::{DMatrix, DVector};
use tracing::warn;

/// Linearly interpolate the NaN entries of `values`.
///
/// Entries before the first and after the last valid sample are linearly
/// extrapolated from the two nearest valid samples. With fewer than two valid
/// samples the input is returned unchanged.
pub fn interpolate_axis(values: &[f64]) -> Vec<f64> {
    let valid: Vec<usize> = (0..values.len()).filter(|&i| !values[i].is_nan()).collect();
    if valid.len() < 2 || valid.len() == values.len() {
        return values.to_vec();
    }

    let line = |a: usize, b: usize, i: usize| {
        let (xa, xb) = (a as f64, b as f64);
        let slope = (values[b] - values[a]) / (xb - xa);
        values[a] + slope * (i as f64 - xa)
    };

    let first = valid[0];
    let last = valid[valid.len() - 1];
    let mut out = values.to_vec();
    let mut segment = 0;

    for (i, value) in out.iter_mut().enumerate() {
        if !value.is_nan() {
            continue;
        }
        *value = if i < first {
            line(valid[0], valid[1], i)
        } else if i > last {
            line(valid[valid.len() - 2], last, i)
        } else {
            while valid[segment + 1] < i {
                segment += 1;
            }
            line(valid[segment], valid[segment + 1], i)
        };
    }
    out
}

/// Fill missing (x, y) samples. Likelihood is left untouched.
pub fn interpolate_missing(series: &FrameSeries) -> FrameSeries {
    FrameSeries {
        x: interpolate_axis(&series.x),
        y: interpolate_axis(&series.y),
        likelihood: series.likelihood.clone(),
    }
}

/// Least-squares projection for a centred window: row k gives the k-th
/// polynomial coefficient of the fit.
fn savgol_projection(window_length: usize, polyorder: usize) -> Option<DMatrix<f64>> {
    let half = (window_length / 2) as f64;
    let design = DMatrix::from_fn(window_length, polyorder + 1, |row, col| {
        (row as f64 - half).powi(col as i32)
    });
    let normal = design.transpose() * &design;
    let inverse = normal.try_inverse()?;
    Some(inverse * design.transpose())
}

fn eval_poly(coefficients: &DVector<f64>, t: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * t + c)
}

/// Savitzky-Golay filter over one axis.
///
/// Interior samples take the centre value of a local polynomial fit; the
/// first and last `window_length / 2` samples are evaluated on the fit of the
/// first and last full window. Series shorter than the window, series with
/// NaN, and invalid window/order combinations are returned unchanged.
pub fn savgol_filter(values: &[f64], window_length: usize, polyorder: usize) -> Vec<f64> {
    let n = values.len();
    if window_length == 0 || window_length % 2 == 0 || polyorder >= window_length {
        warn!(window_length, polyorder, "invalid smoothing window, skipping");
        return values.to_vec();
    }
    if n < window_length || values.iter().any(|v| v.is_nan()) {
        return values.to_vec();
    }
    let Some(projection) = savgol_projection(window_length, polyorder) else {
        return values.to_vec();
    };

    let half = window_length / 2;
    let fit = |start: usize| -> DVector<f64> {
        let window = DVector::from_column_slice(&values[start..start + window_length]);
        &projection * window
    };

    let mut out = vec![0.0; n];
    let centre = projection.row(0);
    for i in half..n - half {
        out[i] = values[i - half..=i + half]
            .iter()
            .zip(centre.iter())
            .map(|(v, c)| v * c)
            .sum();
    }

    let head = fit(0);
    for (i, value) in out.iter_mut().enumerate().take(half) {
        *value = eval_poly(&head, i as f64 - half as f64);
    }
    let tail_start = n - window_length;
    let tail = fit(tail_start);
    for i in n - half..n {
        out[i] = eval_poly(&tail, (i - tail_start) as f64 - half as f64);
    }
    out
}

/// Smooth both axes of a gap-free series
pub fn smooth_trajectory(series: &FrameSeries, config: &SmoothingConfig) -> FrameSeries {
    FrameSeries {
        x: savgol_filter(&series.x, config.window_length, config.polyorder),
        y: savgol_filter(&series.y, config.window_length, config.polyorder),
        likelihood: series.likelihood.clone(),
    }
}
