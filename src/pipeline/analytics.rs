//! Pairs statistics over resampled close series
//!
//! All series are `Observation` sequences indexed by bucket start. Two-series
//! operations work on the timestamp intersection only: points present in just
//! one input are dropped, never interpolated. Insufficient data is expressed
//! as sentinels (`hedge_ratio` → 0.0) or missing values, not errors.

use super::types::{Bar, Observation};
use serde::Serialize;
use std::collections::BTreeMap;

/// One timestamp present in both inputs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignedPoint {
    pub timestamp_ms: i64,
    pub y: Option<f64>,
    pub x: Option<f64>,
}

/// Close prices of a bar sequence as a series
pub fn closes(bars: &[Bar]) -> Vec<Observation> {
    bars.iter()
        .map(|bar| Observation::new(bar.bucket_start_ms, bar.close))
        .collect()
}

/// Inner-join two series on timestamp, keeping `y`'s order
pub fn align(y: &[Observation], x: &[Observation]) -> Vec<AlignedPoint> {
    let x_by_ts: BTreeMap<i64, Option<f64>> =
        x.iter().map(|obs| (obs.timestamp_ms, obs.value)).collect();

    y.iter()
        .filter_map(|obs| {
            x_by_ts.get(&obs.timestamp_ms).map(|x_value| AlignedPoint {
                timestamp_ms: obs.timestamp_ms,
                y: obs.value,
                x: *x_value,
            })
        })
        .collect()
}

/// OLS slope of `y = beta * x + alpha`
///
/// Returns the 0.0 sentinel when the inputs differ in length, have fewer than
/// two points, or `x` has no variance.
pub fn hedge_ratio(y: &[f64], x: &[f64]) -> f64 {
    if y.len() != x.len() || y.len() < 2 {
        return 0.0;
    }

    let n = y.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (yi, xi) in y.iter().zip(x) {
        let dx = xi - mean_x;
        cov += dx * (yi - mean_y);
        var_x += dx * dx;
    }

    if is_flat(var_x, x) {
        0.0
    } else {
        cov / var_x
    }
}

/// `y - beta * x` on the timestamp intersection
pub fn spread(y: &[Observation], x: &[Observation], beta: f64) -> Vec<Observation> {
    align(y, x)
        .into_iter()
        .map(|point| Observation {
            timestamp_ms: point.timestamp_ms,
            value: match (point.y, point.x) {
                (Some(yv), Some(xv)) => Some(yv - beta * xv),
                _ => None,
            },
        })
        .collect()
}

/// Trailing-window z-score
///
/// Position `i` is defined once `i >= window - 1`, using positions
/// `i - window + 1 ..= i` and the sample standard deviation. Warm-up
/// positions, windows containing a missing value, and flat windows are
/// missing.
pub fn rolling_zscore(series: &[Observation], window: usize) -> Vec<Observation> {
    series
        .iter()
        .enumerate()
        .map(|(i, obs)| {
            let value = trailing_window(series, i, window)
                .and_then(|values| {
                    let (mean, std) = sample_mean_std(&values)?;
                    obs.value.map(|v| (v - mean) / std)
                });
            Observation {
                timestamp_ms: obs.timestamp_ms,
                value,
            }
        })
        .collect()
}

/// Trailing-window Pearson correlation on the timestamp intersection
pub fn rolling_correlation(
    y: &[Observation],
    x: &[Observation],
    window: usize,
) -> Vec<Observation> {
    let aligned = align(y, x);
    let ys: Vec<Observation> = aligned
        .iter()
        .map(|p| Observation {
            timestamp_ms: p.timestamp_ms,
            value: p.y,
        })
        .collect();
    let xs: Vec<Observation> = aligned
        .iter()
        .map(|p| Observation {
            timestamp_ms: p.timestamp_ms,
            value: p.x,
        })
        .collect();

    aligned
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let value = trailing_window(&ys, i, window)
                .zip(trailing_window(&xs, i, window))
                .and_then(|(wy, wx)| pearson(&wy, &wx));
            Observation {
                timestamp_ms: point.timestamp_ms,
                value,
            }
        })
        .collect()
}

/// Summary of the defined values of a spread series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpreadStats {
    pub mean: f64,
    /// Sample standard deviation
    pub std: f64,
    pub count: usize,
}

impl SpreadStats {
    /// `None` with fewer than two defined values
    pub fn from_series(series: &[Observation]) -> Option<Self> {
        let values = defined_values(series);
        if values.len() < 2 {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Some(Self {
            mean,
            std: var.sqrt(),
            count: values.len(),
        })
    }
}

/// Values of a series with missing points dropped
pub fn defined_values(series: &[Observation]) -> Vec<f64> {
    series.iter().filter_map(|obs| obs.value).collect()
}

/// The complete window ending at `end`, or `None` during warm-up or when any
/// value in it is missing
fn trailing_window(series: &[Observation], end: usize, window: usize) -> Option<Vec<f64>> {
    if window < 2 || end + 1 < window {
        return None;
    }
    series[end + 1 - window..=end]
        .iter()
        .map(|obs| obs.value)
        .collect()
}

fn sample_mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let sum_sq_dev = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    if is_flat(sum_sq_dev, values) {
        return None;
    }
    Some((mean, (sum_sq_dev / (n - 1.0)).sqrt()))
}

/// Squared deviations indistinguishable from rounding noise at the scale of
/// `values`; exactly-constant input always qualifies
fn is_flat(sum_sq_dev: f64, values: &[f64]) -> bool {
    let scale: f64 = values.iter().map(|v| v * v).sum();
    sum_sq_dev <= f64::EPSILON * scale
}

fn pearson(y: &[f64], x: &[f64]) -> Option<f64> {
    let n = y.len() as f64;
    let mean_y = y.iter().sum::<f64>() / n;
    let mean_x = x.iter().sum::<f64>() / n;

    let (mut cov, mut var_y, mut var_x) = (0.0, 0.0, 0.0);
    for (yi, xi) in y.iter().zip(x) {
        let dy = yi - mean_y;
        let dx = xi - mean_x;
        cov += dy * dx;
        var_y += dy * dy;
        var_x += dx * dx;
    }

    if is_flat(var_y, y) || is_flat(var_x, x) {
        return None;
    }
    Some((cov / (var_y * var_x).sqrt()).clamp(-1.0, 1.0))
}
