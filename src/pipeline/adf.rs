//! Augmented Dickey-Fuller stationarity test
//!
//! Regression with constant:
//!
//! ```text
//! Δy[t] = α + γ·y[t-1] + Σ δ[i]·Δy[t-i] + ε[t],   i = 1..=p
//! ```
//!
//! The statistic is the t-ratio of γ. The lag `p` is chosen by AIC over
//! `0..=12·(n/100)^¼` on a common sample, then refit on the full sample.
//! P-values use MacKinnon's (1994) response-surface approximation; critical
//! values use MacKinnon (2010) finite-sample coefficients.
//!
//! Advisory only: the result is reported alongside signals but never gates them.

use super::analytics::defined_values;
use super::types::Observation;
use serde::Serialize;

/// Fewer defined observations than this yields no result
pub const MIN_OBSERVATIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CriticalValues {
    pub one_pct: f64,
    pub five_pct: f64,
    pub ten_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdfResult {
    pub statistic: f64,
    pub p_value: f64,
    /// Number of lagged differences in the chosen regression
    pub used_lag: usize,
    /// Observations used in the chosen regression
    pub n_obs: usize,
    pub critical_values: CriticalValues,
}

impl AdfResult {
    /// Unit root rejected at `level` (e.g. 0.05)
    pub fn is_stationary_at(&self, level: f64) -> bool {
        self.p_value < level
    }
}

/// Run the test on a series, ignoring missing points
pub fn adf_test(series: &[Observation]) -> Option<AdfResult> {
    adf_test_values(&defined_values(series))
}

pub fn adf_test_values(values: &[f64]) -> Option<AdfResult> {
    let n = values.len();
    if n < MIN_OBSERVATIONS {
        return None;
    }

    let max_lag = max_lag(n);
    let diffs: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();

    // Every candidate uses the sample of the longest lag so AICs compare
    let mut best: Option<(usize, f64)> = None;
    for lag in 0..=max_lag {
        if let Some(fit) = fit_regression(values, &diffs, lag, max_lag) {
            let aic = fit.aic();
            if best.map_or(true, |(_, best_aic)| aic < best_aic) {
                best = Some((lag, aic));
            }
        }
    }
    let (used_lag, _) = best?;

    let fit = fit_regression(values, &diffs, used_lag, used_lag)?;
    // Column 0 is the constant, column 1 the lagged level
    let statistic = fit.t_stat(1)?;

    Some(AdfResult {
        statistic,
        p_value: mackinnon_p_value(statistic),
        used_lag,
        n_obs: fit.nobs,
        critical_values: mackinnon_critical_values(fit.nobs),
    })
}

fn max_lag(n: usize) -> usize {
    let schwert = (12.0 * (n as f64 / 100.0).powf(0.25)).ceil() as usize;
    schwert.min((n / 2).saturating_sub(2))
}

struct OlsFit {
    params: Vec<f64>,
    std_errors: Vec<f64>,
    rss: f64,
    nobs: usize,
}

impl OlsFit {
    fn aic(&self) -> f64 {
        let n = self.nobs as f64;
        let k = self.params.len() as f64;
        let llf = -n / 2.0 * ((2.0 * std::f64::consts::PI).ln() + (self.rss / n).ln() + 1.0);
        -2.0 * llf + 2.0 * k
    }

    fn t_stat(&self, column: usize) -> Option<f64> {
        let se = *self.std_errors.get(column)?;
        if !se.is_finite() || se <= 0.0 {
            return None;
        }
        Some(self.params[column] / se)
    }
}

/// Build and fit the ADF regression with `lag` lagged differences, starting
/// at difference index `start` (`start >= lag`)
fn fit_regression(values: &[f64], diffs: &[f64], lag: usize, start: usize) -> Option<OlsFit> {
    let mut rows = Vec::with_capacity(diffs.len().saturating_sub(start));
    let mut target = Vec::with_capacity(rows.capacity());

    for t in start..diffs.len() {
        let mut row = Vec::with_capacity(lag + 2);
        row.push(1.0);
        row.push(values[t]);
        row.extend((1..=lag).map(|i| diffs[t - i]));
        rows.push(row);
        target.push(diffs[t]);
    }

    ols(&rows, &target)
}

fn ols(rows: &[Vec<f64>], y: &[f64]) -> Option<OlsFit> {
    let nobs = rows.len();
    let k = rows.first()?.len();
    if nobs <= k {
        return None;
    }

    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for (row, &yi) in rows.iter().zip(y) {
        for i in 0..k {
            xty[i] += row[i] * yi;
            for j in 0..k {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }

    let inv = invert(xtx)?;
    let params: Vec<f64> = (0..k)
        .map(|i| (0..k).map(|j| inv[i][j] * xty[j]).sum())
        .collect();

    let rss: f64 = rows
        .iter()
        .zip(y)
        .map(|(row, &yi)| {
            let fitted: f64 = row.iter().zip(&params).map(|(x, b)| x * b).sum();
            (yi - fitted).powi(2)
        })
        .sum();

    // An exact fit carries no information about the unit root
    let mean_y = y.iter().sum::<f64>() / nobs as f64;
    let tss: f64 = y.iter().map(|v| (v - mean_y).powi(2)).sum();
    if rss <= 1e-12 * tss.max(f64::MIN_POSITIVE) {
        return None;
    }

    let sigma2 = rss / (nobs - k) as f64;
    let std_errors = (0..k).map(|i| (sigma2 * inv[i][i]).sqrt()).collect();

    Some(OlsFit {
        params,
        std_errors,
        rss,
        nobs,
    })
}

/// Inverse of a symmetric positive semi-definite matrix; `None` if singular
///
/// Rows and columns are scaled to a unit diagonal first so the singularity
/// tolerance does not depend on the magnitude of the regressors.
fn invert(m: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
    let scale = m
        .iter()
        .enumerate()
        .map(|(i, row)| (row[i] > 0.0).then(|| row[i].sqrt().recip()))
        .collect::<Option<Vec<f64>>>()?;

    let scaled = m
        .iter()
        .enumerate()
        .map(|(i, row)| row.iter().enumerate().map(|(j, v)| v * scale[i] * scale[j]).collect())
        .collect();

    let inv = gauss_jordan(scaled)?;
    Some(
        inv.iter()
            .enumerate()
            .map(|(i, row)| row.iter().enumerate().map(|(j, v)| v * scale[i] * scale[j]).collect())
            .collect(),
    )
}

/// Gauss-Jordan inverse with partial pivoting
fn gauss_jordan(mut m: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
    let k = m.len();
    let mut inv: Vec<Vec<f64>> = (0..k)
        .map(|i| (0..k).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for col in 0..k {
        let pivot = (col..k).max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))?;
        if m[pivot][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot);
        inv.swap(col, pivot);

        let p = m[col][col];
        for j in 0..k {
            m[col][j] /= p;
            inv[col][j] /= p;
        }

        for row in 0..k {
            if row == col {
                continue;
            }
            let factor = m[row][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..k {
                m[row][j] -= factor * m[col][j];
                inv[row][j] -= factor * inv[col][j];
            }
        }
    }
    Some(inv)
}

/// MacKinnon (1994) approximate p-value, constant-only regression, one series
fn mackinnon_p_value(statistic: f64) -> f64 {
    const TAU_MAX: f64 = 2.74;
    const TAU_MIN: f64 = -18.83;
    const TAU_STAR: f64 = -1.61;
    const SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038269];
    const LARGE_P: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

    if statistic > TAU_MAX {
        return 1.0;
    }
    if statistic < TAU_MIN {
        return 0.0;
    }

    let coefs: &[f64] = if statistic <= TAU_STAR {
        &SMALL_P
    } else {
        &LARGE_P
    };
    normal_cdf(polyval(coefs, statistic))
}

/// MacKinnon (2010) critical values for a sample of `nobs`, constant-only
fn mackinnon_critical_values(nobs: usize) -> CriticalValues {
    const ONE_PCT: [f64; 4] = [-3.43035, -6.5393, -16.786, -79.433];
    const FIVE_PCT: [f64; 4] = [-2.86154, -2.8903, -4.234, -40.04];
    const TEN_PCT: [f64; 4] = [-2.56677, -1.5384, -2.809, 0.0];

    let inv_n = 1.0 / nobs.max(1) as f64;
    CriticalValues {
        one_pct: polyval(&ONE_PCT, inv_n),
        five_pct: polyval(&FIVE_PCT, inv_n),
        ten_pct: polyval(&TEN_PCT, inv_n),
    }
}

/// `c[0] + c[1]·x + c[2]·x² + ...`
fn polyval(coefs: &[f64], x: f64) -> f64 {
    coefs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

/// Complementary error function, fractional error below 1.2e-7
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87
                                    + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let r = t * poly.exp();
    if x >= 0.0 {
        r
    } else {
        2.0 - r
    }
}
