//! Z-score → trading signal

use super::types::{Observation, Signal};

/// Map a z-score to a signal against a symmetric threshold
///
/// `z > threshold` → Sell, `z < -threshold` → Buy, otherwise None (NaN included).
pub fn evaluate(zscore: f64, threshold: f64) -> Signal {
    if zscore > threshold {
        Signal::Sell
    } else if zscore < -threshold {
        Signal::Buy
    } else {
        Signal::None
    }
}

/// Signal for the last point of a z-score series; missing → None
pub fn evaluate_latest(zscores: &[Observation], threshold: f64) -> Signal {
    zscores
        .last()
        .and_then(|obs| obs.value)
        .map_or(Signal::None, |z| evaluate(z, threshold))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        assert_eq!(evaluate(2.5, 2.0), Signal::Sell);
        assert_eq!(evaluate(-2.5, 2.0), Signal::Buy);
        assert_eq!(evaluate(1.0, 2.0), Signal::None);
    }

    #[test]
    fn test_boundary_is_inclusive_of_none() {
        assert_eq!(evaluate(2.0, 2.0), Signal::None);
        assert_eq!(evaluate(-2.0, 2.0), Signal::None);
        assert_eq!(evaluate(f64::NAN, 2.0), Signal::None);
    }

    #[test]
    fn test_evaluate_latest() {
        let series = vec![Observation::new(1, -3.0), Observation::new(2, 3.0)];
        assert_eq!(evaluate_latest(&series, 2.0), Signal::Sell);

        let trailing_missing = vec![Observation::new(1, 3.0), Observation::missing(2)];
        assert_eq!(evaluate_latest(&trailing_missing, 2.0), Signal::None);
        assert_eq!(evaluate_latest(&[], 2.0), Signal::None);
    }
}
