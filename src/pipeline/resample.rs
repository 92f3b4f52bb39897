//! Tick → OHLCV resampling
//!
//! Buckets are aligned to the Unix epoch: a trade at `ts` lands in the bucket
//! starting at `floor(ts / width) * width`. Empty buckets are skipped, never
//! gap-filled.

use super::types::{Bar, Trade};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Resampling interval parsed from labels like `1s`, `1min`, `5min`, `1h`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeframe(Duration);

impl Timeframe {
    pub const ONE_SECOND: Timeframe = Timeframe(Duration::from_secs(1));
    pub const ONE_MINUTE: Timeframe = Timeframe(Duration::from_secs(60));
    pub const FIVE_MINUTES: Timeframe = Timeframe(Duration::from_secs(300));
    pub const ONE_HOUR: Timeframe = Timeframe(Duration::from_secs(3600));

    pub fn from_duration(duration: Duration) -> Option<Self> {
        (duration.as_millis() > 0).then_some(Self(duration))
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    pub fn as_millis(&self) -> i64 {
        i64::try_from(self.0.as_millis()).unwrap_or(i64::MAX)
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Self::ONE_MINUTE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unrecognized timeframe '{0}' (expected e.g. 1s, 1min, 5min, 1h)")]
pub struct TimeframeParseError(pub String);

impl FromStr for Timeframe {
    type Err = TimeframeParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let label = raw.trim().to_lowercase();
        let split = label
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| TimeframeParseError(raw.to_string()))?;
        let (digits, unit) = label.split_at(split);

        let count: u64 = digits
            .parse()
            .map_err(|_| TimeframeParseError(raw.to_string()))?;
        let unit_secs = match unit {
            "s" | "sec" | "secs" => 1,
            "m" | "min" | "mins" | "t" => 60,
            "h" | "hr" | "hour" => 3600,
            _ => return Err(TimeframeParseError(raw.to_string())),
        };

        // Bucket widths are i64 milliseconds
        let secs = count
            .checked_mul(unit_secs)
            .filter(|secs| *secs <= i64::MAX as u64 / 1_000)
            .ok_or_else(|| TimeframeParseError(raw.to_string()))?;

        Timeframe::from_duration(Duration::from_secs(secs))
            .ok_or_else(|| TimeframeParseError(raw.to_string()))
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        if secs > 0 && secs % 3600 == 0 {
            write!(f, "{}h", secs / 3600)
        } else if secs > 0 && secs % 60 == 0 {
            write!(f, "{}min", secs / 60)
        } else if self.0.subsec_millis() == 0 {
            write!(f, "{}s", secs)
        } else {
            write!(f, "{}ms", self.0.as_millis())
        }
    }
}

/// Resample an ascending trade sequence for one symbol into OHLCV bars
///
/// Input must already be time-ordered; this is not checked.
pub fn resample(trades: &[Trade], interval: Duration) -> Vec<Bar> {
    let width = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
    if width <= 0 {
        return Vec::new();
    }

    let mut bars: Vec<Bar> = Vec::new();
    for trade in trades {
        let bucket_start = trade.timestamp_ms.div_euclid(width) * width;

        match bars.last_mut() {
            Some(bar) if bar.bucket_start_ms == bucket_start => {
                bar.high = bar.high.max(trade.price);
                bar.low = bar.low.min(trade.price);
                bar.close = trade.price;
                bar.volume += trade.quantity;
            }
            _ => bars.push(Bar {
                bucket_start_ms: bucket_start,
                open: trade.price,
                high: trade.price,
                low: trade.price,
                close: trade.price,
                volume: trade.quantity,
            }),
        }
    }
    bars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_bucket_ohlcv() {
        let t0 = 1_700_000_000_000;
        let trades = vec![Trade::new(t0, "Y", 100.0, 1.0), Trade::new(t0, "Y", 102.0, 2.0)];

        let bars = resample(&trades, Duration::from_secs(1));
        assert_eq!(
            bars,
            vec![Bar {
                bucket_start_ms: t0,
                open: 100.0,
                high: 102.0,
                low: 100.0,
                close: 102.0,
                volume: 3.0,
            }]
        );
    }

    #[test]
    fn test_epoch_alignment_and_gaps() {
        let trades = vec![
            Trade::new(61_500, "Y", 10.0, 1.0),
            Trade::new(119_999, "Y", 9.0, 1.0),
            Trade::new(120_000, "Y", 11.0, 1.0),
            // 180_000 bucket is empty
            Trade::new(245_000, "Y", 12.0, 0.5),
        ];

        let bars = resample(&trades, Duration::from_secs(60));
        let starts: Vec<i64> = bars.iter().map(|b| b.bucket_start_ms).collect();
        assert_eq!(starts, vec![60_000, 120_000, 240_000]);

        assert_eq!(bars[0].open, 10.0);
        assert_eq!(bars[0].close, 9.0);
        assert_eq!(bars[0].low, 9.0);
        assert_eq!(bars[0].volume, 2.0);
    }

    #[test]
    fn test_pre_epoch_bucket() {
        let bars = resample(&[Trade::new(-1, "Y", 1.0, 1.0)], Duration::from_secs(1));
        assert_eq!(bars[0].bucket_start_ms, -1_000);
    }

    #[test]
    fn test_empty_and_zero_interval() {
        assert!(resample(&[], Duration::from_secs(1)).is_empty());
        let trades = vec![Trade::new(0, "Y", 1.0, 1.0)];
        assert!(resample(&trades, Duration::ZERO).is_empty());
    }

    #[test]
    fn test_timeframe_parsing() {
        assert_eq!("1s".parse::<Timeframe>().unwrap(), Timeframe::ONE_SECOND);
        assert_eq!("1min".parse::<Timeframe>().unwrap(), Timeframe::ONE_MINUTE);
        assert_eq!("5MIN".parse::<Timeframe>().unwrap(), Timeframe::FIVE_MINUTES);
        assert_eq!(" 1h ".parse::<Timeframe>().unwrap(), Timeframe::ONE_HOUR);
        assert_eq!("15m".parse::<Timeframe>().unwrap().as_millis(), 900_000);

        assert!("min".parse::<Timeframe>().is_err());
        assert!("0s".parse::<Timeframe>().is_err());
        assert!("5d".parse::<Timeframe>().is_err());
        assert!("10".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_oversized_timeframe_rejected() {
        assert!("9999999999999999h".parse::<Timeframe>().is_err());
        assert!("18446744073709551615s".parse::<Timeframe>().is_err());
        // Largest width that still fits in i64 milliseconds
        let max_secs = i64::MAX as u64 / 1_000;
        let max = format!("{}s", max_secs).parse::<Timeframe>().unwrap();
        assert_eq!(max.as_millis(), max_secs as i64 * 1_000);
        assert!(format!("{}s", max_secs + 1).parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_timeframe_display() {
        assert_eq!(Timeframe::ONE_SECOND.to_string(), "1s");
        assert_eq!(Timeframe::FIVE_MINUTES.to_string(), "5min");
        assert_eq!(Timeframe::ONE_HOUR.to_string(), "1h");
    }
}
