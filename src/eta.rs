//! Catch-up projection from a window of lag samples.
//!
//! The estimator is a pure function: it never touches the aggregator, it is
//! handed a history snapshot and the current wall clock.

use chrono::{DateTime, Utc};

use crate::metrics::Sample;

/// Fewer windowed samples than this yields [`Eta::InsufficientData`].
pub const MIN_WINDOW_SAMPLES: usize = 3;

/// Which part of the history feeds the trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtaWindow {
    /// Samples taken within the last N seconds of `now`
    Seconds(u64),
    /// The N most recent samples
    Samples(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtaPolicy {
    /// Project when lag reaches zero.
    TrendToZero { window: EtaWindow },
    /// Project when lag drops to `target_lag_secs`; at or below it the
    /// endpoint counts as synced.
    TrendToTarget {
        target_lag_secs: u64,
        window: EtaWindow,
    },
}

impl EtaPolicy {
    pub fn window(&self) -> EtaWindow {
        match *self {
            EtaPolicy::TrendToZero { window } | EtaPolicy::TrendToTarget { window, .. } => window,
        }
    }
}

/// Either a projected duration or the reason there isn't one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Eta {
    /// Seconds until the target is reached
    Seconds(f64),
    Synced,
    InsufficientData,
    /// Trend-to-zero: lag did not shrink across the window
    NotDecreasing,
    /// Trend-to-target: slope is flat or rising
    StableOrIncreasing,
}

impl Eta {
    pub fn as_secs(&self) -> Option<f64> {
        match *self {
            Eta::Seconds(secs) => Some(secs),
            _ => None,
        }
    }
}

pub fn estimate(history: &[Sample], policy: EtaPolicy, now: DateTime<Utc>) -> Eta {
    let window = select_window(history, policy.window(), now);
    if window.len() < MIN_WINDOW_SAMPLES {
        return Eta::InsufficientData;
    }

    let (Some(first), Some(last)) = (window.first(), window.last()) else {
        return Eta::InsufficientData;
    };

    let lag_first = first.lag_secs as f64;
    let lag_last = last.lag_secs as f64;
    let dt = seconds_between(first.sampled_at, last.sampled_at);

    match policy {
        EtaPolicy::TrendToZero { .. } => {
            if dt <= 0.0 {
                return Eta::InsufficientData;
            }
            let recovered = lag_first - lag_last;
            if recovered <= 0.0 {
                return Eta::NotDecreasing;
            }
            let rate = recovered / dt;
            Eta::Seconds(lag_last / rate)
        }
        EtaPolicy::TrendToTarget {
            target_lag_secs, ..
        } => {
            if last.lag_secs <= target_lag_secs {
                return Eta::Synced;
            }
            if dt <= 0.0 {
                return Eta::InsufficientData;
            }
            let slope = (lag_last - lag_first) / dt;
            if slope >= 0.0 {
                return Eta::StableOrIncreasing;
            }
            let remaining = lag_last - target_lag_secs as f64;
            Eta::Seconds(remaining / -slope)
        }
    }
}

fn select_window(history: &[Sample], window: EtaWindow, now: DateTime<Utc>) -> &[Sample] {
    match window {
        EtaWindow::Samples(count) => &history[history.len().saturating_sub(count)..],
        EtaWindow::Seconds(secs) => {
            // History is time ordered, so the window is a suffix.
            let horizon = secs as f64;
            let start = history
                .iter()
                .position(|s| seconds_between(s.sampled_at, now) <= horizon)
                .unwrap_or(history.len());
            &history[start..]
        }
    }
}

fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    later.signed_duration_since(earlier).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const BASE: i64 = 1_700_000_000;

    fn at(offset_secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(BASE + offset_secs, 0).unwrap()
    }

    fn series(points: &[(i64, u64)]) -> Vec<Sample> {
        points
            .iter()
            .enumerate()
            .map(|(i, &(t, lag))| Sample {
                sampled_at: at(t),
                latency: Duration::from_millis(5),
                lag_secs: lag,
                block_number: i as u64,
            })
            .collect()
    }

    fn to_zero(secs: u64) -> EtaPolicy {
        EtaPolicy::TrendToZero {
            window: EtaWindow::Seconds(secs),
        }
    }

    #[test]
    fn decreasing_lag_projects_catch_up() {
        let history = series(&[(0, 100), (10, 80), (20, 60)]);
        let eta = estimate(&history, to_zero(30), at(20));
        assert_eq!(eta, Eta::Seconds(30.0));
    }

    #[test]
    fn increasing_lag_is_not_decreasing() {
        let history = series(&[(0, 50), (10, 55), (20, 60)]);
        assert_eq!(estimate(&history, to_zero(30), at(20)), Eta::NotDecreasing);

        let target = EtaPolicy::TrendToTarget {
            target_lag_secs: 5,
            window: EtaWindow::Samples(20),
        };
        assert_eq!(estimate(&history, target, at(20)), Eta::StableOrIncreasing);
    }

    #[test]
    fn fewer_than_three_windowed_points_is_insufficient() {
        assert_eq!(estimate(&[], to_zero(30), at(0)), Eta::InsufficientData);

        let two = series(&[(0, 100), (10, 0)]);
        assert_eq!(estimate(&two, to_zero(30), at(10)), Eta::InsufficientData);

        // Plenty of history, but only two samples fall in the window.
        let history = series(&[(0, 100), (10, 90), (20, 80), (95, 40), (100, 30)]);
        assert_eq!(estimate(&history, to_zero(10), at(100)), Eta::InsufficientData);

        let target = EtaPolicy::TrendToTarget {
            target_lag_secs: 0,
            window: EtaWindow::Samples(2),
        };
        assert_eq!(estimate(&history, target, at(100)), Eta::InsufficientData);
    }

    #[test]
    fn seconds_window_drops_old_samples() {
        // The early samples rise, the recent ones fall.
        let history = series(&[(0, 10), (5, 90), (100, 100), (110, 80), (120, 60)]);
        assert_eq!(estimate(&history, to_zero(30), at(120)), Eta::Seconds(30.0));
        assert_eq!(estimate(&history, to_zero(500), at(120)), Eta::NotDecreasing);
    }

    #[test]
    fn zero_elapsed_window_is_insufficient() {
        let history = series(&[(5, 30), (5, 20), (5, 10)]);
        assert_eq!(estimate(&history, to_zero(30), at(5)), Eta::InsufficientData);
    }

    #[test]
    fn trend_to_target_reports_synced_and_projects_remaining() {
        let policy = EtaPolicy::TrendToTarget {
            target_lag_secs: 5,
            window: EtaWindow::Samples(3),
        };

        let synced = series(&[(0, 40), (1, 20), (2, 4)]);
        assert_eq!(estimate(&synced, policy, at(2)), Eta::Synced);

        // Only the last three samples count: slope is -2 lag-sec per sec.
        let catching_up = series(&[(0, 1), (10, 45), (15, 35), (20, 25)]);
        assert_eq!(estimate(&catching_up, policy, at(20)), Eta::Seconds(10.0));

        let crawling = series(&[(0, 100), (1000, 99), (2000, 98)]);
        let secs = estimate(&crawling, policy, at(2000)).as_secs().unwrap();
        assert!(secs.is_finite());
        assert!((secs - 93_000.0).abs() < 1e-6);
    }

    #[test]
    fn numeric_only_when_lag_strictly_decreases() {
        let flat = series(&[(0, 7), (10, 7), (20, 7)]);
        let eta = estimate(&flat, to_zero(60), at(20));
        assert_eq!(eta, Eta::NotDecreasing);
        assert!(eta.as_secs().is_none());

        let down = series(&[(0, 8), (10, 7), (20, 7)]);
        assert!(estimate(&down, to_zero(60), at(20)).as_secs().is_some());
    }
}
