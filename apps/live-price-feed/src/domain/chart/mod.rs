//! Rolling Chart Buffer
//!
//! Bounded, ascending time series backing one chart consumer.
//!
//! # Invariants
//!
//! - Points are strictly ascending by timestamp.
//! - No two points are closer than one bucket width; a candidate landing
//!   inside the last point's bucket overwrites that point's price.
//! - The buffer never holds more than `max_points` points, and never holds
//!   a point older than `latest.t - window`.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Ticks closer than this collapse into one point.
pub const DEFAULT_BUCKET_WIDTH: Duration = Duration::from_millis(1_000);

/// Maximum number of retained points.
pub const DEFAULT_MAX_POINTS: usize = 1_000;

/// Span of retained history measured back from the newest point.
pub const DEFAULT_RETENTION_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Minimum look-back when classifying direction.
pub const DEFAULT_TREND_INTERVAL: Duration = Duration::from_millis(1_000);

// =============================================================================
// Points
// =============================================================================

/// One plotted observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    /// Epoch milliseconds.
    pub timestamp_ms: i64,
    /// Price at that instant.
    pub price: f64,
}

impl ChartPoint {
    /// Create a point.
    #[must_use]
    pub const fn new(timestamp_ms: i64, price: f64) -> Self {
        Self {
            timestamp_ms,
            price,
        }
    }

    /// Whether the point can be plotted.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.timestamp_ms > 0
    }
}

/// Price movement relative to the trend reference point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Price above the reference.
    Rising,
    /// Price below the reference.
    Falling,
    /// Price equal to the reference, no reference, or market closed.
    #[default]
    Unchanged,
}

// =============================================================================
// Retention Policy
// =============================================================================

/// Bucket and retention thresholds for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Merge width.
    pub bucket_width: Duration,
    /// Maximum retained points (at least 1).
    pub max_points: usize,
    /// Maximum retained span.
    pub window: Duration,
    /// Minimum look-back for direction classification.
    pub trend_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            bucket_width: DEFAULT_BUCKET_WIDTH,
            max_points: DEFAULT_MAX_POINTS,
            window: DEFAULT_RETENTION_WINDOW,
            trend_interval: DEFAULT_TREND_INTERVAL,
        }
    }
}

impl RetentionPolicy {
    /// Merge width, never below 1 ms so equal timestamps always merge.
    fn bucket_ms(&self) -> i64 {
        duration_ms(self.bucket_width).max(1)
    }

    fn window_ms(&self) -> i64 {
        duration_ms(self.window)
    }

    fn trend_ms(&self) -> i64 {
        duration_ms(self.trend_interval)
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

// =============================================================================
// Buffer
// =============================================================================

/// What happened to a candidate point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointOutcome {
    /// Overwrote the last point's price.
    Merged,
    /// Added a new point.
    Appended {
        /// Points evicted from the head as a result.
        evicted: usize,
    },
    /// Older than the last point by at least one bucket.
    Stale,
    /// Non-finite price or non-positive timestamp.
    Invalid,
}

impl PointOutcome {
    /// Whether the buffer changed.
    #[must_use]
    pub const fn changed(self) -> bool {
        matches!(self, Self::Merged | Self::Appended { .. })
    }
}

/// Bounded ascending series of chart points.
#[derive(Debug, Clone)]
pub struct ChartBuffer {
    points: VecDeque<ChartPoint>,
    policy: RetentionPolicy,
}

impl ChartBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            points: VecDeque::new(),
            policy: RetentionPolicy {
                max_points: policy.max_points.max(1),
                ..policy
            },
        }
    }

    /// Build a buffer from a historical series.
    ///
    /// Invalid points are dropped, the rest sorted ascending and fed through
    /// the same merge and eviction rules as live points.
    #[must_use]
    pub fn from_history(policy: RetentionPolicy, history: impl IntoIterator<Item = ChartPoint>) -> Self {
        let mut valid: Vec<_> = history.into_iter().filter(ChartPoint::is_valid).collect();
        valid.sort_by_key(|p| p.timestamp_ms);

        let mut buffer = Self::new(policy);
        for point in valid {
            buffer.apply(point);
        }
        buffer
    }

    /// Apply a candidate point.
    pub fn apply(&mut self, point: ChartPoint) -> PointOutcome {
        if !point.is_valid() {
            return PointOutcome::Invalid;
        }

        let bucket = self.policy.bucket_ms();

        if let Some(last) = self.points.back_mut() {
            let delta = point.timestamp_ms.saturating_sub(last.timestamp_ms);
            if delta.abs() < bucket {
                last.price = point.price;
                return PointOutcome::Merged;
            }
            if delta < 0 {
                return PointOutcome::Stale;
            }
        }

        self.points.push_back(point);
        let evicted = self.evict();
        PointOutcome::Appended { evicted }
    }

    /// Drop head points beyond the count or span bounds.
    fn evict(&mut self) -> usize {
        let mut evicted = 0;

        while self.points.len() > self.policy.max_points {
            self.points.pop_front();
            evicted += 1;
        }

        if let Some(latest) = self.points.back().map(|p| p.timestamp_ms) {
            let cutoff = latest.saturating_sub(self.policy.window_ms());
            while self.points.front().is_some_and(|p| p.timestamp_ms < cutoff) {
                self.points.pop_front();
                evicted += 1;
            }
        }

        evicted
    }

    /// Classify the movement of `price` at `timestamp_ms`.
    ///
    /// The reference is the newest point at least one trend interval older
    /// than `timestamp_ms`.
    #[must_use]
    pub fn classify(&self, timestamp_ms: i64, price: f64) -> Direction {
        let horizon = timestamp_ms.saturating_sub(self.policy.trend_ms());
        let reference = self
            .points
            .iter()
            .rev()
            .find(|p| p.timestamp_ms <= horizon);

        match reference {
            Some(r) if price > r.price => Direction::Rising,
            Some(r) if price < r.price => Direction::Falling,
            _ => Direction::Unchanged,
        }
    }

    /// Retained points, oldest first.
    #[must_use]
    pub fn points(&self) -> Vec<ChartPoint> {
        self.points.iter().copied().collect()
    }

    /// Newest point.
    #[must_use]
    pub fn last(&self) -> Option<ChartPoint> {
        self.points.back().copied()
    }

    /// Oldest point.
    #[must_use]
    pub fn first(&self) -> Option<ChartPoint> {
        self.points.front().copied()
    }

    /// Number of retained points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Thresholds in effect.
    #[must_use]
    pub const fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn policy(max_points: usize, window_ms: u64) -> RetentionPolicy {
        RetentionPolicy {
            bucket_width: Duration::from_millis(1_000),
            max_points,
            window: Duration::from_millis(window_ms),
            trend_interval: Duration::from_millis(1_000),
        }
    }

    #[test]
    fn merge_within_bucket_updates_last_point() {
        let mut buffer = ChartBuffer::new(policy(10, 60_000));
        buffer.apply(ChartPoint::new(10_000, 1.0));

        let outcome = buffer.apply(ChartPoint::new(10_400, 2.0));

        assert_eq!(outcome, PointOutcome::Merged);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.last().unwrap(), ChartPoint::new(10_000, 2.0));
    }

    #[test]
    fn append_outside_bucket() {
        let mut buffer = ChartBuffer::new(policy(10, 60_000));
        buffer.apply(ChartPoint::new(10_000, 1.0));

        let outcome = buffer.apply(ChartPoint::new(11_000, 2.0));

        assert_eq!(outcome, PointOutcome::Appended { evicted: 0 });
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn stale_point_is_dropped() {
        let mut buffer = ChartBuffer::new(policy(10, 60_000));
        buffer.apply(ChartPoint::new(10_000, 1.0));

        let outcome = buffer.apply(ChartPoint::new(5_000, 9.0));

        assert_eq!(outcome, PointOutcome::Stale);
        assert_eq!(buffer.points(), vec![ChartPoint::new(10_000, 1.0)]);
    }

    #[test]
    fn zero_bucket_width_still_merges_equal_timestamps() {
        let mut buffer = ChartBuffer::new(RetentionPolicy {
            bucket_width: Duration::ZERO,
            ..policy(10, 60_000)
        });
        buffer.apply(ChartPoint::new(10_000, 1.0));

        assert_eq!(buffer.apply(ChartPoint::new(10_000, 2.0)), PointOutcome::Merged);
        assert_eq!(buffer.apply(ChartPoint::new(9_999, 3.0)), PointOutcome::Stale);
        assert_eq!(
            buffer.apply(ChartPoint::new(10_001, 4.0)),
            PointOutcome::Appended { evicted: 0 }
        );
        assert_eq!(
            buffer.points(),
            vec![ChartPoint::new(10_000, 2.0), ChartPoint::new(10_001, 4.0)]
        );
    }

    #[test]
    fn slightly_reordered_point_merges() {
        let mut buffer = ChartBuffer::new(policy(10, 60_000));
        buffer.apply(ChartPoint::new(10_000, 1.0));

        assert_eq!(buffer.apply(ChartPoint::new(9_600, 3.0)), PointOutcome::Merged);
        assert_eq!(buffer.last().unwrap().timestamp_ms, 10_000);
    }

    #[test]
    fn invalid_points_rejected() {
        let mut buffer = ChartBuffer::new(policy(10, 60_000));

        assert_eq!(buffer.apply(ChartPoint::new(1_000, f64::NAN)), PointOutcome::Invalid);
        assert_eq!(buffer.apply(ChartPoint::new(0, 1.0)), PointOutcome::Invalid);
        assert_eq!(
            buffer.apply(ChartPoint::new(1_000, f64::INFINITY)),
            PointOutcome::Invalid
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn count_bound_evicts_head() {
        let mut buffer = ChartBuffer::new(policy(3, 3_600_000));
        for i in 1..=5 {
            buffer.apply(ChartPoint::new(i * 1_000, 1.0));
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.first().unwrap().timestamp_ms, 3_000);
    }

    #[test]
    fn window_bound_evicts_head() {
        let mut buffer = ChartBuffer::new(policy(100, 5_000));
        buffer.apply(ChartPoint::new(1_000, 1.0));
        buffer.apply(ChartPoint::new(3_000, 1.0));

        let outcome = buffer.apply(ChartPoint::new(7_000, 1.0));

        assert_eq!(outcome, PointOutcome::Appended { evicted: 1 });
        assert_eq!(buffer.first().unwrap().timestamp_ms, 3_000);
    }

    #[test]
    fn history_is_sorted_and_filtered() {
        let history = vec![
            ChartPoint::new(3_000, 3.0),
            ChartPoint::new(1_000, 1.0),
            ChartPoint::new(2_000, f64::NAN),
            ChartPoint::new(-5, 4.0),
            ChartPoint::new(2_000, 2.0),
        ];

        let buffer = ChartBuffer::from_history(policy(10, 60_000), history);

        assert_eq!(
            buffer.points(),
            vec![
                ChartPoint::new(1_000, 1.0),
                ChartPoint::new(2_000, 2.0),
                ChartPoint::new(3_000, 3.0),
            ]
        );
    }

    #[test]
    fn classify_against_older_reference() {
        let mut buffer = ChartBuffer::new(policy(10, 60_000));
        buffer.apply(ChartPoint::new(10_000, 100.0));
        buffer.apply(ChartPoint::new(11_000, 105.0));

        // Reference for t=11_500 is the point at 10_000.
        assert_eq!(buffer.classify(11_500, 101.0), Direction::Rising);
        assert_eq!(buffer.classify(11_500, 99.0), Direction::Falling);
        assert_eq!(buffer.classify(11_500, 100.0), Direction::Unchanged);
        // Nothing at least one interval old.
        assert_eq!(buffer.classify(10_500, 500.0), Direction::Unchanged);
    }

    #[test]
    fn zero_max_points_keeps_one() {
        let mut buffer = ChartBuffer::new(policy(0, 60_000));
        buffer.apply(ChartPoint::new(1_000, 1.0));
        buffer.apply(ChartPoint::new(5_000, 2.0));

        assert_eq!(buffer.points(), vec![ChartPoint::new(5_000, 2.0)]);
    }

    proptest! {
        #[test]
        fn retention_bounds_hold(
            steps in prop::collection::vec((-3_000i64..5_000, 0.01f64..1_000.0), 1..200),
            max_points in 1usize..50,
            window_ms in 1_000u64..60_000,
            bucket_ms in 0u64..2_000,
        ) {
            let mut buffer = ChartBuffer::new(RetentionPolicy {
                bucket_width: Duration::from_millis(bucket_ms),
                ..policy(max_points, window_ms)
            });
            let min_gap = i64::try_from(bucket_ms.max(1)).unwrap();
            let mut t = 1_000_000i64;

            for (dt, price) in steps {
                t += dt;
                let before = buffer.last();
                let outcome = buffer.apply(ChartPoint::new(t, price));

                if outcome == PointOutcome::Stale {
                    prop_assert_eq!(buffer.last(), before);
                    prop_assert!(t < before.unwrap().timestamp_ms);
                }

                let points = buffer.points();
                prop_assert!(!points.is_empty());
                prop_assert!(points.len() <= max_points);

                let latest = points.last().unwrap().timestamp_ms;
                let cutoff = latest - i64::try_from(window_ms).unwrap();
                prop_assert!(points.iter().all(|p| p.timestamp_ms >= cutoff));
                prop_assert!(points.windows(2).all(|w| w[1].timestamp_ms - w[0].timestamp_ms >= min_gap));
            }
        }
    }
}
