//! Trajectory storage: ordered point-time series in the keyspace.
//!
//! Samples live under `<series>:traj:<ms>` keys, where `ms` is the
//! zero-padded millisecond timestamp, so lexical key order within a series
//! is chronological order and a time-window query is one bounded range
//! scan.

use super::DB;
use crate::error::{GeostoreError, Result};
use crate::types::{Point, Record, RecordKind, TrajectoryPoint};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::SystemTime;

/// `[lat f64 LE][lon f64 LE][timestamp f64 LE]`
const TRAJ_VALUE_LEN: usize = 24;

fn traj_key(series_id: &str, millis: u64) -> Bytes {
    Bytes::from(format!("{series_id}:traj:{millis:020}"))
}

fn traj_prefix(series_id: &str) -> Bytes {
    Bytes::from(format!("{series_id}:traj:"))
}

/// Millisecond key component for a validated timestamp.
fn timestamp_millis(timestamp: f64) -> u64 {
    (timestamp * 1000.0).floor() as u64
}

fn validate_timestamp(timestamp: f64, index: usize) -> Result<()> {
    if !timestamp.is_finite() || timestamp < 0.0 {
        return Err(GeostoreError::InvalidTrajectory(format!(
            "item {index}: timestamp must be finite and non-negative, got {timestamp}"
        )));
    }
    if timestamp * 1000.0 > u64::MAX as f64 {
        return Err(GeostoreError::InvalidTrajectory(format!(
            "item {index}: timestamp {timestamp} is out of range"
        )));
    }
    Ok(())
}

fn encode_traj_value(point: &Point, timestamp: f64) -> Bytes {
    let mut buf = BytesMut::with_capacity(TRAJ_VALUE_LEN);
    buf.put_f64_le(point.lat());
    buf.put_f64_le(point.lon());
    buf.put_f64_le(timestamp);
    buf.freeze()
}

fn decode_traj_value(value: &Bytes) -> Option<(Point, f64)> {
    if value.len() < TRAJ_VALUE_LEN {
        return None;
    }
    let mut buf = value.clone();
    let lat = buf.get_f64_le();
    let lon = buf.get_f64_le();
    let timestamp = buf.get_f64_le();
    let point = Point::new(lat, lon).ok()?;
    Some((point, timestamp))
}

impl DB {
    /// Insert a series of `(point, timestamp)` samples under `series_id`.
    ///
    /// Every item is validated before anything is written; a malformed
    /// item fails the whole call and no partial series becomes visible.
    /// Two samples in the same millisecond overwrite. An empty series is
    /// a no-op that still counts as one operation.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use geostore::{DB, Point};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let db = DB::memory()?;
    /// let route = vec![
    ///     (Point::new(40.7128, -74.0060)?, 1_640_995_200.0),
    ///     (Point::new(40.7150, -74.0040)?, 1_640_995_260.0),
    /// ];
    /// db.insert_trajectory("truck-001", &route)?;
    ///
    /// let replay = db.query_trajectory("truck-001", 1_640_995_200.0, 1_640_995_260.0)?;
    /// assert_eq!(replay.len(), 2);
    /// # Ok(())
    /// # }
    /// ```
    pub fn insert_trajectory(&self, series_id: &str, items: &[TrajectoryPoint]) -> Result<()> {
        for (index, (_, timestamp)) in items.iter().enumerate() {
            validate_timestamp(*timestamp, index)?;
        }

        let mut inner = self.write_checked()?;
        for (point, timestamp) in items {
            let key = traj_key(series_id, timestamp_millis(*timestamp));
            let record = Record::new(encode_traj_value(point, *timestamp), RecordKind::Trajectory);
            inner.log_set(&key, &record.value, record.kind, record.expires_at)?;
            inner.insert_record(key, record);
        }
        inner.stats.record_operation();
        Ok(())
    }

    /// Samples of `series_id` with timestamps in `[t_start, t_end]`,
    /// in chronological order.
    pub fn query_trajectory(
        &self,
        series_id: &str,
        t_start: f64,
        t_end: f64,
    ) -> Result<Vec<TrajectoryPoint>> {
        for (name, value) in [("t_start", t_start), ("t_end", t_end)] {
            if !value.is_finite() || value < 0.0 {
                return Err(GeostoreError::InvalidArgument(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if t_start > t_end {
            return Ok(Vec::new());
        }

        let prefix = traj_prefix(series_id);
        let start_key = traj_key(series_id, timestamp_millis(t_start));
        let end_key = traj_key(series_id, timestamp_millis(t_end));

        let inner = self.read_checked()?;
        let now = SystemTime::now();
        let mut results = Vec::new();

        for (key, record) in inner.records.range(start_key..=end_key) {
            if !key.starts_with(&prefix) {
                continue;
            }
            if record.kind != RecordKind::Trajectory || record.is_expired_at(now) {
                continue;
            }
            let Some((point, timestamp)) = decode_traj_value(&record.value) else {
                log::warn!("skipping trajectory record with malformed payload");
                continue;
            };
            // The key granularity is a millisecond; the raw timestamp
            // decides inclusion at the window edges.
            if timestamp >= t_start && timestamp <= t_end {
                results.push((point, timestamp));
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> Point {
        Point::new(lat, lon).unwrap()
    }

    fn sample_route() -> Vec<TrajectoryPoint> {
        vec![
            (point(40.7128, -74.0060), 1_640_995_200.0),
            (point(40.7150, -74.0040), 1_640_995_260.0),
            (point(40.7172, -74.0020), 1_640_995_320.0),
        ]
    }

    #[test]
    fn test_traj_key_orders_chronologically() {
        let early = traj_key("v1", 1_000);
        let late = traj_key("v1", 1_000_000_000_000);
        assert!(early < late);
        assert!(early.starts_with(&traj_prefix("v1")));
    }

    #[test]
    fn test_traj_value_round_trip() {
        let p = point(40.7128, -74.0060);
        let value = encode_traj_value(&p, 1_640_995_200.5);
        let (decoded, ts) = decode_traj_value(&value).unwrap();
        assert_eq!(decoded, p);
        assert_eq!(ts, 1_640_995_200.5);

        assert!(decode_traj_value(&Bytes::from_static(b"short")).is_none());
    }

    #[test]
    fn test_insert_and_query_window() {
        let db = DB::memory().unwrap();
        db.insert_trajectory("v1", &sample_route()).unwrap();

        let full = db
            .query_trajectory("v1", 1_640_995_200.0, 1_640_995_320.0)
            .unwrap();
        assert_eq!(full.len(), 3);
        let timestamps: Vec<f64> = full.iter().map(|(_, ts)| *ts).collect();
        assert_eq!(
            timestamps,
            vec![1_640_995_200.0, 1_640_995_260.0, 1_640_995_320.0]
        );

        let middle = db
            .query_trajectory("v1", 1_640_995_230.0, 1_640_995_290.0)
            .unwrap();
        assert_eq!(middle.len(), 1);
        assert_eq!(middle[0].1, 1_640_995_260.0);

        let none = db
            .query_trajectory("v1", 1_640_995_400.0, 1_640_995_500.0)
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_series_are_isolated() {
        let db = DB::memory().unwrap();
        db.insert_trajectory("v1", &sample_route()).unwrap();
        db.insert_trajectory("v2", &sample_route()[..1].to_vec())
            .unwrap();

        assert_eq!(db.query_trajectory("v1", 0.0, 2e9).unwrap().len(), 3);
        assert_eq!(db.query_trajectory("v2", 0.0, 2e9).unwrap().len(), 1);
        assert!(db.query_trajectory("v3", 0.0, 2e9).unwrap().is_empty());
    }

    #[test]
    fn test_same_millisecond_overwrites() {
        let db = DB::memory().unwrap();
        db.insert_trajectory("v1", &[(point(1.0, 1.0), 100.0)])
            .unwrap();
        db.insert_trajectory("v1", &[(point(2.0, 2.0), 100.0)])
            .unwrap();

        let results = db.query_trajectory("v1", 0.0, 200.0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, point(2.0, 2.0));
    }

    #[test]
    fn test_invalid_items_fail_whole_call() {
        let db = DB::memory().unwrap();
        let items = vec![
            (point(1.0, 1.0), 100.0),
            (point(2.0, 2.0), f64::NAN),
        ];
        assert!(matches!(
            db.insert_trajectory("v1", &items),
            Err(GeostoreError::InvalidTrajectory(_))
        ));
        assert!(matches!(
            db.insert_trajectory("v1", &[(point(1.0, 1.0), -5.0)]),
            Err(GeostoreError::InvalidTrajectory(_))
        ));

        // Nothing from the failed calls is visible.
        assert!(db.query_trajectory("v1", 0.0, 1000.0).unwrap().is_empty());
        assert_eq!(db.stats().unwrap().key_count, 0);
    }

    #[test]
    fn test_empty_series_counts_one_operation() {
        let db = DB::memory().unwrap();
        db.insert_trajectory("v1", &[]).unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.operations_count, 1);
        assert_eq!(stats.key_count, 0);
    }

    #[test]
    fn test_inverted_window_is_empty() {
        let db = DB::memory().unwrap();
        db.insert_trajectory("v1", &sample_route()).unwrap();
        assert!(
            db.query_trajectory("v1", 1_640_995_320.0, 1_640_995_200.0)
                .unwrap()
                .is_empty()
        );
        assert!(matches!(
            db.query_trajectory("v1", f64::NAN, 100.0),
            Err(GeostoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_fractional_timestamps_at_window_edges() {
        let db = DB::memory().unwrap();
        db.insert_trajectory("v1", &[(point(1.0, 1.0), 100.0004)])
            .unwrap();

        // Same millisecond bucket as the stored sample, but the raw
        // timestamp lies outside the window.
        assert!(db.query_trajectory("v1", 99.0, 100.0).unwrap().is_empty());
        assert_eq!(db.query_trajectory("v1", 100.0, 101.0).unwrap().len(), 1);
    }
}
