//! Core value types and configuration.
//!
//! This module defines the validated geographic [`Point`], the write
//! options carrier, the database configuration, and the internal record
//! representation shared by the storage engine and the indexes.

use crate::error::{GeostoreError, Result};
use crate::spatial;
use bytes::Bytes;
use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime};

/// Minimum valid latitude in degrees.
pub const MIN_LATITUDE: f64 = -90.0;
/// Maximum valid latitude in degrees.
pub const MAX_LATITUDE: f64 = 90.0;
/// Minimum valid longitude in degrees.
pub const MIN_LONGITUDE: f64 = -180.0;
/// Maximum valid longitude in degrees.
pub const MAX_LONGITUDE: f64 = 180.0;

/// A geographic point on the WGS-84 sphere.
///
/// Construction validates the coordinate ranges, so a `Point` held by the
/// database is always on the sphere. Points are plain values; two points
/// with the same coordinates are interchangeable.
///
/// # Examples
///
/// ```rust
/// use geostore::Point;
///
/// let nyc = Point::new(40.7128, -74.0060)?;
/// assert_eq!(nyc.lat(), 40.7128);
/// assert!(Point::new(91.0, 0.0).is_err());
/// # Ok::<(), geostore::GeostoreError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    lat: f64,
    lon: f64,
}

impl Point {
    /// Create a point from latitude and longitude in degrees.
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !lat.is_finite() || !(MIN_LATITUDE..=MAX_LATITUDE).contains(&lat) {
            return Err(GeostoreError::InvalidCoordinate(format!(
                "latitude must be between {MIN_LATITUDE} and {MAX_LATITUDE}, got {lat}"
            )));
        }
        if !lon.is_finite() || !(MIN_LONGITUDE..=MAX_LONGITUDE).contains(&lon) {
            return Err(GeostoreError::InvalidCoordinate(format!(
                "longitude must be between {MIN_LONGITUDE} and {MAX_LONGITUDE}, got {lon}"
            )));
        }
        Ok(Self { lat, lon })
    }

    /// Latitude in degrees.
    pub fn lat(&self) -> f64 {
        self.lat
    }

    /// Longitude in degrees.
    pub fn lon(&self) -> f64 {
        self.lon
    }

    /// Great-circle distance to another point, in meters.
    pub fn distance_to(&self, other: &Point) -> f64 {
        spatial::haversine_distance(self, other)
    }
}

/// Translate a TTL into an absolute deadline using the monotonic clock.
///
/// TTL arithmetic must not move with wall-clock steps, so the deadline is
/// `ttl` past the monotonic now, expressed in `SystemTime` terms through a
/// `(Instant, SystemTime)` calibration pair captured once per process.
/// Absolute expirations supplied by callers stay on the wall clock.
fn monotonic_deadline(ttl: Duration) -> SystemTime {
    static ANCHOR: OnceLock<(Instant, SystemTime)> = OnceLock::new();
    let &(instant_anchor, system_anchor) =
        ANCHOR.get_or_init(|| (Instant::now(), SystemTime::now()));
    system_anchor + (instant_anchor.elapsed() + ttl)
}

/// Options for write operations with optional expiry.
///
/// The two constructors are mutually exclusive per call: a TTL is turned
/// into an absolute instant at insert time on the monotonic clock, an
/// explicit expiration is used as-is.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Time-to-live for this record.
    pub ttl: Option<Duration>,
    /// Absolute expiration time (takes precedence over TTL).
    pub expires_at: Option<SystemTime>,
}

impl SetOptions {
    /// Create options with a TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            expires_at: None,
        }
    }

    /// Create options with an absolute expiration time.
    pub fn with_expiration(expires_at: SystemTime) -> Self {
        Self {
            ttl: None,
            expires_at: Some(expires_at),
        }
    }

    /// Resolve the effective expiration instant, validating the TTL.
    ///
    /// A zero TTL is rejected: the record would be dead on arrival. TTL
    /// deadlines come from the monotonic clock; absolute expirations pass
    /// through untouched.
    pub fn effective_expires_at(&self) -> Result<Option<SystemTime>> {
        if let Some(ttl) = self.ttl {
            if ttl.is_zero() {
                return Err(GeostoreError::InvalidConfiguration(
                    "TTL must be strictly positive".into(),
                ));
            }
            return Ok(Some(monotonic_deadline(ttl)));
        }
        Ok(self.expires_at)
    }
}

/// Database configuration.
///
/// Read once when a handle is opened; changing a config afterwards has no
/// effect on that handle or on already-stored data.
///
/// # Examples
///
/// ```rust
/// use geostore::Config;
///
/// let config = Config::with_geohash_precision(10)?;
/// assert_eq!(config.geohash_precision, 10);
///
/// let from_json = Config::from_json(r#"{"geohash_precision": 6}"#).unwrap();
/// assert_eq!(from_json.geohash_precision, 6);
/// # Ok::<(), geostore::GeostoreError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Geohash precision for spatial keys (1-12).
    /// Higher values mean smaller index cells.
    #[serde(default = "Config::default_geohash_precision")]
    pub geohash_precision: usize,

    /// Issue an fsync after every accepted write on durable handles.
    #[serde(default)]
    pub sync_on_write: bool,
}

impl Config {
    const fn default_geohash_precision() -> usize {
        8
    }

    /// Create a config with a custom geohash precision.
    pub fn with_geohash_precision(precision: usize) -> Result<Self> {
        let mut config = Self::default();
        config.set_geohash_precision(precision)?;
        Ok(config)
    }

    /// Set the geohash precision, validating the range.
    pub fn set_geohash_precision(&mut self, precision: usize) -> Result<()> {
        if !(1..=12).contains(&precision) {
            return Err(GeostoreError::InvalidConfiguration(format!(
                "geohash precision must be between 1 and 12, got {precision}"
            )));
        }
        self.geohash_precision = precision;
        Ok(())
    }

    /// Enable or disable per-write fsync on durable handles.
    pub fn with_sync_on_write(mut self, sync_on_write: bool) -> Self {
        self.sync_on_write = sync_on_write;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if !(1..=12).contains(&self.geohash_precision) {
            return Err(GeostoreError::InvalidConfiguration(format!(
                "geohash precision must be between 1 and 12, got {}",
                self.geohash_precision
            )));
        }
        Ok(())
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    /// Serialize configuration as a JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from a TOML string (requires the `toml` feature).
    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> std::result::Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    /// Serialize configuration as a TOML string (requires the `toml` feature).
    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            geohash_precision: Self::default_geohash_precision(),
            sync_on_write: false,
        }
    }
}

/// A trajectory sample: where something was, and when (epoch seconds).
pub type TrajectoryPoint = (Point, f64);

/// Purpose tag on stored records, so scans can filter without parsing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Plain key-value entry written through the public KV API.
    Scalar,
    /// Spatial index entry under a `<prefix>:geo:` composite key.
    Geo,
    /// Trajectory sample under a `<series>:traj:` composite key.
    Trajectory,
}

impl RecordKind {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            RecordKind::Scalar => 0,
            RecordKind::Geo => 1,
            RecordKind::Trajectory => 2,
        }
    }

    pub(crate) fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(RecordKind::Scalar),
            1 => Some(RecordKind::Geo),
            2 => Some(RecordKind::Trajectory),
            _ => None,
        }
    }
}

/// Internal representation of a stored record.
#[derive(Debug, Clone)]
pub struct Record {
    /// The value bytes.
    pub value: Bytes,
    /// What kind of entry this is.
    pub kind: RecordKind,
    /// Expiration time, if any.
    pub expires_at: Option<SystemTime>,
}

impl Record {
    /// Create a record without expiration.
    pub fn new(value: impl Into<Bytes>, kind: RecordKind) -> Self {
        Self {
            value: value.into(),
            kind,
            expires_at: None,
        }
    }

    /// Create a record from write options, resolving TTL into an instant.
    pub fn from_options(
        value: impl Into<Bytes>,
        kind: RecordKind,
        opts: Option<&SetOptions>,
    ) -> Result<Self> {
        let expires_at = match opts {
            Some(opts) => opts.effective_expires_at()?,
            None => None,
        };
        Ok(Self {
            value: value.into(),
            kind,
            expires_at,
        })
    }

    /// Whether the record has expired as of now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// Whether the record has expired at a specific instant.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }
}

/// Database statistics: the per-handle operation counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbStats {
    /// Number of live records.
    pub key_count: usize,
    /// Records reaped by TTL expiry.
    pub expired_count: u64,
    /// Accepted write operations.
    pub operations_count: u64,
}

impl DbStats {
    /// Record an accepted write operation.
    pub fn record_operation(&mut self) {
        self.operations_count += 1;
    }

    /// Record reaped expired records.
    pub fn record_expired(&mut self, count: u64) {
        self.expired_count += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_point_validation() {
        assert!(Point::new(40.7128, -74.0060).is_ok());
        assert!(Point::new(90.0, 180.0).is_ok());
        assert!(Point::new(-90.0, -180.0).is_ok());

        assert!(Point::new(91.0, 0.0).is_err());
        assert!(Point::new(-91.0, 0.0).is_err());
        assert!(Point::new(0.0, 181.0).is_err());
        assert!(Point::new(0.0, -181.0).is_err());
        assert!(Point::new(f64::NAN, 0.0).is_err());
        assert!(Point::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.geohash_precision, 8);
        assert!(!config.sync_on_write);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_precision_bounds() {
        assert!(Config::with_geohash_precision(1).is_ok());
        assert!(Config::with_geohash_precision(12).is_ok());
        assert!(Config::with_geohash_precision(0).is_err());
        assert!(Config::with_geohash_precision(13).is_err());

        let mut config = Config::default();
        config.set_geohash_precision(6).unwrap();
        assert_eq!(config.geohash_precision, 6);
        assert!(config.set_geohash_precision(0).is_err());
        assert_eq!(config.geohash_precision, 6);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = Config::with_geohash_precision(10)
            .unwrap()
            .with_sync_on_write(true);

        let json = config.to_json().unwrap();
        let deserialized = Config::from_json(&json).unwrap();
        assert_eq!(deserialized.geohash_precision, 10);
        assert!(deserialized.sync_on_write);

        assert!(Config::from_json(r#"{"geohash_precision": 13}"#).is_err());
    }

    #[test]
    fn test_set_options() {
        let ttl_opts = SetOptions::with_ttl(Duration::from_secs(60));
        assert!(ttl_opts.effective_expires_at().unwrap().is_some());

        let zero_ttl = SetOptions::with_ttl(Duration::ZERO);
        assert!(zero_ttl.effective_expires_at().is_err());

        let exp = SystemTime::now() + Duration::from_secs(60);
        let exp_opts = SetOptions::with_expiration(exp);
        assert_eq!(exp_opts.effective_expires_at().unwrap(), Some(exp));

        assert_eq!(SetOptions::default().effective_expires_at().unwrap(), None);
    }

    #[test]
    fn test_ttl_deadlines_come_from_the_monotonic_clock() {
        let opts = SetOptions::with_ttl(Duration::from_secs(60));
        let first = opts.effective_expires_at().unwrap().unwrap();
        let second = opts.effective_expires_at().unwrap().unwrap();
        // Monotonic elapsed time only grows between calls.
        assert!(second >= first);

        // The translated deadline still lands roughly one TTL out on the
        // wall-clock axis the expiration index is ordered by.
        let remaining = first
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        assert!(remaining <= Duration::from_secs(61));
        assert!(remaining >= Duration::from_secs(55));
    }

    #[test]
    fn test_record_expiration() {
        let record = Record::new("value", RecordKind::Scalar);
        assert!(!record.is_expired());

        let past = SystemTime::now() - Duration::from_secs(60);
        let expired = Record {
            value: Bytes::from_static(b"value"),
            kind: RecordKind::Scalar,
            expires_at: Some(past),
        };
        assert!(expired.is_expired());

        let opts = SetOptions::with_ttl(Duration::from_secs(300));
        let record = Record::from_options("value", RecordKind::Scalar, Some(&opts)).unwrap();
        assert!(record.expires_at.is_some());
        assert!(!record.is_expired());
    }

    #[test]
    fn test_record_kind_tags() {
        for kind in [RecordKind::Scalar, RecordKind::Geo, RecordKind::Trajectory] {
            assert_eq!(RecordKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(RecordKind::from_u8(9), None);
    }

    #[test]
    fn test_db_stats() {
        let mut stats = DbStats::default();
        stats.record_operation();
        stats.record_operation();
        stats.record_expired(3);
        assert_eq!(stats.operations_count, 2);
        assert_eq!(stats.expired_count, 3);
        assert_eq!(stats.key_count, 0);
    }
}
