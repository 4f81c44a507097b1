//! Embedded spatio-temporal key-value store with geohash indexing and TTL
//! support.
//!
//! ```rust
//! use geostore::{DB, Point};
//!
//! let db = DB::memory()?;
//! db.insert("key", b"value", None)?;
//!
//! let point = Point::new(40.7128, -74.0060)?;
//! db.insert_point("cities", &point, b"NYC", None)?;
//! let nearby = db.find_nearby("cities", &point, 1000.0, 10)?;
//! # Ok::<(), geostore::GeostoreError>(())
//! ```

pub mod db;
pub mod error;
pub mod geohash;
pub mod persistence;
pub mod spatial;
pub mod types;

pub use db::{DB, PrefixScan};
pub use error::{GeostoreError, Result};

pub type Geostore = DB;

pub use spatial::{Bounds, EARTH_RADIUS_METERS, haversine_distance};

pub use types::{Config, DbStats, Point, Record, RecordKind, SetOptions, TrajectoryPoint};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{DB, Geostore, GeostoreError, Result};

    pub use crate::{Config, DbStats, Point, SetOptions};

    pub use crate::spatial::haversine_distance;

    pub use std::time::Duration;
}
