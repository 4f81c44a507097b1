//! Error types for geostore operations.

use thiserror::Error;

/// Convenience alias used by every fallible API in the crate.
pub type Result<T> = std::result::Result<T, GeostoreError>;

/// Errors surfaced by the database, codecs, and persistence layer.
#[derive(Error, Debug)]
pub enum GeostoreError {
    /// Latitude outside [-90, 90] or longitude outside [-180, 180].
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    /// Configuration value out of range (geohash precision, TTL, expiry).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Malformed item passed to `insert_trajectory`.
    #[error("invalid trajectory: {0}")]
    InvalidTrajectory(String),

    /// Query argument out of range (negative radius, inverted bounds).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted on a closed database handle.
    #[error("database is closed")]
    DatabaseClosed,

    /// The internal lock was poisoned by a panicking writer.
    #[error("database lock poisoned")]
    LockPoisoned,

    /// The append-only log contains an unreadable record.
    #[error("corrupted log record: {0}")]
    Corrupted(String),

    /// I/O failure in the durable backing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
