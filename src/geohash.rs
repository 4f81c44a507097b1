//! Base-32 geohash codec.
//!
//! Encodes latitude/longitude pairs into geohash cell strings by
//! interleaved interval bisection (longitude takes the even bits), decodes
//! cells back to their center and half-extents, and enumerates adjacent
//! cells. Longer strings name smaller cells, and every cell string is a
//! prefix of the strings of all cells nested inside it, which is what lets
//! the spatial index answer proximity queries with key-range scans.

use crate::error::{GeostoreError, Result};
use smallvec::SmallVec;

/// The standard geohash base-32 alphabet.
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Compass direction to an adjacent cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    N,
    Ne,
    E,
    Se,
    S,
    Sw,
    W,
    Nw,
}

/// Neighbor enumeration order: clockwise from north.
pub const DIRECTIONS: [Direction; 8] = [
    Direction::N,
    Direction::Ne,
    Direction::E,
    Direction::Se,
    Direction::S,
    Direction::Sw,
    Direction::W,
    Direction::Nw,
];

impl Direction {
    fn offsets(self) -> (i8, i8) {
        // (lat step, lon step)
        match self {
            Direction::N => (1, 0),
            Direction::Ne => (1, 1),
            Direction::E => (0, 1),
            Direction::Se => (-1, 1),
            Direction::S => (-1, 0),
            Direction::Sw => (-1, -1),
            Direction::W => (0, -1),
            Direction::Nw => (1, -1),
        }
    }
}

fn base32_index(c: char) -> Option<usize> {
    BASE32.iter().position(|&b| b == c as u8)
}

/// Encode a coordinate pair into a geohash of `precision` characters.
///
/// The caller is responsible for passing in-range coordinates; the
/// database always encodes through a validated [`crate::Point`].
pub fn encode(lat: f64, lon: f64, precision: usize) -> String {
    let mut out = String::with_capacity(precision);

    let mut bits = 0u8;
    let mut bit_count = 0u8;
    let mut hash_value = 0usize;
    let (mut min_lat, mut max_lat) = (-90.0f64, 90.0f64);
    let (mut min_lon, mut max_lon) = (-180.0f64, 180.0f64);

    while out.len() < precision {
        if bit_count % 2 == 0 {
            let mid = (min_lon + max_lon) / 2.0;
            if lon > mid {
                hash_value = (hash_value << 1) + 1;
                min_lon = mid;
            } else {
                hash_value <<= 1;
                max_lon = mid;
            }
        } else {
            let mid = (min_lat + max_lat) / 2.0;
            if lat > mid {
                hash_value = (hash_value << 1) + 1;
                min_lat = mid;
            } else {
                hash_value <<= 1;
                max_lat = mid;
            }
        }

        bit_count += 1;
        bits += 1;

        if bits == 5 {
            out.push(BASE32[hash_value] as char);
            bits = 0;
            hash_value = 0;
        }
    }

    out
}

/// Decode a geohash into its bounding intervals
/// `(min_lat, max_lat, min_lon, max_lon)`.
pub fn decode_bounds(hash: &str) -> Result<(f64, f64, f64, f64)> {
    let (mut min_lat, mut max_lat) = (-90.0f64, 90.0f64);
    let (mut min_lon, mut max_lon) = (-180.0f64, 180.0f64);
    let mut is_lon = true;

    for c in hash.chars() {
        let value = base32_index(c).ok_or_else(|| {
            GeostoreError::InvalidArgument(format!("invalid geohash character: {c:?}"))
        })?;

        for shift in (0..5).rev() {
            let bit = (value >> shift) & 1;
            if is_lon {
                let mid = (min_lon + max_lon) / 2.0;
                if bit == 1 {
                    min_lon = mid;
                } else {
                    max_lon = mid;
                }
            } else {
                let mid = (min_lat + max_lat) / 2.0;
                if bit == 1 {
                    min_lat = mid;
                } else {
                    max_lat = mid;
                }
            }
            is_lon = !is_lon;
        }
    }

    Ok((min_lat, max_lat, min_lon, max_lon))
}

/// Decode a geohash into `(center_lat, center_lon, lat_err, lon_err)`,
/// where the errors are the cell's half-extents in degrees.
///
/// Re-encoding the returned center at the same precision yields the
/// original string.
pub fn decode(hash: &str) -> Result<(f64, f64, f64, f64)> {
    let (min_lat, max_lat, min_lon, max_lon) = decode_bounds(hash)?;
    Ok((
        (min_lat + max_lat) / 2.0,
        (min_lon + max_lon) / 2.0,
        (max_lat - min_lat) / 2.0,
        (max_lon - min_lon) / 2.0,
    ))
}

/// Cell extents in degrees `(lat_deg, lon_deg)` at a given precision.
///
/// Each character carries 5 bits; longitude takes the extra bit at odd
/// precisions because the interleave starts with it.
pub fn cell_dimensions(precision: usize) -> (f64, f64) {
    let total_bits = 5 * precision as u32;
    let lon_bits = total_bits.div_ceil(2);
    let lat_bits = total_bits / 2;
    (
        180.0 / (1u64 << lat_bits) as f64,
        360.0 / (1u64 << lon_bits) as f64,
    )
}

/// The adjacent cell in `direction`, or `None` past the poles.
///
/// Crossing the antimeridian wraps; stepping north of 90° or south of
/// -90° has no neighbor.
pub fn neighbor(hash: &str, direction: Direction) -> Result<Option<String>> {
    let (center_lat, center_lon, lat_err, lon_err) = decode(hash)?;
    let (dlat, dlon) = direction.offsets();

    let lat = center_lat + 2.0 * lat_err * f64::from(dlat);
    if !(-90.0..=90.0).contains(&lat) {
        return Ok(None);
    }

    let mut lon = center_lon + 2.0 * lon_err * f64::from(dlon);
    if lon > 180.0 {
        lon -= 360.0;
    } else if lon < -180.0 {
        lon += 360.0;
    }

    Ok(Some(encode(lat, lon, hash.len())))
}

/// All existing neighbors of a cell, clockwise from north.
///
/// Cells touching a pole have fewer than 8 neighbors.
pub fn neighbors(hash: &str) -> Result<SmallVec<[String; 8]>> {
    let mut out = SmallVec::new();
    for direction in DIRECTIONS {
        if let Some(adjacent) = neighbor(hash, direction)? {
            out.push(adjacent);
        }
    }
    Ok(out)
}
