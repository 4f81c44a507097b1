//! Spatial index operations.
//!
//! Geo points live in the main record map under composite keys of the form
//! `<prefix>:geo:<geohash>:<uid>`, so every proximity query reduces to a
//! handful of key-range scans over candidate geohash cells. The record
//! value embeds the exact coordinates ahead of the user payload, letting
//! queries filter by true great-circle distance without a side index.

use super::{DB, DBInner};
use crate::error::{GeostoreError, Result};
use crate::geohash;
use crate::spatial::{Bounds, EARTH_RADIUS_METERS};
use crate::types::{Point, Record, RecordKind, SetOptions};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rustc_hash::FxHashSet;
use std::time::SystemTime;

/// Ring cap for candidate-cell expansion; wider radii shorten the cell
/// prefix instead of growing the ring count without bound.
const MAX_NEIGHBOR_RINGS: usize = 8;

/// Number of value bytes occupied by the embedded coordinates.
const GEO_HEADER_LEN: usize = 16;

fn geo_key(prefix: &str, hash: &str, uid: u64) -> Bytes {
    Bytes::from(format!("{prefix}:geo:{hash}:{uid:020}"))
}

fn geo_scan_prefix(prefix: &str, cell: &str) -> Bytes {
    Bytes::from(format!("{prefix}:geo:{cell}"))
}

/// `[lat f64 LE][lon f64 LE][user payload]`
fn encode_geo_value(point: &Point, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(GEO_HEADER_LEN + payload.len());
    buf.put_f64_le(point.lat());
    buf.put_f64_le(point.lon());
    buf.put(payload);
    buf.freeze()
}

fn decode_geo_value(value: &Bytes) -> Option<(Point, Bytes)> {
    if value.len() < GEO_HEADER_LEN {
        return None;
    }
    let mut header = value.slice(..GEO_HEADER_LEN);
    let lat = header.get_f64_le();
    let lon = header.get_f64_le();
    let point = Point::new(lat, lon).ok()?;
    Some((point, value.slice(GEO_HEADER_LEN..)))
}

/// The trailing uid segment of a geo key; insertion-order tiebreak.
pub(crate) fn parse_uid(key: &Bytes) -> u64 {
    std::str::from_utf8(key)
        .ok()
        .and_then(|s| s.rsplit(':').next())
        .and_then(|uid| uid.parse().ok())
        .unwrap_or(u64::MAX)
}

/// Geohash cells whose union covers the disc of `radius` around `center`.
///
/// Ring count is `ceil(radius / cell_size) + 1`, where the cell size is
/// the smaller of the cell's metric height and its width along the
/// farthest parallel the disc can reach (cells narrow toward the poles).
/// Past [`MAX_NEIGHBOR_RINGS`] the prefix is shortened one character at a
/// time. An empty return means "scan the whole namespace": the disc is
/// too wide for even single-character cells, or it touches a pole, where
/// cell widths vanish.
fn covering_cells(center: &Point, radius: f64, precision: usize) -> Result<Vec<String>> {
    let lat_reach = (radius / EARTH_RADIUS_METERS).to_degrees();
    let max_abs_lat = (center.lat().abs() + lat_reach).min(90.0);
    let narrowing = max_abs_lat.to_radians().cos();

    let mut precision = precision;
    loop {
        let (lat_deg, lon_deg) = geohash::cell_dimensions(precision);
        let cell_height = lat_deg.to_radians() * EARTH_RADIUS_METERS;
        let cell_width = lon_deg.to_radians() * EARTH_RADIUS_METERS * narrowing;
        let cell_size = cell_height.min(cell_width);
        let rings = (radius / cell_size).ceil() + 1.0;

        if cell_size > 0.0 && rings <= MAX_NEIGHBOR_RINGS as f64 {
            let seed = geohash::encode(center.lat(), center.lon(), precision);
            return expand_rings(seed, rings as usize);
        }
        if precision == 1 {
            return Ok(Vec::new());
        }
        precision -= 1;
    }
}

/// Breadth-first neighbor expansion, `rings` steps out from the seed cell.
fn expand_rings(seed: String, rings: usize) -> Result<Vec<String>> {
    let mut cells = FxHashSet::default();
    cells.insert(seed.clone());
    let mut frontier = vec![seed];

    for _ in 0..rings {
        let mut next = Vec::new();
        for cell in &frontier {
            for adjacent in geohash::neighbors(cell)? {
                if cells.insert(adjacent.clone()) {
                    next.push(adjacent);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    let mut out: Vec<String> = cells.into_iter().collect();
    out.sort_unstable();
    Ok(out)
}

/// Walk live geo records under one scan prefix. The visitor returns
/// `false` to stop early; the function reports whether the walk ran dry.
fn visit_geo_records<F>(inner: &DBInner, scan_prefix: &Bytes, now: SystemTime, f: &mut F) -> bool
where
    F: FnMut(Point, Bytes, u64) -> bool,
{
    for (key, record) in inner.records.range(scan_prefix.clone()..) {
        if !key.starts_with(scan_prefix) {
            break;
        }
        if record.kind != RecordKind::Geo || record.is_expired_at(now) {
            continue;
        }
        let Some((point, payload)) = decode_geo_value(&record.value) else {
            log::warn!("skipping geo record with malformed payload");
            continue;
        };
        if !f(point, payload, parse_uid(key)) {
            return false;
        }
    }
    true
}

/// Run a visitor over every candidate cell; an empty cell list means the
/// whole `<prefix>:geo:` namespace.
fn visit_candidates<F>(inner: &DBInner, prefix: &str, cells: &[String], f: &mut F) -> bool
where
    F: FnMut(Point, Bytes, u64) -> bool,
{
    let now = SystemTime::now();
    if cells.is_empty() {
        return visit_geo_records(inner, &geo_scan_prefix(prefix, ""), now, f);
    }
    for cell in cells {
        if !visit_geo_records(inner, &geo_scan_prefix(prefix, cell), now, f) {
            return false;
        }
    }
    true
}

fn validate_radius(radius_meters: f64) -> Result<()> {
    if !radius_meters.is_finite() || radius_meters < 0.0 {
        return Err(GeostoreError::InvalidArgument(format!(
            "radius must be finite and non-negative, got {radius_meters}"
        )));
    }
    Ok(())
}

/// Common prefix of the geohashes of a rectangle's four corners. The
/// corner cells pin down an axis-aligned ancestor cell that contains the
/// whole rectangle.
fn corner_prefix(bounds: &Bounds, precision: usize) -> String {
    let corners = [
        geohash::encode(bounds.min_lat, bounds.min_lon, precision),
        geohash::encode(bounds.min_lat, bounds.max_lon, precision),
        geohash::encode(bounds.max_lat, bounds.min_lon, precision),
        geohash::encode(bounds.max_lat, bounds.max_lon, precision),
    ];

    let first = &corners[0];
    let mut len = first.len();
    for other in &corners[1..] {
        len = len.min(
            first
                .bytes()
                .zip(other.bytes())
                .take_while(|(a, b)| a == b)
                .count(),
        );
    }
    first[..len].to_string()
}

impl DB {
    /// Insert a geographic point under a namespace `prefix`.
    ///
    /// Every insert allocates a fresh uid, so inserting the same
    /// coordinates twice creates two index entries. Options propagate to
    /// the underlying record, TTL included.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use geostore::{DB, Point};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let db = DB::memory()?;
    /// let nyc = Point::new(40.7128, -74.0060)?;
    /// db.insert_point("cities", &nyc, b"New York City", None)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn insert_point(
        &self,
        prefix: &str,
        point: &Point,
        value: impl AsRef<[u8]>,
        opts: Option<SetOptions>,
    ) -> Result<()> {
        let uid = self.next_uid();
        let record = Record::from_options(
            encode_geo_value(point, value.as_ref()),
            RecordKind::Geo,
            opts.as_ref(),
        )?;

        let mut inner = self.write_checked()?;
        let hash = geohash::encode(point.lat(), point.lon(), inner.config.geohash_precision);
        let key = geo_key(prefix, &hash, uid);

        inner.log_set(&key, &record.value, record.kind, record.expires_at)?;
        inner.insert_record(key, record);
        inner.stats.record_operation();
        Ok(())
    }

    /// Find points within `radius_meters` of `center`, nearest first.
    ///
    /// Returns up to `limit` `(point, payload, distance)` tuples sorted by
    /// ascending distance, ties broken by insertion order. A zero radius
    /// matches only points exactly at the center.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use geostore::{DB, Point};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let db = DB::memory()?;
    /// let nyc = Point::new(40.7128, -74.0060)?;
    /// db.insert_point("cities", &nyc, b"NYC", None)?;
    ///
    /// for (point, payload, meters) in db.find_nearby("cities", &nyc, 10_000.0, 10)? {
    ///     println!("{:?} at {meters:.0} m", payload);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn find_nearby(
        &self,
        prefix: &str,
        center: &Point,
        radius_meters: f64,
        limit: usize,
    ) -> Result<Vec<(Point, Bytes, f64)>> {
        validate_radius(radius_meters)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let inner = self.read_checked()?;
        let cells = covering_cells(center, radius_meters, inner.config.geohash_precision)?;

        let mut matches: Vec<(f64, u64, Point, Bytes)> = Vec::new();
        visit_candidates(&inner, prefix, &cells, &mut |point, payload, uid| {
            let distance = center.distance_to(&point);
            if distance <= radius_meters {
                matches.push((distance, uid, point, payload));
            }
            true
        });

        matches.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        matches.truncate(limit);

        Ok(matches
            .into_iter()
            .map(|(distance, _, point, payload)| (point, payload, distance))
            .collect())
    }

    /// Count points within `radius_meters` of `center`.
    ///
    /// Same candidate-cell scan as [`DB::find_nearby`] without sorting or
    /// result materialisation.
    pub fn count_within_distance(
        &self,
        prefix: &str,
        center: &Point,
        radius_meters: f64,
    ) -> Result<usize> {
        validate_radius(radius_meters)?;

        let inner = self.read_checked()?;
        let cells = covering_cells(center, radius_meters, inner.config.geohash_precision)?;

        let mut count = 0usize;
        visit_candidates(&inner, prefix, &cells, &mut |point, _, _| {
            if center.distance_to(&point) <= radius_meters {
                count += 1;
            }
            true
        });
        Ok(count)
    }

    /// Whether any point lies within `radius_meters` of `center`.
    /// Short-circuits on the first match.
    pub fn contains_point(
        &self,
        prefix: &str,
        center: &Point,
        radius_meters: f64,
    ) -> Result<bool> {
        validate_radius(radius_meters)?;

        let inner = self.read_checked()?;
        let cells = covering_cells(center, radius_meters, inner.config.geohash_precision)?;

        let mut found = false;
        visit_candidates(&inner, prefix, &cells, &mut |point, _, _| {
            if center.distance_to(&point) <= radius_meters {
                found = true;
                return false;
            }
            true
        });
        Ok(found)
    }

    /// Find up to `limit` points inside a latitude/longitude rectangle.
    ///
    /// `min_lon > max_lon` spans the antimeridian: the query covers
    /// `[min_lon, 180] ∪ [-180, max_lon]`. Results come back in key order
    /// per rectangle segment, so identical inputs yield identical output.
    pub fn find_within_bounds(
        &self,
        prefix: &str,
        min_lat: f64,
        min_lon: f64,
        max_lat: f64,
        max_lon: f64,
        limit: usize,
    ) -> Result<Vec<(Point, Bytes)>> {
        let bounds = Bounds::new(min_lat, min_lon, max_lat, max_lon)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let inner = self.read_checked()?;
        let precision = inner.config.geohash_precision;
        let now = SystemTime::now();

        let mut results = Vec::new();
        for segment in bounds.segments().iter() {
            if results.len() >= limit {
                break;
            }
            let cell = corner_prefix(&segment, precision);
            visit_geo_records(
                &inner,
                &geo_scan_prefix(prefix, &cell),
                now,
                &mut |point, payload, _| {
                    if segment.contains(&point) {
                        results.push((point, payload));
                    }
                    results.len() < limit
                },
            );
        }

        Ok(results)
    }

    /// Whether any point lies inside the rectangle. Short-circuiting form
    /// of [`DB::find_within_bounds`].
    pub fn intersects_bounds(
        &self,
        prefix: &str,
        min_lat: f64,
        min_lon: f64,
        max_lat: f64,
        max_lon: f64,
    ) -> Result<bool> {
        let bounds = Bounds::new(min_lat, min_lon, max_lat, max_lon)?;

        let inner = self.read_checked()?;
        let precision = inner.config.geohash_precision;
        let now = SystemTime::now();

        for segment in bounds.segments().iter() {
            let cell = corner_prefix(&segment, precision);
            let mut found = false;
            visit_geo_records(
                &inner,
                &geo_scan_prefix(prefix, &cell),
                now,
                &mut |point, _, _| {
                    if segment.contains(&point) {
                        found = true;
                        return false;
                    }
                    true
                },
            );
            if found {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
