//! Great-circle distance and rectangular containment helpers.

use crate::error::{GeostoreError, Result};
use crate::types::{MAX_LATITUDE, MAX_LONGITUDE, MIN_LATITUDE, MIN_LONGITUDE, Point};

/// Mean Earth radius in meters used for all distance calculations.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Haversine great-circle distance between two points, in meters.
///
/// Symmetric, non-negative, and zero for identical coordinates.
pub fn haversine_distance(a: &Point, b: &Point) -> f64 {
    let lat1 = a.lat().to_radians();
    let lat2 = b.lat().to_radians();
    let delta_lat = (b.lat() - a.lat()).to_radians();
    let delta_lon = (b.lon() - a.lon()).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// A latitude/longitude rectangle that may span the antimeridian.
///
/// When `min_lon > max_lon` the rectangle covers
/// `[min_lon, 180] ∪ [-180, max_lon]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl Bounds {
    /// Validate and build a query rectangle.
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Result<Self> {
        for (name, value) in [
            ("min_lat", min_lat),
            ("min_lon", min_lon),
            ("max_lat", max_lat),
            ("max_lon", max_lon),
        ] {
            if !value.is_finite() {
                return Err(GeostoreError::InvalidArgument(format!(
                    "{name} must be finite, got {value}"
                )));
            }
        }
        if !(MIN_LATITUDE..=MAX_LATITUDE).contains(&min_lat)
            || !(MIN_LATITUDE..=MAX_LATITUDE).contains(&max_lat)
        {
            return Err(GeostoreError::InvalidArgument(format!(
                "latitude bounds must lie in [{MIN_LATITUDE}, {MAX_LATITUDE}]"
            )));
        }
        if !(MIN_LONGITUDE..=MAX_LONGITUDE).contains(&min_lon)
            || !(MIN_LONGITUDE..=MAX_LONGITUDE).contains(&max_lon)
        {
            return Err(GeostoreError::InvalidArgument(format!(
                "longitude bounds must lie in [{MIN_LONGITUDE}, {MAX_LONGITUDE}]"
            )));
        }
        if min_lat > max_lat {
            return Err(GeostoreError::InvalidArgument(format!(
                "min_lat ({min_lat}) must be <= max_lat ({max_lat})"
            )));
        }

        Ok(Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        })
    }

    /// Whether the rectangle crosses the antimeridian.
    pub fn crosses_antimeridian(&self) -> bool {
        self.min_lon > self.max_lon
    }

    /// Whether a point lies inside the rectangle (boundary inclusive).
    pub fn contains(&self, point: &Point) -> bool {
        if point.lat() < self.min_lat || point.lat() > self.max_lat {
            return false;
        }
        if self.crosses_antimeridian() {
            point.lon() >= self.min_lon || point.lon() <= self.max_lon
        } else {
            point.lon() >= self.min_lon && point.lon() <= self.max_lon
        }
    }

    /// Split into rectangles that do not cross the antimeridian,
    /// eastern segment first.
    pub fn segments(&self) -> BoundsSegments {
        if self.crosses_antimeridian() {
            BoundsSegments {
                first: Bounds {
                    min_lat: self.min_lat,
                    min_lon: self.min_lon,
                    max_lat: self.max_lat,
                    max_lon: MAX_LONGITUDE,
                },
                second: Some(Bounds {
                    min_lat: self.min_lat,
                    min_lon: MIN_LONGITUDE,
                    max_lat: self.max_lat,
                    max_lon: self.max_lon,
                }),
            }
        } else {
            BoundsSegments {
                first: *self,
                second: None,
            }
        }
    }
}

/// One or two antimeridian-free sub-rectangles of a [`Bounds`].
pub struct BoundsSegments {
    first: Bounds,
    second: Option<Bounds>,
}

impl BoundsSegments {
    pub fn iter(&self) -> impl Iterator<Item = Bounds> + '_ {
        std::iter::once(self.first).chain(self.second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> Point {
        Point::new(lat, lon).unwrap()
    }

    #[test]
    fn test_distance_basic_properties() {
        let nyc = point(40.7128, -74.0060);
        let brooklyn = point(40.6782, -73.9442);

        assert_eq!(haversine_distance(&nyc, &nyc), 0.0);

        let d = haversine_distance(&nyc, &brooklyn);
        let d_rev = haversine_distance(&brooklyn, &nyc);
        assert!(d > 0.0);
        assert!((d - d_rev).abs() < 1e-9);
        // Downtown Brooklyn is roughly 6-8 km from lower Manhattan.
        assert!((6_000.0..8_000.0).contains(&d));
    }

    #[test]
    fn test_distance_long_haul() {
        let nyc = point(40.7128, -74.0060);
        let london = point(51.5074, -0.1278);
        let d = haversine_distance(&nyc, &london);
        assert!((5_500_000.0..5_600_000.0).contains(&d));
    }

    #[test]
    fn test_distance_antipodal_bound() {
        let a = point(0.0, 0.0);
        let b = point(0.0, 180.0);
        let d = haversine_distance(&a, &b);
        // Half the circumference of the sphere.
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_METERS).abs() < 1.0);
    }

    #[test]
    fn test_bounds_validation() {
        assert!(Bounds::new(40.0, -10.0, 60.0, 10.0).is_ok());
        assert!(Bounds::new(60.0, -10.0, 40.0, 10.0).is_err()); // inverted lat
        assert!(Bounds::new(-95.0, 0.0, 0.0, 10.0).is_err());
        assert!(Bounds::new(0.0, -190.0, 10.0, 10.0).is_err());
        assert!(Bounds::new(f64::NAN, 0.0, 10.0, 10.0).is_err());
        // Inverted longitude is legal: it spans the antimeridian.
        assert!(Bounds::new(-10.0, 170.0, 10.0, -170.0).is_ok());
    }

    #[test]
    fn test_bounds_containment() {
        let plain = Bounds::new(40.0, -10.0, 60.0, 10.0).unwrap();
        assert!(plain.contains(&point(51.5074, -0.1278)));
        assert!(!plain.contains(&point(40.7128, -74.0060)));
        assert!(plain.contains(&point(40.0, -10.0))); // boundary inclusive

        let wrapped = Bounds::new(-10.0, 170.0, 10.0, -170.0).unwrap();
        assert!(wrapped.crosses_antimeridian());
        assert!(wrapped.contains(&point(0.0, 175.0)));
        assert!(wrapped.contains(&point(0.0, -175.0)));
        assert!(!wrapped.contains(&point(0.0, 0.0)));
    }

    #[test]
    fn test_bounds_segments() {
        let plain = Bounds::new(40.0, -10.0, 60.0, 10.0).unwrap();
        assert_eq!(plain.segments().iter().count(), 1);

        let wrapped = Bounds::new(-10.0, 170.0, 10.0, -170.0).unwrap();
        let segments: Vec<_> = wrapped.segments().iter().collect();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].min_lon, 170.0);
        assert_eq!(segments[0].max_lon, 180.0);
        assert_eq!(segments[1].min_lon, -180.0);
        assert_eq!(segments[1].max_lon, -170.0);
    }
}
