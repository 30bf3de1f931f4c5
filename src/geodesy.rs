//! Geographic calculations on WGS84 degrees.
//!
//! Thin wrappers over the `geo` metric spaces so the rest of the crate can
//! work in latitude/longitude order and kilometers.

use geo::{Centroid, Distance, Haversine, MultiPoint, Point};

/// Mean earth radius in kilometers, the radius `geo`'s haversine metric uses.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Kilometers spanned by one degree of latitude on the mean sphere.
pub const KM_PER_DEGREE_LAT: f64 = EARTH_RADIUS_KM * std::f64::consts::PI / 180.0;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

impl Coord {
    pub fn new(lat: f64, lon: f64) -> Self {
        Coord { lat, lon }
    }

    /// Great circle distance to another coordinate in kilometers.
    pub fn distance_km(&self, other: &Coord) -> f64 {
        Haversine.distance(self.to_point(), other.to_point()) / 1000.0
    }

    /// Convert to a `geo` point (x = longitude, y = latitude).
    pub fn to_point(self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }

    fn from_point(p: Point<f64>) -> Self {
        Coord::new(p.y(), p.x())
    }
}

/// The haversine great circle distance between two points given in degrees.
///
/// Returns the distance in kilometers.
pub fn great_circle_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    Coord::new(lat1, lon1).distance_km(&Coord::new(lat2, lon2))
}

/// Arithmetic mean of a set of coordinates, `None` if the set is empty.
pub fn centroid<'a>(coords: impl IntoIterator<Item = &'a Coord>) -> Option<Coord> {
    let points: MultiPoint<f64> = coords.into_iter().map(|c| c.to_point()).collect();
    points.centroid().map(Coord::from_point)
}
