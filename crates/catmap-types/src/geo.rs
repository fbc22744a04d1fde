use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer, ser::SerializeStruct};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    #[error("expected \"lat,lng\"")]
    Malformed,
    #[error("latitude is not a number")]
    LatitudeNotANumber,
    #[error("longitude is not a number")]
    LongitudeNotANumber,
    #[error("latitude out of range")]
    LatitudeOutOfRange,
    #[error("longitude out of range")]
    LongitudeOutOfRange,
}

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Serializes as a GeoJSON `Point`; GeoJSON positions are `[lng, lat]`.
impl Serialize for Coordinate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut point = serializer.serialize_struct("Point", 2)?;
        point.serialize_field("type", "Point")?;
        point.serialize_field("coordinates", &[self.lng, self.lat])?;
        point.end()
    }
}

/// A rectangle corner as it arrives in a query string: `"lat,lng"`.
///
/// Parsing rejects anything that is not two finite numbers within the
/// valid latitude/longitude ranges.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct Corner(pub Coordinate);

impl FromStr for Corner {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(',');
        let (Some(lat), Some(lng), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(GeoError::Malformed);
        };

        let lat: f64 = lat.trim().parse().map_err(|_| GeoError::LatitudeNotANumber)?;
        let lng: f64 = lng.trim().parse().map_err(|_| GeoError::LongitudeNotANumber)?;

        // "NaN" and "inf" parse successfully as f64
        if !lat.is_finite() {
            return Err(GeoError::LatitudeNotANumber);
        }
        if !lng.is_finite() {
            return Err(GeoError::LongitudeNotANumber);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(GeoError::LatitudeOutOfRange);
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(GeoError::LongitudeOutOfRange);
        }

        Ok(Corner(Coordinate { lat, lng }))
    }
}

impl TryFrom<String> for Corner {
    type Error = GeoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Axis-aligned extents of a polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

/// Closed ring of vertices; the first vertex is repeated as the last.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    ring: Vec<Coordinate>,
}

impl Polygon {
    pub fn vertices(&self) -> &[Coordinate] {
        &self.ring
    }

    pub fn bounds(&self) -> Bounds {
        let mut bounds = Bounds {
            min_lat: f64::INFINITY,
            min_lng: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
            max_lng: f64::NEG_INFINITY,
        };
        for c in &self.ring {
            bounds.min_lat = bounds.min_lat.min(c.lat);
            bounds.min_lng = bounds.min_lng.min(c.lng);
            bounds.max_lat = bounds.max_lat.max(c.lat);
            bounds.max_lng = bounds.max_lng.max(c.lng);
        }
        bounds
    }

    /// Inclusive containment. Only meaningful for the axis-aligned
    /// rectangles produced by [`rectangle_bounds`].
    pub fn contains(&self, point: Coordinate) -> bool {
        let b = self.bounds();
        (b.min_lat..=b.max_lat).contains(&point.lat) && (b.min_lng..=b.max_lng).contains(&point.lng)
    }
}

impl Serialize for Polygon {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let ring: Vec<[f64; 2]> = self.ring.iter().map(|c| [c.lng, c.lat]).collect();
        let mut polygon = serializer.serialize_struct("Polygon", 2)?;
        polygon.serialize_field("type", "Polygon")?;
        polygon.serialize_field("coordinates", &[ring])?;
        polygon.end()
    }
}

/// Build the rectangle spanned by two opposite corners.
///
/// The corners may arrive in either diagonal order; min and max are taken
/// per axis. Identical corners give a zero-area polygon.
pub fn rectangle_bounds(top_right: Coordinate, bottom_left: Coordinate) -> Polygon {
    let min_lat = top_right.lat.min(bottom_left.lat);
    let max_lat = top_right.lat.max(bottom_left.lat);
    let min_lng = top_right.lng.min(bottom_left.lng);
    let max_lng = top_right.lng.max(bottom_left.lng);

    Polygon {
        ring: vec![
            Coordinate::new(min_lat, min_lng),
            Coordinate::new(min_lat, max_lng),
            Coordinate::new(max_lat, max_lng),
            Coordinate::new(max_lat, min_lng),
            Coordinate::new(min_lat, min_lng),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(polygon: &Polygon) -> Vec<(f64, f64)> {
        polygon.vertices().iter().map(|c| (c.lat, c.lng)).collect()
    }

    #[test]
    fn rectangle_from_labelled_corners() {
        let polygon = rectangle_bounds(Coordinate::new(40.0, -73.0), Coordinate::new(39.0, -74.0));
        assert_eq!(
            ring(&polygon),
            vec![(39.0, -74.0), (39.0, -73.0), (40.0, -73.0), (40.0, -74.0), (39.0, -74.0)]
        );
    }

    #[test]
    fn swapped_corners_give_same_polygon() {
        let a = Coordinate::new(40.0, -73.0);
        let b = Coordinate::new(39.0, -74.0);
        assert_eq!(rectangle_bounds(a, b), rectangle_bounds(b, a));

        // other diagonal
        let c = Coordinate::new(40.0, -74.0);
        let d = Coordinate::new(39.0, -73.0);
        assert_eq!(rectangle_bounds(c, d), rectangle_bounds(a, b));
    }

    #[test]
    fn degenerate_corners_still_close() {
        let p = Coordinate::new(60.17, 24.94);
        let polygon = rectangle_bounds(p, p);
        assert_eq!(polygon.vertices().len(), 5);
        assert_eq!(polygon.vertices().first(), polygon.vertices().last());
        assert!(polygon.contains(p));

        let line = rectangle_bounds(Coordinate::new(10.0, 5.0), Coordinate::new(10.0, 7.0));
        let b = line.bounds();
        assert_eq!(b.min_lat, b.max_lat);
        assert!(line.contains(Coordinate::new(10.0, 6.0)));
        assert!(!line.contains(Coordinate::new(10.1, 6.0)));
    }

    #[test]
    fn bounds_and_contains() {
        let polygon = rectangle_bounds(Coordinate::new(40.0, -73.0), Coordinate::new(39.0, -74.0));
        assert_eq!(
            polygon.bounds(),
            Bounds { min_lat: 39.0, min_lng: -74.0, max_lat: 40.0, max_lng: -73.0 }
        );
        assert!(polygon.contains(Coordinate::new(39.5, -73.5)));
        assert!(polygon.contains(Coordinate::new(40.0, -73.0)));
        assert!(!polygon.contains(Coordinate::new(41.0, -73.5)));
    }

    #[test]
    fn polygon_serializes_as_geojson() {
        let polygon = rectangle_bounds(Coordinate::new(1.0, 2.0), Coordinate::new(0.0, 0.0));
        let json = serde_json::to_value(&polygon).unwrap();
        assert_eq!(json["type"], "Polygon");
        assert_eq!(json["coordinates"][0][0], serde_json::json!([0.0, 0.0]));
        assert_eq!(json["coordinates"][0][2], serde_json::json!([2.0, 1.0]));
    }

    #[test]
    fn point_serializes_lng_first() {
        let json = serde_json::to_value(Coordinate::new(60.0, 25.0)).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "Point", "coordinates": [25.0, 60.0] }));
    }

    #[test]
    fn corner_parsing() {
        assert_eq!("40.0,-73.0".parse::<Corner>().unwrap().0, Coordinate::new(40.0, -73.0));
        assert_eq!(" 1.5 , 2 ".parse::<Corner>().unwrap().0, Coordinate::new(1.5, 2.0));

        assert_eq!("40.0".parse::<Corner>(), Err(GeoError::Malformed));
        assert_eq!("1,2,3".parse::<Corner>(), Err(GeoError::Malformed));
        assert_eq!("abc,2".parse::<Corner>(), Err(GeoError::LatitudeNotANumber));
        assert_eq!("NaN,2".parse::<Corner>(), Err(GeoError::LatitudeNotANumber));
        assert_eq!("1,inf".parse::<Corner>(), Err(GeoError::LongitudeNotANumber));
        assert_eq!("91,0".parse::<Corner>(), Err(GeoError::LatitudeOutOfRange));
        assert_eq!("0,-180.5".parse::<Corner>(), Err(GeoError::LongitudeOutOfRange));
    }
}
