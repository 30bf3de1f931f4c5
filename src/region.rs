//! Named region polygons, the targets of aggregation.

use geo::algorithm::geodesic_area::GeodesicArea;
use geo::{Geometry, Intersects, MultiPolygon};
use geojson::{Feature, FeatureCollection, GeoJson};
use serde_json::Value;

use crate::error::{input_error, Result};
use crate::geodesy::Coord;

const SQ_METERS_PER_SQ_KM: f64 = 1.0e6;

/// A named area such as a city boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    /// Polygons in (longitude, latitude) degrees.
    pub geometry: MultiPolygon<f64>,
    /// Area in km². 0 if the polygon is degenerate.
    pub area_km2: f64,
}

impl Region {
    /// Create a region, deriving its area geodesically from the geometry.
    pub fn new(name: impl Into<String>, geometry: impl Into<MultiPolygon<f64>>) -> Self {
        let geometry = geometry.into();
        let area = geometry.geodesic_area_unsigned() / SQ_METERS_PER_SQ_KM;
        Region {
            name: name.into(),
            geometry,
            area_km2: if area.is_finite() { area } else { 0.0 },
        }
    }

    /// Replace the derived area with an externally known one.
    pub fn with_area_km2(mut self, area_km2: f64) -> Self {
        self.area_km2 = area_km2;
        self
    }

    /// Inclusive point-in-polygon test: a point on the boundary is inside.
    pub fn contains(&self, coord: &Coord) -> bool {
        self.geometry.intersects(&coord.to_point())
    }

    /// Build a region from a GeoJSON feature.
    ///
    /// The name comes from the `name` property or else the feature id. An
    /// `area_km2` property overrides the derived area.
    pub fn from_feature(feature: &Feature) -> Result<Self> {
        let name = match feature.property("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
            _ => match &feature.id {
                Some(geojson::feature::Id::String(id)) => id.clone(),
                Some(geojson::feature::Id::Number(id)) => id.to_string(),
                None => return Err(input_error("region feature has neither a name nor an id")),
            },
        };

        let geometry = feature
            .geometry
            .clone()
            .ok_or_else(|| input_error(format!("region '{}' has no geometry", name)))?;

        let polygons = match Geometry::<f64>::try_from(geometry)? {
            Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
            Geometry::MultiPolygon(mp) => mp,
            _ => {
                return Err(input_error(format!(
                    "region '{}' must be a Polygon or MultiPolygon",
                    name
                )));
            }
        };

        let region = Region::new(name, polygons);
        match feature.property("area_km2").and_then(Value::as_f64) {
            Some(area) => Ok(region.with_area_km2(area)),
            None => Ok(region),
        }
    }

    pub fn from_feature_collection(collection: &FeatureCollection) -> Result<Vec<Self>> {
        collection.features.iter().map(Region::from_feature).collect()
    }

    /// Parse a GeoJSON document holding a FeatureCollection of regions.
    pub fn from_geojson_str(json: &str) -> Result<Vec<Self>> {
        match json.parse::<GeoJson>()? {
            GeoJson::FeatureCollection(fc) => Self::from_feature_collection(&fc),
            GeoJson::Feature(f) => Ok(vec![Self::from_feature(&f)?]),
            GeoJson::Geometry(_) => Err(input_error("regions need names, got a bare geometry")),
        }
    }
}
