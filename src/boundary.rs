use std::{path::Path, time::Duration};

use geo::{BoundingRect, MultiPolygon, Rect};
use geojson::{FeatureCollection, JsonValue};
use tracing::{debug, info};

use crate::error::Result;

pub const NYC_TRACTS_URL: &str =
    "https://data.cityofnewyork.us/api/geospatial/fxpq-c8ku?method=export&format=GeoJSON";

/// Property holding the borough digit + 6 digit tract code.
pub const TRACT_ID_PROPERTY: &str = "boro_ct2010";

pub struct TractShape {
    pub id: String,
    pub shape: MultiPolygon<f64>,
}

pub fn fetch_boundaries(url: &str, timeout: Duration) -> Result<FeatureCollection> {
    info!("Fetching tract boundaries from {}", url);
    let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
    let body = client.get(url).send()?.error_for_status()?.text()?;
    Ok(body.parse()?)
}

pub fn load_boundaries<P: AsRef<Path>>(path: P) -> Result<FeatureCollection> {
    let gj: FeatureCollection = std::fs::read_to_string(path)?.parse()?;
    Ok(gj)
}

fn property_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Polygonal tract features keyed by their tract id. Features without an id
/// or with non polygon geometry are skipped.
pub fn tract_shapes(collection: &FeatureCollection) -> Vec<TractShape> {
    let mut shapes = Vec::new();
    for feature in &collection.features {
        let Some(id) = feature.property(TRACT_ID_PROPERTY).and_then(property_id) else {
            continue;
        };
        let Some(geometry) = &feature.geometry else {
            continue;
        };
        let shape = match geo::Geometry::<f64>::try_from(geometry.value.clone()) {
            Ok(geo::Geometry::Polygon(p)) => MultiPolygon::new(vec![p]),
            Ok(geo::Geometry::MultiPolygon(mp)) => mp,
            Ok(_) => continue,
            Err(e) => {
                debug!(tract = %id, error = %e, "Skipping unreadable geometry");
                continue;
            }
        };
        shapes.push(TractShape { id, shape });
    }
    shapes
}

/// Bounding box around every shape.
pub fn extent(shapes: &[TractShape]) -> Option<Rect<f64>> {
    shapes
        .iter()
        .filter_map(|s| s.shape.bounding_rect())
        .reduce(|a, b| {
            Rect::new(
                (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
                (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
            )
        })
}

#[cfg(test)]
pub mod fixtures {
    pub const TWO_TRACTS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature",
             "properties": {"boro_ct2010": "2017702", "boro_name": "Bronx"},
             "geometry": {"type": "Polygon", "coordinates": [[[-73.92, 40.84], [-73.91, 40.84], [-73.91, 40.85], [-73.92, 40.85], [-73.92, 40.84]]]}},
            {"type": "Feature",
             "properties": {"boro_ct2010": 1000100},
             "geometry": {"type": "MultiPolygon", "coordinates": [[[[-74.01, 40.70], [-74.00, 40.70], [-74.00, 40.71], [-74.01, 40.70]]]]}},
            {"type": "Feature",
             "properties": {"boro_name": "Queens"},
             "geometry": {"type": "Point", "coordinates": [-73.8, 40.7]}}
        ]
    }"#;
}

#[cfg(test)]
mod tests {
    use super::fixtures::TWO_TRACTS;
    use super::*;

    #[test]
    fn shapes_are_keyed_by_tract_id() {
        let fc: FeatureCollection = TWO_TRACTS.parse().unwrap();
        let shapes = tract_shapes(&fc);
        let ids: Vec<&str> = shapes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["2017702", "1000100"]);
        assert_eq!(shapes[0].shape.0.len(), 1);
    }

    #[test]
    fn extent_covers_all_shapes() {
        let fc: FeatureCollection = TWO_TRACTS.parse().unwrap();
        let rect = extent(&tract_shapes(&fc)).unwrap();
        assert!((rect.min().x - -74.01).abs() < 1e-9);
        assert!((rect.max().x - -73.91).abs() < 1e-9);
        assert!((rect.min().y - 40.70).abs() < 1e-9);
        assert!((rect.max().y - 40.85).abs() < 1e-9);

        assert!(extent(&[]).is_none());
    }

    #[test]
    fn boundaries_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracts.geojson");
        std::fs::write(&path, TWO_TRACTS).unwrap();
        let fc = load_boundaries(&path).unwrap();
        assert_eq!(fc.features.len(), 3);
    }
}
