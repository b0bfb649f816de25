// Neighbourhood boundaries from a GeoJSON FeatureCollection

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::geography::Geometry;

/// Property holding the neighbourhood name unless configured otherwise.
pub const DEFAULT_NAME_KEY: &str = "name";

/// One named polygon feature.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryFeature {
    pub name: String,
    pub geometry: Geometry,
}

fn feature_name(feature: &Value, name_key: &str) -> Option<String> {
    let value = feature.get("properties")?.get(name_key)?;
    let name = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!name.is_empty()).then_some(name)
}

/// Parse neighbourhood boundaries.
///
/// Features without a name or without Polygon/MultiPolygon geometry are skipped
/// with a warning, as are repeated names. Text that is not a FeatureCollection
/// is an error.
pub fn parse_boundaries(text: &str, name_key: &str) -> Result<Vec<BoundaryFeature>, LoadError> {
    let root: Value = serde_json::from_str(text)?;

    let kind = root.get("type").and_then(Value::as_str).unwrap_or("<missing>");
    if kind != "FeatureCollection" {
        return Err(LoadError::NotFeatureCollection(kind.to_string()));
    }
    let features = root
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| LoadError::NotFeatureCollection("FeatureCollection without features".into()))?;

    let mut seen = HashSet::new();
    let mut boundaries = Vec::with_capacity(features.len());

    for (index, feature) in features.iter().enumerate() {
        let Some(name) = feature_name(feature, name_key) else {
            warn!(index, name_key, "skipping feature without a name");
            continue;
        };
        let Some(geometry) = feature.get("geometry").and_then(Geometry::from_geojson) else {
            warn!(index, name = %name, "skipping feature without polygon geometry");
            continue;
        };
        if !seen.insert(name.to_lowercase()) {
            warn!(index, name = %name, "skipping duplicate neighbourhood");
            continue;
        }
        boundaries.push(BoundaryFeature { name, geometry });
    }

    debug!(
        features = features.len(),
        usable = boundaries.len(),
        "parsed neighbourhood boundaries"
    );
    Ok(boundaries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = r#"{"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}"#;

    fn collection(features: &[String]) -> String {
        format!(r#"{{"type": "FeatureCollection", "features": [{}]}}"#, features.join(","))
    }

    fn feature(properties: &str, geometry: &str) -> String {
        format!(r#"{{"type": "Feature", "properties": {}, "geometry": {}}}"#, properties, geometry)
    }

    #[test]
    fn test_parses_named_polygons() {
        let text = collection(&[
            feature(r#"{"name": "Centrum"}"#, SQUARE),
            feature(r#"{"name": " West "}"#, SQUARE),
        ]);
        let boundaries = parse_boundaries(&text, DEFAULT_NAME_KEY).unwrap();
        let names: Vec<&str> = boundaries.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Centrum", "West"]);
    }

    #[test]
    fn test_custom_name_key() {
        let text = collection(&[feature(r#"{"Buurt": "Burgwallen-Oost", "name": "x"}"#, SQUARE)]);
        let boundaries = parse_boundaries(&text, "Buurt").unwrap();
        assert_eq!(boundaries[0].name, "Burgwallen-Oost");
    }

    #[test]
    fn test_skips_bad_features() {
        let text = collection(&[
            feature(r#"{}"#, SQUARE),
            feature(r#"{"name": "Point"}"#, r#"{"type": "Point", "coordinates": [0, 0]}"#),
            feature(r#"{"name": "Noord"}"#, "null"),
            feature(r#"{"name": "Zuid"}"#, SQUARE),
            feature(r#"{"name": "zuid"}"#, SQUARE),
        ]);
        let boundaries = parse_boundaries(&text, DEFAULT_NAME_KEY).unwrap();
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].name, "Zuid");
    }

    #[test]
    fn test_rejects_non_collections() {
        assert!(matches!(
            parse_boundaries("{not json", DEFAULT_NAME_KEY),
            Err(LoadError::Json(_))
        ));
        assert!(matches!(
            parse_boundaries(SQUARE, DEFAULT_NAME_KEY),
            Err(LoadError::NotFeatureCollection(kind)) if kind == "Polygon"
        ));
    }
}
