// ============================================================================
// Serializable State Snapshot for JS and map export
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tsify_next::Tsify;

use crate::model::Model;
use crate::types::{KeyToU64, MapColor};

/// Map view used when the data has no usable extent: central Amsterdam.
pub const DEFAULT_MAP_CENTER: [f64; 2] = [52.3676, 4.9041];
pub const DEFAULT_MAP_ZOOM: u32 = 11;

#[derive(Debug, Clone, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct NeighbourhoodSnapshot {
    pub id: u64,
    pub name: String,
    pub color: MapColor,
    pub houses: u32,
    pub occupied: u32,
    pub sellers: u32,
    pub moves: u32,
    pub average_house_price: f64,
    pub demand_pressure: f64,
    pub mean_contentment: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct StateSnapshot {
    pub step: u64,
    pub running: bool,
    pub deals: u32,
    pub average_contentment: f64,
    pub average_price: f64,
    pub households: u32,
    pub unhoused: u32,
    /// Map centre as (latitude, longitude).
    pub center: [f64; 2],
    pub zoom: u32,
    pub neighbourhoods: Vec<NeighbourhoodSnapshot>,
}

/// Centre of all neighbourhood outlines as (latitude, longitude).
pub fn map_center(model: &Model) -> [f64; 2] {
    model
        .neighbourhoods
        .values()
        .filter_map(|n| n.geometry.bounding_box())
        .reduce(|a, b| a.union(b))
        .map(|bbox| {
            let [lon, lat] = bbox.center();
            [lat, lon]
        })
        .unwrap_or(DEFAULT_MAP_CENTER)
}

pub fn snapshot(model: &Model) -> StateSnapshot {
    StateSnapshot {
        step: model.step_count(),
        running: model.is_running(),
        deals: model.deals(),
        average_contentment: model.average_contentment(),
        average_price: model.average_price(),
        households: model.households.len() as u32,
        unhoused: model.unhoused_count() as u32,
        center: map_center(model),
        zoom: DEFAULT_MAP_ZOOM,
        neighbourhoods: model
            .neighbourhoods
            .iter()
            .map(|(id, n)| NeighbourhoodSnapshot {
                id: id.to_u64(),
                name: n.name.clone(),
                color: MapColor::for_moves(n.moves),
                houses: n.house_ids.len() as u32,
                occupied: n.occupied,
                sellers: n.sellers,
                moves: n.moves,
                average_house_price: n.average_house_price,
                demand_pressure: n.demand_pressure,
                mean_contentment: n.mean_contentment,
            })
            .collect(),
    }
}

/// The neighbourhood map as a GeoJSON FeatureCollection, each feature
/// carrying its colour and current aggregates.
pub fn map_geojson(model: &Model) -> Value {
    let features: Vec<Value> = model
        .neighbourhoods
        .values()
        .map(|n| {
            json!({
                "type": "Feature",
                "geometry": n.geometry.to_geojson(),
                "properties": {
                    "name": n.name,
                    "color": MapColor::for_moves(n.moves).as_str(),
                    "moves": n.moves,
                    "average_price": n.average_house_price,
                    "demand_pressure": n.demand_pressure,
                    "mean_contentment": n.mean_contentment,
                    "occupied": n.occupied,
                    "sellers": n.sellers,
                },
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "properties": { "step": model.step_count(), "deals": model.deals() },
        "features": features,
    })
}

/// Text line shown under the map.
pub fn deals_text(model: &Model) -> String {
    format!("Amount of Deals: {}", model.deals())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelParams;
    use crate::loader::{DEFAULT_NAME_KEY, Dataset};

    const GEOJSON: &str = include_str!("../../data/sample_neighbourhoods.geojson");

    fn model() -> Model {
        let dataset = Dataset::from_sources(GEOJSON, None, DEFAULT_NAME_KEY, 3).unwrap();
        Model::new(&dataset, ModelParams::default()).unwrap()
    }

    #[test]
    fn test_snapshot_lists_every_neighbourhood() {
        let m = model();
        let snap = snapshot(&m);
        assert_eq!(snap.neighbourhoods.len(), 6);
        assert_eq!(snap.step, 0);
        assert!(snap.neighbourhoods.iter().all(|n| n.color == MapColor::Grey));
    }

    #[test]
    fn test_center_inside_amsterdam() {
        let [lat, lon] = map_center(&model());
        assert!((52.3..52.45).contains(&lat), "lat {}", lat);
        assert!((4.75..5.0).contains(&lon), "lon {}", lon);

        let empty = Model::new(&Dataset::default(), ModelParams::default()).unwrap();
        assert_eq!(map_center(&empty), DEFAULT_MAP_CENTER);
    }

    #[test]
    fn test_map_geojson_properties() {
        let mut m = model();
        let first = m.neighbourhoods.keys().next().unwrap();
        m.neighbourhoods[first].moves = 25;

        let map = map_geojson(&m);
        assert_eq!(map["type"], "FeatureCollection");
        let features = map["features"].as_array().unwrap();
        assert_eq!(features.len(), 6);
        assert_eq!(features[0]["properties"]["color"], "Orange");
        assert_eq!(features[0]["properties"]["moves"], 25);
        assert_eq!(features[1]["properties"]["color"], "Grey");
        assert!(features[0]["geometry"]["coordinates"].is_array());
    }

    #[test]
    fn test_deals_text() {
        assert_eq!(deals_text(&model()), "Amount of Deals: 0");
    }
}
