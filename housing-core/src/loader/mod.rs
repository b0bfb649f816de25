//! Input data: neighbourhood boundaries and statistics.
//!
//! Boundaries come from a GeoJSON FeatureCollection, statistics from a CSV
//! export of the municipal neighbourhood spreadsheet. The two are joined on the
//! neighbourhood name. Without a statistics table, values are synthesized from
//! a seeded RNG.

pub mod dataset;
pub mod geojson;

pub use dataset::*;
pub use geojson::*;

use std::collections::HashMap;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::LoadError;
use crate::geography::{CalibrationTargets, Geometry};
use crate::types::{Attribute, AttributeVector};

/// Everything the model needs to know about one neighbourhood at start-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoroughRecord {
    pub name: String,
    pub geometry: Geometry,
    /// Normalized attributes, each in [0, 1].
    pub attributes: AttributeVector,
    /// Number of dwellings in the real neighbourhood (before sampling).
    pub houses: u32,
    pub income: f64,
    /// `None` when the dataset has no cost-of-living column.
    pub cost_of_living: Option<f64>,
    pub average_house_price: f64,
    pub targets: CalibrationTargets,
}

/// Initial state shared (read-only) by every model built from the same inputs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub boroughs: Vec<BoroughRecord>,
}

/// Min-max scale each value into [0, 1]. No spread maps to 0.5.
fn min_max_scale(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let spread = max - min;
    values
        .iter()
        .map(|v| {
            if spread > 0.0 {
                (v - min) / spread
            } else {
                0.5
            }
        })
        .collect()
}

/// Normalized attribute vectors for the given rows, in row order.
fn normalize_attributes(rows: &[&NeighbourhoodRow]) -> Vec<AttributeVector> {
    let column = |f: fn(&NeighbourhoodRow) -> f64| -> Vec<f64> {
        min_max_scale(&rows.iter().map(|r| f(r)).collect::<Vec<_>>())
    };
    let quality = column(|r| r.satisfaction_housing);
    let shops = column(|r| r.shop_index);
    let crime = column(|r| r.crime_index);
    let nature = column(|r| r.nature_area);

    (0..rows.len())
        .map(|i| {
            let mut attributes = AttributeVector::default();
            attributes.set(Attribute::HousingQuality, quality[i]);
            attributes.set(Attribute::Shops, shops[i]);
            attributes.set(Attribute::Safety, 1.0 - crime[i]);
            attributes.set(Attribute::Nature, nature[i]);
            attributes
        })
        .collect()
}

impl Dataset {
    /// Join boundaries with table rows on the (case-insensitive) neighbourhood name.
    ///
    /// Boundaries without a row and rows without a boundary are skipped with a
    /// warning. The result keeps boundary order.
    pub fn join(boundaries: Vec<BoundaryFeature>, rows: Vec<NeighbourhoodRow>) -> Result<Dataset, LoadError> {
        let mut by_name: HashMap<String, NeighbourhoodRow> = HashMap::new();
        for row in rows {
            let key = row.neighbourhood.trim().to_lowercase();
            if by_name.contains_key(&key) {
                warn!(neighbourhood = %row.neighbourhood, "duplicate dataset row, keeping the first");
                continue;
            }
            by_name.insert(key, row);
        }

        let mut matched: Vec<(BoundaryFeature, NeighbourhoodRow)> = Vec::new();
        for boundary in boundaries {
            match by_name.remove(&boundary.name.to_lowercase()) {
                Some(row) => matched.push((boundary, row)),
                None => warn!(neighbourhood = %boundary.name, "no dataset row for neighbourhood, skipping"),
            }
        }
        for row in by_name.values() {
            warn!(neighbourhood = %row.neighbourhood, "dataset row has no boundary, skipping");
        }

        if matched.is_empty() {
            return Err(LoadError::Empty);
        }

        let row_refs: Vec<&NeighbourhoodRow> = matched.iter().map(|(_, r)| r).collect();
        let attributes = normalize_attributes(&row_refs);

        let boroughs = matched
            .into_iter()
            .zip(attributes)
            .map(|((boundary, row), attributes)| BoroughRecord {
                name: boundary.name,
                geometry: boundary.geometry,
                attributes,
                houses: row.houses.round() as u32,
                income: row.household_disposable_income,
                cost_of_living: row.cost_of_living,
                average_house_price: row.average_house_price,
                targets: CalibrationTargets {
                    houses_sold: row.houses_sold,
                    satisfaction: row.satisfaction_neighbourhood,
                    want_to_move_out: row.want_to_move_out.map(|pct| (pct / 100.0).clamp(0.0, 1.0)),
                },
            })
            .collect();

        Ok(Dataset { boroughs })
    }

    /// Random neighbourhood values for boundaries without a statistics table.
    pub fn synthesize(boundaries: Vec<BoundaryFeature>, seed: u64) -> Result<Dataset, LoadError> {
        if boundaries.is_empty() {
            return Err(LoadError::Empty);
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let boroughs = boundaries
            .into_iter()
            .map(|boundary| {
                let mut attributes = AttributeVector::default();
                for attribute in Attribute::all() {
                    attributes.set(attribute, rng.random::<f64>());
                }
                BoroughRecord {
                    name: boundary.name,
                    geometry: boundary.geometry,
                    attributes,
                    houses: rng.random_range(100..=500),
                    income: rng.random_range(10..=20) as f64,
                    cost_of_living: Some(rng.random_range(10..=20) as f64),
                    average_house_price: rng.random_range(50..=150) as f64,
                    targets: CalibrationTargets::default(),
                }
            })
            .collect();
        Ok(Dataset { boroughs })
    }

    /// Build a dataset from in-memory sources.
    pub fn from_sources(
        geojson: &str,
        table: Option<&str>,
        name_key: &str,
        seed: u64,
    ) -> Result<Dataset, LoadError> {
        let boundaries = parse_boundaries(geojson, name_key)?;
        let dataset = match table {
            Some(text) => Dataset::join(boundaries, read_neighbourhood_table(text.as_bytes())?)?,
            None => Dataset::synthesize(boundaries, seed)?,
        };
        Ok(dataset)
    }

    /// Load from files. Unreadable files are fatal.
    pub fn load(
        geojson_path: &Path,
        table_path: Option<&Path>,
        name_key: &str,
        seed: u64,
    ) -> Result<Dataset, LoadError> {
        let geojson = std::fs::read_to_string(geojson_path)
            .map_err(|e| LoadError::io(geojson_path.display(), e))?;
        let table = table_path
            .map(|path| std::fs::read_to_string(path).map_err(|e| LoadError::io(path.display(), e)))
            .transpose()?;

        let dataset = Dataset::from_sources(&geojson, table.as_deref(), name_key, seed)?;
        info!(
            neighbourhoods = dataset.boroughs.len(),
            houses = dataset.total_houses(),
            synthesized = table_path.is_none(),
            "loaded dataset"
        );
        Ok(dataset)
    }

    pub fn total_houses(&self) -> u64 {
        self.boroughs.iter().map(|b| b.houses as u64).sum()
    }

    pub fn find(&self, name: &str) -> Option<&BoroughRecord> {
        self.boroughs.iter().find(|b| b.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOJSON: &str = include_str!("../../../data/sample_neighbourhoods.geojson");
    const TABLE: &str = include_str!("../../../data/sample_neighbourhoods.csv");

    #[test]
    fn test_sample_data_joins() {
        let dataset = Dataset::from_sources(GEOJSON, Some(TABLE), DEFAULT_NAME_KEY, 0).unwrap();
        assert_eq!(dataset.boroughs.len(), 6);
        for borough in &dataset.boroughs {
            for attribute in Attribute::all() {
                let v = borough.attributes.get(attribute);
                assert!((0.0..=1.0).contains(&v), "{} {:?} = {}", borough.name, attribute, v);
            }
            assert!(borough.average_house_price > 0.0);
        }
        let centrum = dataset.find("centrum").unwrap();
        assert!(centrum.targets.want_to_move_out.unwrap() <= 1.0);
    }

    #[test]
    fn test_crime_is_inverted_into_safety() {
        let dataset = Dataset::from_sources(GEOJSON, Some(TABLE), DEFAULT_NAME_KEY, 0).unwrap();
        // Centrum has the highest crime index in the sample, Noord the lowest
        assert_eq!(dataset.find("Centrum").unwrap().attributes.get(Attribute::Safety), 0.0);
        assert_eq!(dataset.find("Noord").unwrap().attributes.get(Attribute::Safety), 1.0);
    }

    #[test]
    fn test_min_max_scale() {
        assert_eq!(min_max_scale(&[2.0, 4.0, 3.0]), vec![0.0, 1.0, 0.5]);
        assert_eq!(min_max_scale(&[7.0, 7.0]), vec![0.5, 0.5]);
    }

    #[test]
    fn test_unmatched_names_are_skipped() {
        let boundaries = parse_boundaries(GEOJSON, DEFAULT_NAME_KEY).unwrap();
        let rows = read_neighbourhood_table(TABLE.as_bytes()).unwrap();
        let only_one: Vec<NeighbourhoodRow> = rows.into_iter().take(1).collect();
        let dataset = Dataset::join(boundaries, only_one).unwrap();
        assert_eq!(dataset.boroughs.len(), 1);
    }

    #[test]
    fn test_no_matches_is_fatal() {
        let boundaries = parse_boundaries(GEOJSON, DEFAULT_NAME_KEY).unwrap();
        assert!(matches!(Dataset::join(boundaries, vec![]), Err(LoadError::Empty)));
    }

    #[test]
    fn test_synthesized_dataset_is_seeded() {
        let a = Dataset::from_sources(GEOJSON, None, DEFAULT_NAME_KEY, 5).unwrap();
        let b = Dataset::from_sources(GEOJSON, None, DEFAULT_NAME_KEY, 5).unwrap();
        let c = Dataset::from_sources(GEOJSON, None, DEFAULT_NAME_KEY, 6).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        for borough in &a.boroughs {
            assert!((100..=500).contains(&borough.houses));
            assert!((50.0..=150.0).contains(&borough.average_house_price));
        }
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let err = Dataset::load(Path::new("does/not/exist.geojson"), None, DEFAULT_NAME_KEY, 0);
        assert!(matches!(err, Err(LoadError::Io { .. })));
    }
}
