// Neighbourhood statistics table (CSV export of the municipal spreadsheet)

use std::io::Read;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::LoadError;

/// Columns a dataset must provide.
pub const REQUIRED_COLUMNS: [&str; 8] = [
    "neighbourhood",
    "houses",
    "household_disposable_income",
    "satisfaction_housing",
    "shop_index",
    "crime_index",
    "nature_area_%",
    "average_house_price",
];

/// One validated row of the neighbourhood table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NeighbourhoodRow {
    pub neighbourhood: String,
    pub houses: f64,
    pub household_disposable_income: f64,
    pub satisfaction_housing: f64,
    pub shop_index: f64,
    pub crime_index: f64,
    #[serde(rename = "nature_area_%")]
    pub nature_area: f64,
    pub average_house_price: f64,
    #[serde(default)]
    pub cost_of_living: Option<f64>,
    #[serde(default)]
    pub houses_sold: Option<f64>,
    #[serde(default)]
    pub satisfaction_neighbourhood: Option<f64>,
    /// Percentage of residents wanting to move out.
    #[serde(rename = "want_to_move_out_%", default)]
    pub want_to_move_out: Option<f64>,
}

impl NeighbourhoodRow {
    /// Reason this row cannot be used, if any.
    fn problem(&self) -> Option<&'static str> {
        if self.neighbourhood.trim().is_empty() {
            return Some("empty neighbourhood name");
        }
        let required = [
            self.houses,
            self.household_disposable_income,
            self.satisfaction_housing,
            self.shop_index,
            self.crime_index,
            self.nature_area,
            self.average_house_price,
        ];
        if required.iter().any(|v| !v.is_finite()) {
            return Some("non-finite value");
        }
        if self.houses < 0.0 || self.average_house_price < 0.0 {
            return Some("negative house count or price");
        }
        if self.cost_of_living.is_some_and(|c| !c.is_finite() || c < 0.0) {
            return Some("invalid cost of living");
        }
        None
    }
}

/// Read the neighbourhood table.
///
/// A missing required column or an unreadable header is fatal. Rows that fail
/// to parse or validate are skipped with a warning.
pub fn read_neighbourhood_table<R: Read>(reader: R) -> Result<Vec<NeighbourhoodRow>, LoadError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    if let Some(missing) = REQUIRED_COLUMNS
        .iter()
        .find(|column| !headers.iter().any(|h| h == **column))
    {
        return Err(LoadError::MissingColumn(missing.to_string()));
    }

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (index, record) in csv_reader.deserialize::<NeighbourhoodRow>().enumerate() {
        // Header is line 1
        let line = index + 2;
        match record {
            Ok(row) => match row.problem() {
                None => rows.push(row),
                Some(reason) => {
                    skipped += 1;
                    warn!(line, neighbourhood = %row.neighbourhood, reason, "skipping dataset row");
                }
            },
            Err(e) => {
                skipped += 1;
                warn!(line, error = %e, "skipping malformed dataset row");
            }
        }
    }

    debug!(rows = rows.len(), skipped, "read neighbourhood table");
    Ok(rows)
}
