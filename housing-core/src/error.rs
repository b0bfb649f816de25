//! Error types for loading data, configuring and running the model.

use thiserror::Error;

/// Fatal errors while reading input datasets.
///
/// Individual malformed rows or features are not errors: they are skipped
/// with a warning by the loader.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid GeoJSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid dataset: {0}")]
    Csv(#[from] csv::Error),

    #[error("dataset is missing required column {0:?}")]
    MissingColumn(String),

    #[error("GeoJSON root must be a FeatureCollection, found {0}")]
    NotFeatureCollection(String),

    #[error("no usable neighbourhoods in input")]
    Empty,
}

impl LoadError {
    pub fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }
}

/// Invalid model parameters or sweep definitions.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("parameter {name} = {value} is invalid: {reason}")]
    InvalidParam {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("unknown sweep parameter: {0}")]
    UnknownParam(String),

    #[error("malformed sweep definition {0:?} (expected name=v1,v2 or name=start:stop:step)")]
    MalformedSweep(String),

    #[error("invalid batch configuration: {0}")]
    InvalidBatch(&'static str),
}

/// Errors that abort a simulation run.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("house {0} not found")]
    HouseNotFound(u64),

    #[error("household {0} not found")]
    HouseholdNotFound(u64),

    #[error("neighbourhood {0} not found")]
    NeighbourhoodNotFound(u64),

    #[error("house {house} price became non-finite at step {step}")]
    NonFinitePrice { house: u64, step: u64 },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
