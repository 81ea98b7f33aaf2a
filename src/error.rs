//! Error types for hazard aggregation, reinsurance and configuration

use thiserror::Error;

use crate::types::{EventId, SiteId};

/// Errors raised by the probability-map and hazard-map engine
#[derive(Error, Debug)]
pub enum HazardError {
    #[error("site {0:?} is not in the probability map")]
    UnknownSite(SiteId),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("the curves have {got} levels, {expected} were passed")]
    LevelMismatch { got: usize, expected: usize },

    #[error("unknown amplification code {0}")]
    UnknownAmpcode(String),

    #[error("unknown intensity measure type {0}")]
    UnknownImt(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Errors raised by the reinsurance model and the treaty cascade
#[derive(Error, Debug)]
pub enum ReinsuranceError {
    /// Structural violation in the treaty/policy tables.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The cascade lost or created loss. This is a bug, never a bad input.
    #[error(
        "event {event_id:?}: retention + cessions = {total} but claim = {claim}"
    )]
    ConservationViolated {
        event_id: EventId,
        total: f64,
        claim: f64,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Hazard(#[from] HazardError),

    #[error(transparent)]
    Reinsurance(#[from] ReinsuranceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
