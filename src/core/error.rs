//! Error taxonomy for stacked-reform aggregation.
//!
//! Every variant is fatal for the run that raised it: no reform step's output is
//! considered valid once one is returned, and no tables are written. Conditions that
//! are recovered per household (missing head, zero baseline income) never show up here.

use std::path::PathBuf;

use thiserror::Error;

use super::types::HouseholdId;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("Population dataset unavailable at {path}: {reason}")]
    DatasetUnavailable { path: PathBuf, reason: String },

    #[error("Quantity '{quantity}' is not available at {entity} level")]
    UnknownQuantity { quantity: String, entity: String },

    #[error("Household ids diverge at step '{step}': {detail}")]
    IdentitySetMismatch { step: String, detail: String },

    #[error("Household {household_id} has no person records")]
    DemographicIntegrity { household_id: HouseholdId },

    #[error("Malformed entity frame: {reason}")]
    MalformedFrame { reason: String },

    #[error("Evaluation failed for reform stack [{stack}]: {reason}")]
    Evaluation { stack: String, reason: String },

    #[error("Invalid reform sequence: {reason}")]
    InvalidSequence { reason: String },

    #[error("Invalid aggregator configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AggregateError {
    pub(crate) fn unknown_quantity(quantity: &str, entity: &str) -> Self {
        Self::UnknownQuantity {
            quantity: quantity.to_string(),
            entity: entity.to_string(),
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
