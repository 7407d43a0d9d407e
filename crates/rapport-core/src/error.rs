//! Error taxonomy for the matching engine.
//!
//! Only `MatchError` ever leaves `MatchEngine::match_entities`. Provider and
//! estimator failures degrade the affected term instead.

use thiserror::Error;

/// Fatal errors returned from the public matching API.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatchError {
    /// Empty target list, or an entity with no derivable segment.
    #[error("input validation failed: {0}")]
    InputValidation(String),

    /// A configuration value is outside its allowed range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of an injected data provider.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// The provider could not answer (geocoding failure, storage outage, ...).
    #[error("{provider} unavailable: {reason}")]
    Unavailable {
        provider: &'static str,
        reason: String,
    },
}

impl ProviderError {
    pub fn unavailable(provider: &'static str, reason: impl Into<String>) -> Self {
        ProviderError::Unavailable {
            provider,
            reason: reason.into(),
        }
    }
}

/// Failure of a secondary estimator. Always swallowed by the engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EstimatorError {
    #[error("estimator failed: {0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, MatchError>;
