// src/error.rs

use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy for the dispatch core.
///
/// Every failure is local to a single request's future, except
/// `BrokerUnavailable`, which is shared-fate: connection loss fails every
/// pending request at once.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("failed to publish work item: {0}")]
    Publish(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("message serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
