use ac_access_store::{RuleId, StoreError};
use ac_service_tree::TreeError;
use thiserror::Error;

/// Errors produced by the access control surface.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("service not found: {0}")]
    ServiceNotFound(String),
    #[error("permission denied")]
    PermissionDenied,
    #[error("rate limited")]
    RateLimited,
    #[error("invalid rate limit rule: {0}")]
    InvalidRuleDefinition(String),
    #[error("rate limit rule {0} not found")]
    RuleNotFound(RuleId),
    #[error("invalid service tree: {0}")]
    Tree(#[from] TreeError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),
}

impl AccessError {
    /// True for the two access-control outcomes, which callers usually
    /// handle differently from genuine failures.
    pub fn is_access_denial(&self) -> bool {
        matches!(self, AccessError::PermissionDenied | AccessError::RateLimited)
    }
}

impl From<StoreError> for AccessError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RuleNotFound(id) => AccessError::RuleNotFound(id),
            other => AccessError::Storage(other),
        }
    }
}

pub type AccessResult<T> = Result<T, AccessError>;
