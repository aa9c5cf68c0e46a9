//! Error types for the locator layer

use action_primitives::ActionError;
use cdp_adapter::AdapterError;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum LocatorError {
    /// Candidate could not be evaluated against the page
    #[error("Validation of '{selector}' failed: {reason}")]
    ValidationFailed { selector: String, reason: String },

    /// Remote recovery service unreachable or returned garbage
    #[error("Recovery service error: {0}")]
    Remote(String),

    /// Remote recovery is not configured
    #[error("Recovery service disabled")]
    RemoteDisabled,

    #[error("CDP error: {0}")]
    CdpError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LocatorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LocatorError::Remote(_) | LocatorError::CdpError(_))
    }

    /// Get error severity (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            LocatorError::Internal(_) => 3,
            LocatorError::CdpError(_) => 2,
            LocatorError::Remote(_) | LocatorError::ValidationFailed { .. } => 1,
            LocatorError::RemoteDisabled => 0,
        }
    }
}

impl From<AdapterError> for LocatorError {
    fn from(err: AdapterError) -> Self {
        LocatorError::CdpError(err.to_string())
    }
}

impl From<LocatorError> for ActionError {
    fn from(err: LocatorError) -> Self {
        match err {
            LocatorError::CdpError(msg) => ActionError::CdpIo(msg),
            other => ActionError::Internal(other.to_string()),
        }
    }
}
