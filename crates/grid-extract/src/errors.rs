//! Grid extraction errors

use action_primitives::ActionError;
use cdp_adapter::AdapterError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GridError {
    /// Grid or rows never showed up
    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    /// A filter could not be evaluated for a row; the row is treated as not matching
    #[error("Filter on '{column}' ({operator}) failed: {reason}")]
    FilterEvaluationError {
        column: String,
        operator: String,
        reason: String,
    },

    #[error("Extraction interrupted: {0}")]
    Interrupted(String),

    #[error("Driver error: {0}")]
    Driver(String),
}

impl GridError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GridError::Driver(_))
    }

    /// Get error severity (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            GridError::ExtractionFailure(_) | GridError::Driver(_) => 2,
            GridError::FilterEvaluationError { .. } => 1,
            GridError::Interrupted(_) => 0,
        }
    }

    pub(crate) fn filter(
        column: &str,
        operator: &str,
        reason: impl Into<String>,
    ) -> Self {
        GridError::FilterEvaluationError {
            column: column.to_string(),
            operator: operator.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<AdapterError> for GridError {
    fn from(err: AdapterError) -> Self {
        GridError::Driver(err.to_string())
    }
}

impl From<ActionError> for GridError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::Interrupted(msg) => GridError::Interrupted(msg),
            ActionError::CdpIo(msg) => GridError::Driver(msg),
            other => GridError::ExtractionFailure(other.to_string()),
        }
    }
}
