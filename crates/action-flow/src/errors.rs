//! Flow execution error types

use action_primitives::ActionError;
use grid_extract::GridError;
use thiserror::Error;

/// Flow execution errors
#[derive(Debug, Error)]
pub enum FlowError {
    /// Step tree validation failed
    #[error("Flow validation failed: {0}")]
    ValidationFailed(String),

    /// Step could not be parsed into something runnable
    #[error("Invalid step {step_id}: {reason}")]
    InvalidStep { step_id: String, reason: String },

    /// Navigation failures always end the replay
    #[error("Navigation failed at step {step_id}: {reason}")]
    Navigation { step_id: String, reason: String },

    /// Stop signal observed between steps
    #[error("Replay cancelled")]
    Cancelled,

    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    /// A loop names a grid definition that was never registered
    #[error("No grid definition registered for source {0}")]
    MissingDefinition(String),
}

impl FlowError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowError::Action(err) => err.is_retryable(),
            FlowError::Grid(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Get error severity level (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            FlowError::Navigation { .. } | FlowError::ValidationFailed(_) => 2,
            FlowError::Action(err) => err.severity(),
            FlowError::Grid(err) => err.severity(),
            FlowError::InvalidStep { .. }
            | FlowError::MissingDefinition(_) => 1,
            FlowError::Cancelled => 0,
        }
    }

    /// Whether the error stops the whole replay regardless of policy
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FlowError::Navigation { .. }
                | FlowError::Cancelled
                | FlowError::ValidationFailed(_)
                | FlowError::Action(ActionError::Interrupted(_))
                | FlowError::Grid(GridError::Interrupted(_))
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            FlowError::Cancelled
                | FlowError::Action(ActionError::Interrupted(_))
                | FlowError::Grid(GridError::Interrupted(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_layers_count_as_cancellation() {
        let err: FlowError = ActionError::Interrupted("stop".into()).into();
        assert!(err.is_cancelled());
        assert!(err.is_fatal());

        let err: FlowError = GridError::ExtractionFailure("no rows".into()).into();
        assert!(!err.is_cancelled());
        assert!(!err.is_fatal());
    }

    #[test]
    fn navigation_is_fatal() {
        let err = FlowError::Navigation {
            step_id: "n1".into(),
            reason: "dns".into(),
        };
        assert!(err.is_fatal());
        assert_eq!(err.severity(), 2);
        assert!(err.to_string().contains("n1"));
    }

    #[test]
    fn missing_definition_is_a_step_level_failure() {
        let err = FlowError::MissingDefinition("grid-7".into());
        assert!(!err.is_fatal());
        assert!(!err.is_retryable());
        assert_eq!(err.severity(), 1);
        assert!(err.to_string().contains("grid-7"));
    }
}
