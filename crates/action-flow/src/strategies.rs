//! Failure handling strategies

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::FlowError;
use crate::types::FailureStrategy;

/// Where a failing step sits, which decides how far the failure reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureScope {
    /// Directly under the root or a non-data loop
    Flow,
    /// Inside a data loop iteration for this row
    Row(usize),
}

/// Failure handler trait
#[async_trait]
pub trait FailureHandler: Send + Sync {
    /// Handle step failure according to strategy
    async fn handle_failure(
        &self,
        step_id: &str,
        strategy: FailureStrategy,
        scope: FailureScope,
        error: &FlowError,
    ) -> FailureHandlerResult;
}

/// Result of failure handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureHandlerResult {
    /// Stop the entire replay
    Abort(String),

    /// Continue with the next sibling
    Continue(String),

    /// Drop the rest of this row's children; the loop moves on
    SkipRow(usize),
}

/// Default failure handler implementation
pub struct DefaultFailureHandler;

impl DefaultFailureHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DefaultFailureHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FailureHandler for DefaultFailureHandler {
    async fn handle_failure(
        &self,
        step_id: &str,
        strategy: FailureStrategy,
        scope: FailureScope,
        error: &FlowError,
    ) -> FailureHandlerResult {
        if error.is_fatal() {
            warn!(step_id, error = %error, "fatal step failure, aborting replay");
            return FailureHandlerResult::Abort(error.to_string());
        }

        if let FailureScope::Row(row) = scope {
            warn!(step_id, row, error = %error, "step failed, skipping the rest of the row");
            return FailureHandlerResult::SkipRow(row);
        }

        match strategy {
            FailureStrategy::Abort => {
                warn!(step_id, error = %error, "step failed, aborting replay");
                FailureHandlerResult::Abort(error.to_string())
            }
            FailureStrategy::Continue => {
                info!(step_id, error = %error, "step failed, continuing with next step");
                FailureHandlerResult::Continue(error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_primitives::ActionError;

    fn step_error() -> FlowError {
        FlowError::Action(ActionError::SelectorNotFound("#gone".into()))
    }

    #[test]
    fn policy_applies_outside_rows() {
        let handler = DefaultFailureHandler::new();
        let abort = tokio_test::block_on(handler.handle_failure(
            "s",
            FailureStrategy::Abort,
            FailureScope::Flow,
            &step_error(),
        ));
        assert!(matches!(abort, FailureHandlerResult::Abort(_)));

        let cont = tokio_test::block_on(handler.handle_failure(
            "s",
            FailureStrategy::Continue,
            FailureScope::Flow,
            &step_error(),
        ));
        assert!(matches!(cont, FailureHandlerResult::Continue(_)));
    }

    #[tokio::test]
    async fn rows_are_isolated_regardless_of_policy() {
        let handler = DefaultFailureHandler::new();
        let result = handler
            .handle_failure("s", FailureStrategy::Abort, FailureScope::Row(2), &step_error())
            .await;
        assert_eq!(result, FailureHandlerResult::SkipRow(2));
    }

    #[tokio::test]
    async fn navigation_always_aborts() {
        let handler = DefaultFailureHandler::new();
        let err = FlowError::Navigation {
            step_id: "n".into(),
            reason: "refused".into(),
        };
        let result = handler
            .handle_failure("n", FailureStrategy::Continue, FailureScope::Row(0), &err)
            .await;
        assert!(matches!(result, FailureHandlerResult::Abort(_)));
    }
}
