//! Error types for action primitives

use cdp_adapter::{AdapterError, AdapterErrorKind};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActionError {
    /// Zero live matches for the locator
    #[error("Selector not found: {0}")]
    SelectorNotFound(String),

    /// Matched element stayed hidden or disabled past the readiness ceiling
    #[error("Element not interactable: {0}")]
    ElementNotInteractable(String),

    /// Several matches and no geometry to pick one
    #[error("Ambiguous match for '{selector}': {matches} elements")]
    AmbiguousMatch { selector: String, matches: usize },

    /// Every local and remote recovery strategy failed
    #[error("Recovery exhausted for {action} on '{selector}' after {attempts} attempts: {last_error}")]
    RecoveryExhausted {
        action: String,
        selector: String,
        attempts: usize,
        last_error: String,
    },

    /// Dropdown option was not found
    #[error("Option not found in dropdown: {0}")]
    OptionNotFound(String),

    /// Navigation failed
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// Cancelled by the stop signal
    #[error("Operation interrupted: {0}")]
    Interrupted(String),

    /// Driver communication or protocol error
    #[error("CDP I/O error: {0}")]
    CdpIo(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ActionError {
    /// Whether the recovery chain should keep going after this error
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ActionError::Interrupted(_)
                | ActionError::RecoveryExhausted { .. }
                | ActionError::Navigation(_)
        )
    }

    /// Get error severity level (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            ActionError::Internal(_) => 3,
            ActionError::RecoveryExhausted { .. }
            | ActionError::Navigation(_)
            | ActionError::CdpIo(_) => 2,
            ActionError::SelectorNotFound(_)
            | ActionError::ElementNotInteractable(_)
            | ActionError::AmbiguousMatch { .. } => 1,
            _ => 0,
        }
    }

    /// Short machine-readable reason, used in step reports
    pub fn reason(&self) -> &'static str {
        match self {
            ActionError::SelectorNotFound(_) => "selector-not-found",
            ActionError::ElementNotInteractable(_) => "element-not-interactable",
            ActionError::AmbiguousMatch { .. } => "ambiguous-match",
            ActionError::RecoveryExhausted { .. } => "recovery-exhausted",
            ActionError::OptionNotFound(_) => "option-not-found",
            ActionError::Navigation(_) => "navigation",
            ActionError::Interrupted(_) => "interrupted",
            ActionError::CdpIo(_) => "cdp-io",
            ActionError::Internal(_) => "internal",
        }
    }
}

impl From<AdapterError> for ActionError {
    fn from(err: AdapterError) -> Self {
        let message = err.to_string();
        match err.kind {
            AdapterErrorKind::TargetNotFound => {
                ActionError::SelectorNotFound(err.hint.unwrap_or(message))
            }
            AdapterErrorKind::OptionNotFound => {
                ActionError::OptionNotFound(err.hint.unwrap_or(message))
            }
            AdapterErrorKind::Navigation => ActionError::Navigation(message),
            AdapterErrorKind::FrameUnavailable => ActionError::SelectorNotFound(message),
            AdapterErrorKind::CdpIo | AdapterErrorKind::Script => ActionError::CdpIo(message),
            AdapterErrorKind::Internal => ActionError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_errors_map_to_taxonomy() {
        let err: ActionError = AdapterError::new(AdapterErrorKind::TargetNotFound)
            .with_hint("#gone")
            .into();
        assert_eq!(err, ActionError::SelectorNotFound("#gone".to_string()));
        assert!(err.is_retryable());

        let err: ActionError = AdapterError::new(AdapterErrorKind::Navigation).into();
        assert!(!err.is_retryable());
        assert_eq!(err.severity(), 2);
    }

    #[test]
    fn exhausted_message_names_action_and_selector() {
        let err = ActionError::RecoveryExhausted {
            action: "click".into(),
            selector: "#submit".into(),
            attempts: 4,
            last_error: "no-match".into(),
        };
        let text = err.to_string();
        assert!(text.contains("click"));
        assert!(text.contains("#submit"));
        assert_eq!(err.reason(), "recovery-exhausted");
    }
}
