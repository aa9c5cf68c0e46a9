//! Ordered recovery chain for failed element actions

use std::fmt;

use action_primitives::{ActionError, ActionKind};
use serde::{Deserialize, Serialize};

use crate::generator::{dedupe, CandidateGenerator};
use crate::types::{ElementMetadata, SelectorCandidate};

/// One link of the recovery chain, in the order it is tried
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryStage {
    /// Recorded selector in the recorded frame
    Direct,
    SameFrameRetry,
    /// Recorded selector in every other frame of the page
    CrossFrame,
    /// Fresh candidates from the captured metadata, validated and ranked
    Regenerated,
    /// Suggestions from the remote recovery service
    Remote,
}

impl RecoveryStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStage::Direct => "direct",
            RecoveryStage::SameFrameRetry => "same-frame-retry",
            RecoveryStage::CrossFrame => "cross-frame",
            RecoveryStage::Regenerated => "regenerated",
            RecoveryStage::Remote => "remote",
        }
    }

    pub fn is_recovery(&self) -> bool {
        *self != RecoveryStage::Direct
    }
}

impl fmt::Display for RecoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages applied in order; the first success ends the chain
#[derive(Clone, Debug, PartialEq)]
pub struct RecoveryChain {
    stages: Vec<RecoveryStage>,
}

impl Default for RecoveryChain {
    fn default() -> Self {
        Self {
            stages: vec![
                RecoveryStage::Direct,
                RecoveryStage::SameFrameRetry,
                RecoveryStage::CrossFrame,
                RecoveryStage::Regenerated,
                RecoveryStage::Remote,
            ],
        }
    }
}

impl RecoveryChain {
    pub fn new(stages: Vec<RecoveryStage>) -> Self {
        Self { stages }
    }

    /// Full chain without the remote stage
    pub fn local_only() -> Self {
        let mut chain = Self::default();
        chain.stages.retain(|stage| *stage != RecoveryStage::Remote);
        chain
    }

    pub fn stages(&self) -> &[RecoveryStage] {
        &self.stages
    }
}

/// Failed attempts across the chain
#[derive(Debug, Default)]
pub struct AttemptLog {
    attempts: usize,
    last_error: Option<ActionError>,
}

impl AttemptLog {
    pub fn record(&mut self, err: ActionError) {
        self.attempts += 1;
        self.last_error = Some(err);
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&ActionError> {
        self.last_error.as_ref()
    }

    pub fn exhausted(self, action: ActionKind, selector: &str) -> ActionError {
        ActionError::RecoveryExhausted {
            action: action.name().to_string(),
            selector: selector.to_string(),
            attempts: self.attempts,
            last_error: self
                .last_error
                .map(|err| err.to_string())
                .unwrap_or_else(|| "no recovery strategy applied".to_string()),
        }
    }
}

/// Candidates for the regenerated stage: generated from the captured metadata,
/// merged with the recorded list, without the selector that already failed.
pub fn recovery_candidates(
    generator: &CandidateGenerator,
    metadata: &ElementMetadata,
    recorded: &[SelectorCandidate],
    failed_selector: &str,
) -> Vec<SelectorCandidate> {
    let mut merged = generator.generate_with_fallback(metadata, Some(failed_selector));
    merged.extend(recorded.iter().cloned().map(|mut candidate| {
        candidate.verified = false;
        candidate.replayable = false;
        candidate.match_failure_reason = None;
        candidate.match_index = None;
        candidate
    }));
    dedupe(merged)
        .into_iter()
        .filter(|candidate| candidate.selector != failed_selector)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CandidateSource;
    use std::collections::BTreeMap;

    #[test]
    fn default_chain_order() {
        assert_eq!(
            RecoveryChain::default().stages(),
            &[
                RecoveryStage::Direct,
                RecoveryStage::SameFrameRetry,
                RecoveryStage::CrossFrame,
                RecoveryStage::Regenerated,
                RecoveryStage::Remote,
            ]
        );
        assert!(!RecoveryChain::local_only()
            .stages()
            .contains(&RecoveryStage::Remote));
    }

    #[test]
    fn exhausted_error_names_action_and_selector() {
        let mut log = AttemptLog::default();
        log.record(ActionError::SelectorNotFound("#a".into()));
        log.record(ActionError::SelectorNotFound("#b".into()));
        match log.exhausted(ActionKind::Click, "#a") {
            ActionError::RecoveryExhausted {
                action,
                selector,
                attempts,
                last_error,
            } => {
                assert_eq!(action, "click");
                assert_eq!(selector, "#a");
                assert_eq!(attempts, 2);
                assert!(last_error.contains("#b"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn recovery_candidates_merge_and_drop_failed_selector() {
        let mut attributes = BTreeMap::new();
        attributes.insert("data-testid".to_string(), "submit".to_string());
        let meta = ElementMetadata {
            tag_name: Some("button".into()),
            element_id: Some("submit".into()),
            attributes,
            ..ElementMetadata::default()
        };
        let mut recorded = SelectorCandidate::new("form .send", CandidateSource::DevTools, 50);
        recorded.verified = true;
        recorded.replayable = true;

        let candidates =
            recovery_candidates(&CandidateGenerator::new(), &meta, &[recorded], "#submit");
        assert!(candidates.iter().all(|c| c.selector != "#submit"));
        let kept = candidates
            .iter()
            .find(|c| c.selector == "form .send")
            .unwrap();
        assert!(!kept.replayable);
        assert!(candidates
            .iter()
            .any(|c| c.selector == "[data-testid=\"submit\"]"));
    }
}
