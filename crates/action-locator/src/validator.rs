//! Live validation and ranking of selector candidates

use cdp_adapter::{FrameTarget, Locator, PageDriver};
use flowreplay_core_types::{overlap, BoundingBox};
use tracing::debug;

use crate::errors::LocatorError;
use crate::types::{MatchFailureReason, SelectorCandidate};

pub const DEFAULT_BBOX_THRESHOLD: f64 = 0.7;

pub struct SelectorValidator {
    pub threshold: f64,
}

impl Default for SelectorValidator {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_BBOX_THRESHOLD,
        }
    }
}

impl SelectorValidator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Validate one candidate in `frame` and apply the outcome to it
    pub async fn validate(
        &self,
        driver: &dyn PageDriver,
        frame: &FrameTarget,
        candidate: &mut SelectorCandidate,
        recorded: Option<&BoundingBox>,
    ) -> MatchFailureReason {
        let (reason, index) = match self.classify(driver, frame, candidate, recorded).await {
            Ok(outcome) => outcome,
            Err(err) => (MatchFailureReason::Error(err.to_string()), None),
        };
        debug!(
            selector = %candidate.selector,
            frame = %frame,
            reason = %reason,
            "validated candidate"
        );
        candidate.apply_outcome(reason.clone(), index);
        reason
    }

    pub async fn validate_all(
        &self,
        driver: &dyn PageDriver,
        frame: &FrameTarget,
        candidates: &mut [SelectorCandidate],
        recorded: Option<&BoundingBox>,
    ) {
        for candidate in candidates.iter_mut() {
            self.validate(driver, frame, candidate, recorded).await;
        }
    }

    async fn classify(
        &self,
        driver: &dyn PageDriver,
        frame: &FrameTarget,
        candidate: &SelectorCandidate,
        recorded: Option<&BoundingBox>,
    ) -> Result<(MatchFailureReason, Option<usize>), LocatorError> {
        let locator = Locator::new(candidate.selector.clone()).in_frame(frame.clone());
        let matches = driver.count(&locator).await?;

        match matches {
            0 => Ok((MatchFailureReason::NoMatch, None)),
            1 => {
                let state = driver.element_state(&locator.first()).await?;
                if !state.visible {
                    return Ok((MatchFailureReason::NotVisible, None));
                }
                if !state.enabled {
                    return Ok((MatchFailureReason::Disabled, None));
                }
                if let (true, Some(recorded)) = (candidate.source.is_id(), recorded) {
                    let Some(live) = state.bounding_box else {
                        return Ok((MatchFailureReason::BboxError, None));
                    };
                    if overlap(Some(recorded), Some(&live)) < self.threshold {
                        return Ok((MatchFailureReason::BboxMismatch, None));
                    }
                }
                Ok((MatchFailureReason::MaybeOk, None))
            }
            _ => {
                let Some(recorded) = recorded else {
                    return Ok((MatchFailureReason::MultipleMatch, None));
                };
                match self
                    .best_overlap(driver, &locator, matches, recorded)
                    .await?
                {
                    Some((index, _)) => Ok((MatchFailureReason::MultipleMatchResolved, Some(index))),
                    None => Ok((MatchFailureReason::MultipleMatch, None)),
                }
            }
        }
    }

    /// Arg-max overlap across `matches` elements, only when above the threshold
    pub async fn best_overlap(
        &self,
        driver: &dyn PageDriver,
        locator: &Locator,
        matches: usize,
        recorded: &BoundingBox,
    ) -> Result<Option<(usize, f64)>, LocatorError> {
        let mut best: Option<(usize, f64)> = None;
        for index in 0..matches {
            let state = driver.element_state(&locator.clone().nth(index)).await?;
            let score = overlap(Some(recorded), state.bounding_box.as_ref());
            if best.map_or(true, |(_, current)| score > current) {
                best = Some((index, score));
            }
        }
        Ok(best.filter(|(_, score)| *score > self.threshold))
    }
}

/// Stable sort by (replayable desc, score desc)
pub fn rank(candidates: &mut [SelectorCandidate]) {
    candidates.sort_by(|a, b| {
        b.replayable
            .cmp(&a.replayable)
            .then_with(|| b.score.cmp(&a.score))
    });
}
