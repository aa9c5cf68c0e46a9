//! One recorded UI action, with the ordered recovery chain

use std::sync::Arc;

use action_primitives::{
    column_cell_selector, poll_for_matches, resolve_frame, ActionError, ActionKind,
    ActionPrimitives, ActionReport, DefaultActionPrimitives, ExecCtx, ReplaySettings,
    SelfHealInfo, CELL_CLICK_TARGETS, CELL_INPUT_TARGETS,
};
use cdp_adapter::{FrameTarget, Locator, PageDriver};
use flowreplay_core_types::BoundingBox;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::generator::CandidateGenerator;
use crate::healer::{recovery_candidates, AttemptLog, RecoveryChain, RecoveryStage};
use crate::remote::{RecoveryConfirmation, RecoveryRequest, RecoveryService};
use crate::types::{ElementMetadata, MatchFailureReason, SelectorCandidate};
use crate::validator::{rank, SelectorValidator};

/// Cached row locator of the current data-loop iteration
#[derive(Clone, Debug, PartialEq)]
pub struct SmartColumn {
    pub row: Locator,
    pub column_index: usize,
}

/// Everything the performer needs to know about one uiAction step
#[derive(Clone, Debug)]
pub struct ActionRequest {
    pub step_id: String,
    pub flow_id: Option<String>,
    pub action: ActionKind,
    pub selector: String,
    pub candidates: Vec<SelectorCandidate>,
    pub metadata: ElementMetadata,
    /// Value after placeholder substitution
    pub value: String,
    pub bounding_box: Option<BoundingBox>,
    pub frame_url: Option<String>,
    pub smart_column: Option<SmartColumn>,
    /// Recorded step, forwarded to the remote recovery service
    pub step_json: Value,
}

impl ActionRequest {
    pub fn new(step_id: impl Into<String>, action: ActionKind, selector: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            flow_id: None,
            action,
            selector: selector.into(),
            candidates: Vec::new(),
            metadata: ElementMetadata::default(),
            value: String::new(),
            bounding_box: None,
            frame_url: None,
            smart_column: None,
            step_json: Value::Null,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<SelectorCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_metadata(mut self, metadata: ElementMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_bounding_box(mut self, bounding_box: Option<BoundingBox>) -> Self {
        self.bounding_box = bounding_box;
        self
    }

    pub fn with_frame_url(mut self, frame_url: Option<String>) -> Self {
        self.frame_url = frame_url;
        self
    }

    pub fn with_smart_column(mut self, smart_column: Option<SmartColumn>) -> Self {
        self.smart_column = smart_column;
        self
    }

    pub fn with_step_json(mut self, flow_id: Option<String>, step_json: Value) -> Self {
        self.flow_id = flow_id;
        self.step_json = step_json;
        self
    }

    /// Recorded selector, else the first recorded candidate
    pub fn primary_selector(&self) -> &str {
        let selector = self.selector.trim();
        if !selector.is_empty() {
            return selector;
        }
        self.candidates
            .first()
            .map(|c| c.selector.trim())
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug)]
pub struct ActionOutcome {
    pub report: ActionReport,
    pub stage: RecoveryStage,
}

pub struct ActionPerformer {
    driver: Arc<dyn PageDriver>,
    primitives: Arc<dyn ActionPrimitives>,
    validator: SelectorValidator,
    generator: CandidateGenerator,
    recovery: Option<Arc<dyn RecoveryService>>,
    chain: RecoveryChain,
    settings: ReplaySettings,
}

impl ActionPerformer {
    pub fn new(driver: Arc<dyn PageDriver>, settings: ReplaySettings) -> Self {
        Self {
            primitives: Arc::new(DefaultActionPrimitives::new(driver.clone(), &settings)),
            driver,
            validator: SelectorValidator::new(settings.bbox_threshold),
            generator: CandidateGenerator::new(),
            recovery: None,
            chain: RecoveryChain::default(),
            settings,
        }
    }

    pub fn with_recovery(mut self, service: Arc<dyn RecoveryService>) -> Self {
        self.recovery = Some(service);
        self
    }

    pub fn with_primitives(mut self, primitives: Arc<dyn ActionPrimitives>) -> Self {
        self.primitives = primitives;
        self
    }

    pub fn with_chain(mut self, chain: RecoveryChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn driver(&self) -> &Arc<dyn PageDriver> {
        &self.driver
    }

    pub fn primitives(&self) -> &Arc<dyn ActionPrimitives> {
        &self.primitives
    }

    pub fn settings(&self) -> &ReplaySettings {
        &self.settings
    }

    pub async fn perform(
        &self,
        ctx: &ExecCtx,
        request: &ActionRequest,
    ) -> Result<ActionOutcome, ActionError> {
        if ctx.is_cancelled() {
            return Err(ActionError::Interrupted("Context cancelled".to_string()));
        }

        if let Some(smart) = &request.smart_column {
            match self.perform_in_cell(ctx, request, smart).await {
                Ok(report) => {
                    return Ok(ActionOutcome {
                        report,
                        stage: RecoveryStage::Direct,
                    })
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => warn!(
                    step_id = %request.step_id,
                    column = smart.column_index,
                    error = %err,
                    "cell target unavailable, falling back to the recorded selector"
                ),
            }
        }

        let frame = resolve_frame(self.driver.as_ref(), request.frame_url.as_deref()).await?;
        let selector = request.primary_selector().to_string();
        if request.action == ActionKind::Press && selector.is_empty() {
            let report = self
                .primitives
                .act(ctx, &Locator::new("").in_frame(frame), request.action, &request.value)
                .await?;
            return Ok(ActionOutcome {
                report,
                stage: RecoveryStage::Direct,
            });
        }
        self.discovery_precheck(request, &frame).await;

        let mut log = AttemptLog::default();
        for stage in self.chain.stages() {
            if ctx.is_cancelled() {
                return Err(ActionError::Interrupted("Context cancelled".to_string()));
            }
            let found = match stage {
                RecoveryStage::Direct | RecoveryStage::SameFrameRetry => {
                    if selector.is_empty() {
                        None
                    } else {
                        self.try_selector(ctx, request, &selector, &frame, false, &mut log)
                            .await?
                            .map(|report| (report, None))
                    }
                }
                RecoveryStage::CrossFrame => {
                    self.try_other_frames(ctx, request, &selector, &frame, &mut log)
                        .await?
                }
                RecoveryStage::Regenerated => {
                    self.try_regenerated(ctx, request, &selector, &frame, &mut log)
                        .await?
                }
                RecoveryStage::Remote => {
                    self.try_remote(ctx, request, &selector, &frame, &mut log)
                        .await?
                }
            };

            if let Some((report, score)) = found {
                let report = if stage.is_recovery() {
                    info!(
                        step_id = %request.step_id,
                        stage = %stage,
                        original = %selector,
                        healed = %report.selector,
                        "selector recovered"
                    );
                    let heal = SelfHealInfo {
                        original_selector: selector.clone(),
                        healed_selector: report.selector.clone(),
                        stage: stage.as_str().to_string(),
                        score,
                    };
                    report.with_heal(heal)
                } else {
                    report
                };
                return Ok(ActionOutcome {
                    report,
                    stage: *stage,
                });
            }
            debug!(step_id = %request.step_id, stage = %stage, "recovery stage failed");
        }

        warn!(
            step_id = %request.step_id,
            selector = %selector,
            attempts = log.attempts(),
            "recovery chain exhausted"
        );
        Err(log.exhausted(request.action, &selector))
    }

    async fn perform_in_cell(
        &self,
        ctx: &ExecCtx,
        request: &ActionRequest,
        smart: &SmartColumn,
    ) -> Result<ActionReport, ActionError> {
        let cell = smart.row.child(column_cell_selector(smart.column_index));
        if self.driver.count(&cell).await? == 0 {
            return Err(ActionError::SelectorNotFound(cell.to_string()));
        }
        let cell = cell.first();

        let target = if request.action.is_input() {
            let input = cell.child(CELL_INPUT_TARGETS);
            if self.driver.count(&input).await? == 0 {
                return Err(ActionError::SelectorNotFound(input.to_string()));
            }
            input.first()
        } else {
            let clickable = cell.child(CELL_CLICK_TARGETS);
            if self.driver.count(&clickable).await? > 0 {
                clickable.first()
            } else {
                cell
            }
        };
        debug!(step_id = %request.step_id, target = %target, "acting on grid cell");
        self.primitives
            .act(ctx, &target, request.action, &request.value)
            .await
    }

    /// Log whether the recorded verified selector shows up; never fails the step
    async fn discovery_precheck(&self, request: &ActionRequest, frame: &FrameTarget) {
        let Some(verified) = request.candidates.iter().find(|c| c.verified) else {
            return;
        };
        let locator = Locator::new(verified.selector.clone()).in_frame(frame.clone());
        match poll_for_matches(
            self.driver.as_ref(),
            &locator,
            self.settings.discovery_attempts,
            self.settings.discovery_interval,
        )
        .await
        {
            Ok(0) => warn!(
                step_id = %request.step_id,
                selector = %verified.selector,
                "recorded verified selector not found on page"
            ),
            Ok(count) => debug!(
                step_id = %request.step_id,
                selector = %verified.selector,
                count,
                "recorded verified selector present"
            ),
            Err(err) => debug!(step_id = %request.step_id, error = %err, "discovery check failed"),
        }
    }

    async fn try_other_frames(
        &self,
        ctx: &ExecCtx,
        request: &ActionRequest,
        selector: &str,
        frame: &FrameTarget,
        log: &mut AttemptLog,
    ) -> Result<Option<(ActionReport, Option<i32>)>, ActionError> {
        if selector.is_empty() {
            return Ok(None);
        }
        let frames = match self.driver.frames().await {
            Ok(frames) => frames,
            Err(err) => return note(ActionError::from(err), log),
        };
        for other in frames.iter().filter(|info| &info.target != frame) {
            if let Some(report) = self
                .try_selector(ctx, request, selector, &other.target, true, log)
                .await?
            {
                return Ok(Some((report, None)));
            }
        }
        Ok(None)
    }

    async fn try_regenerated(
        &self,
        ctx: &ExecCtx,
        request: &ActionRequest,
        selector: &str,
        frame: &FrameTarget,
        log: &mut AttemptLog,
    ) -> Result<Option<(ActionReport, Option<i32>)>, ActionError> {
        let mut candidates = recovery_candidates(
            &self.generator,
            &request.metadata,
            &request.candidates,
            selector,
        );
        self.validator
            .validate_all(
                self.driver.as_ref(),
                frame,
                &mut candidates,
                request.bounding_box.as_ref(),
            )
            .await;
        rank(&mut candidates);

        for candidate in &candidates {
            if ctx.is_cancelled() {
                return Err(ActionError::Interrupted("Context cancelled".to_string()));
            }
            let report = match (&candidate.match_failure_reason, candidate.match_index) {
                (Some(MatchFailureReason::NoMatch), _)
                | (Some(MatchFailureReason::Error(_)), _) => continue,
                (_, Some(index)) => {
                    let locator = Locator::new(candidate.selector.clone())
                        .in_frame(frame.clone())
                        .nth(index);
                    self.try_locator(ctx, request, &locator, log).await?
                }
                _ => {
                    self.try_selector(ctx, request, &candidate.selector, frame, true, log)
                        .await?
                }
            };
            if let Some(report) = report {
                return Ok(Some((report, Some(candidate.score))));
            }
        }
        Ok(None)
    }

    async fn try_remote(
        &self,
        ctx: &ExecCtx,
        request: &ActionRequest,
        selector: &str,
        frame: &FrameTarget,
        log: &mut AttemptLog,
    ) -> Result<Option<(ActionReport, Option<i32>)>, ActionError> {
        let Some(service) = &self.recovery else {
            debug!(step_id = %request.step_id, "remote recovery not configured");
            return Ok(None);
        };
        let remote_request = RecoveryRequest {
            flow_id: request.flow_id.clone(),
            step_id: request.step_id.clone(),
            step: request.step_json.clone(),
        };
        let suggestions = match service.suggest(&remote_request).await {
            Ok(suggestions) => suggestions,
            Err(err) => {
                warn!(step_id = %request.step_id, error = %err, "remote recovery failed");
                return note(ActionError::from(err), log);
            }
        };

        for suggestion in suggestions {
            if let Some(report) = self
                .try_selector(ctx, request, &suggestion.selector, frame, true, log)
                .await?
            {
                let confirmation = RecoveryConfirmation {
                    flow_id: request.flow_id.clone(),
                    step_id: request.step_id.clone(),
                    original_selector: selector.to_string(),
                    improved_selector: suggestion.selector.clone(),
                };
                if let Err(err) = service.confirm(&confirmation).await {
                    warn!(step_id = %request.step_id, error = %err, "could not confirm recovered selector");
                }
                return Ok(Some((report, Some(suggestion.score))));
            }
        }
        Ok(None)
    }

    /// Resolve `selector` in `frame` and act on it. With `require_match` the
    /// selector is counted first and skipped when absent, without the readiness wait.
    async fn try_selector(
        &self,
        ctx: &ExecCtx,
        request: &ActionRequest,
        selector: &str,
        frame: &FrameTarget,
        require_match: bool,
        log: &mut AttemptLog,
    ) -> Result<Option<ActionReport>, ActionError> {
        let base = Locator::new(selector.to_string()).in_frame(frame.clone());
        let count = match self.driver.count(&base).await {
            Ok(count) => count,
            Err(err) => return note(ActionError::from(err), log),
        };
        if require_match && count == 0 {
            return note(ActionError::SelectorNotFound(base.to_string()), log);
        }
        let locator = match self
            .disambiguate(base, count, request.bounding_box.as_ref())
            .await
        {
            Ok(locator) => locator,
            Err(err) => return note(err, log),
        };
        self.try_locator(ctx, request, &locator, log).await
    }

    async fn try_locator(
        &self,
        ctx: &ExecCtx,
        request: &ActionRequest,
        locator: &Locator,
        log: &mut AttemptLog,
    ) -> Result<Option<ActionReport>, ActionError> {
        match self
            .primitives
            .act(ctx, locator, request.action, &request.value)
            .await
        {
            Ok(report) => Ok(Some(report.with_match_index(locator.nth))),
            Err(err) => note(err, log),
        }
    }

    async fn disambiguate(
        &self,
        locator: Locator,
        count: usize,
        recorded: Option<&BoundingBox>,
    ) -> Result<Locator, ActionError> {
        if count <= 1 {
            return Ok(locator);
        }
        match recorded {
            Some(recorded) => {
                match self
                    .validator
                    .best_overlap(self.driver.as_ref(), &locator, count, recorded)
                    .await?
                {
                    Some((index, iou)) => {
                        debug!(locator = %locator, index, iou, "picked match by recorded geometry");
                        Ok(locator.nth(index))
                    }
                    None => Err(ActionError::AmbiguousMatch {
                        selector: locator.to_string(),
                        matches: count,
                    }),
                }
            }
            None if self.settings.strict_ambiguity => Err(ActionError::AmbiguousMatch {
                selector: locator.to_string(),
                matches: count,
            }),
            None => Ok(locator.first()),
        }
    }
}

/// Record a recoverable failure, or stop the chain on a fatal one
fn note<T>(err: ActionError, log: &mut AttemptLog) -> Result<Option<T>, ActionError> {
    if err.is_retryable() {
        debug!(error = %err, "attempt failed");
        log.record(err);
        Ok(None)
    } else {
        Err(err)
    }
}
