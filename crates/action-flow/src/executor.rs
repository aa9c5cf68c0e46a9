//! Step tree executor

use std::sync::Arc;

use action_locator::{ActionPerformer, ActionRequest, SmartColumn};
use action_primitives::{resolve_frame, ActionError, ActionKind, ExecCtx, ReplaySettings};
use async_recursion::async_recursion;
use async_trait::async_trait;
use flowreplay_core_types::SessionId;
use flowreplay_event_bus::{ReplayEvent, ReplayEventKind, StatusDispatcher};
use grid_extract::{ExtractDefinition, ExtractedRow, GridError, GridExtractor};
use serde_json::Value;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::FlowError;
use crate::strategies::{DefaultFailureHandler, FailureHandler, FailureHandlerResult, FailureScope};
use crate::transform::substitute_placeholders;
use crate::types::*;

/// Flow executor trait
#[async_trait]
pub trait FlowExecutor: Send + Sync {
    /// Replay a step tree. Step failures end up in the report; `Err` only for
    /// a tree that cannot run at all.
    async fn execute(
        &self,
        tree: StepTree,
        session: SessionId,
        cancel: CancellationToken,
    ) -> Result<ReplayReport, FlowError>;

    fn validate(&self, tree: &StepTree) -> Result<(), FlowError>;
}

/// What the enclosing sequence does after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Next,
    /// Drop the remaining children of the current data loop row
    SkipRow,
}

/// Default flow executor implementation
pub struct DefaultFlowExecutor {
    performer: Arc<ActionPerformer>,
    extractor: GridExtractor,
    failure_handler: Arc<dyn FailureHandler>,
    dispatcher: Option<Arc<StatusDispatcher>>,
    settings: ReplaySettings,
    strategy: FailureStrategy,
    flow_id: Option<String>,
}

impl DefaultFlowExecutor {
    pub fn new(performer: ActionPerformer) -> Self {
        let settings = performer.settings().clone();
        Self {
            extractor: GridExtractor::new(performer.driver().clone(), &settings),
            performer: Arc::new(performer),
            failure_handler: Arc::new(DefaultFailureHandler::new()),
            dispatcher: None,
            settings,
            strategy: FailureStrategy::default(),
            flow_id: None,
        }
    }

    pub fn with_failure_handler(mut self, handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = handler;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<StatusDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_flow_id(mut self, flow_id: impl Into<String>) -> Self {
        self.flow_id = Some(flow_id.into());
        self
    }

    async fn emit(
        &self,
        ctx: &ReplayContext,
        kind: ReplayEventKind,
        step_id: Option<&str>,
        message: impl Into<String>,
    ) {
        let Some(dispatcher) = &self.dispatcher else {
            return;
        };
        let mut event = ReplayEvent::new(ctx.session.clone(), kind, message);
        if let Some(step_id) = step_id {
            event = event.with_step(step_id);
        }
        if let Some(row) = ctx.current_row_index() {
            event = event.with_row(row);
        }
        dispatcher.emit(event).await;
    }

    async fn pace(&self) {
        if !self.settings.pacing.is_zero() {
            sleep(self.settings.pacing).await;
        }
    }

    /// Run the children of `parent_id` in capture order
    #[async_recursion]
    async fn run_children(
        &self,
        parent_id: &str,
        ctx: &mut ReplayContext,
        cancel: &CancellationToken,
        report: &mut ReplayReport,
    ) -> Result<Control, FlowError> {
        let tree = ctx.tree.clone();
        let children: Vec<&Step> = tree.children(parent_id).collect();
        self.run_sequence(&children, ctx, cancel, report).await
    }

    async fn run_sequence(
        &self,
        steps: &[&Step],
        ctx: &mut ReplayContext,
        cancel: &CancellationToken,
        report: &mut ReplayReport,
    ) -> Result<Control, FlowError> {
        for step in steps {
            if self.run_step(step, ctx, cancel, report).await? == Control::SkipRow {
                return Ok(Control::SkipRow);
            }
        }
        Ok(Control::Next)
    }

    /// Execute one step node
    #[async_recursion]
    async fn run_step(
        &self,
        step: &Step,
        ctx: &mut ReplayContext,
        cancel: &CancellationToken,
        report: &mut ReplayReport,
    ) -> Result<Control, FlowError> {
        if cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        info!(step_id = %step.id, kind = %step.kind, "step: {}", step.display_name());

        let result = StepResult::new(&step.id, step.kind.clone(), ctx.current_row_index());
        match &step.kind {
            StepKind::Navigate => {
                self.emit(ctx, ReplayEventKind::StepStarted, Some(&step.id), "navigate").await;
                ctx.clear_filtered_rows();
                let outcome = self.navigate(step, cancel).await;
                self.settle(step, ctx, result, outcome, report).await
            }
            StepKind::UiAction => {
                self.emit(ctx, ReplayEventKind::StepStarted, Some(&step.id), step.display_name())
                    .await;
                self.pace().await;
                let mut result = result;
                let outcome = self.ui_action(step, ctx, cancel, &mut result).await;
                if outcome.is_ok() && result.recovered() {
                    let message = format!(
                        "recovered with {}",
                        result.selector.as_deref().unwrap_or_default()
                    );
                    self.emit(ctx, ReplayEventKind::SelectorRecovered, Some(&step.id), message)
                        .await;
                }
                self.settle(step, ctx, result, outcome, report).await
            }
            StepKind::GridExtract => {
                ctx.register_definition(&step.id, step.grid.clone());
                info!(step_id = %step.id, grid = %step.grid.grid_selector, "registered grid definition");
                report.steps.push(result.succeed());
                Ok(Control::Next)
            }
            StepKind::Loop => {
                let control = self.run_children(&step.id, ctx, cancel, report).await?;
                report.steps.push(result.with_iterations(1).succeed());
                Ok(control)
            }
            StepKind::CounterLoop => {
                let count = step.count.unwrap_or(1);
                let mut control = Control::Next;
                for iteration in 0..count {
                    if cancel.is_cancelled() {
                        return Err(FlowError::Cancelled);
                    }
                    info!(step_id = %step.id, iteration = iteration + 1, count, "counter loop iteration");
                    control = self.run_children(&step.id, ctx, cancel, report).await?;
                    if control == Control::SkipRow {
                        break;
                    }
                }
                report.steps.push(result.with_iterations(count as usize).succeed());
                Ok(control)
            }
            StepKind::DataLoop | StepKind::GridLoop => {
                self.data_loop(step, ctx, cancel, report, result).await
            }
            StepKind::Unknown(raw) => {
                warn!(step_id = %step.id, kind = %raw, "unknown step type, skipped");
                Ok(Control::Next)
            }
        }
    }

    /// Record the outcome of a navigate or uiAction step and apply the failure policy
    async fn settle(
        &self,
        step: &Step,
        ctx: &ReplayContext,
        result: StepResult,
        outcome: Result<(), FlowError>,
        report: &mut ReplayReport,
    ) -> Result<Control, FlowError> {
        let err = match outcome {
            Ok(()) => {
                self.emit(ctx, ReplayEventKind::StepSucceeded, Some(&step.id), "ok").await;
                report.steps.push(result.succeed());
                return Ok(Control::Next);
            }
            Err(err) => err,
        };

        if err.is_cancelled() {
            report.steps.push(result.fail(&err));
            return Err(err);
        }
        self.emit(ctx, ReplayEventKind::StepFailed, Some(&step.id), err.to_string())
            .await;
        report.steps.push(result.fail(&err));

        let scope = match ctx.current_row_index() {
            Some(row) => FailureScope::Row(row),
            None => FailureScope::Flow,
        };
        match self
            .failure_handler
            .handle_failure(&step.id, self.strategy, scope, &err)
            .await
        {
            FailureHandlerResult::Abort(_) => Err(err),
            FailureHandlerResult::Continue(_) => Ok(Control::Next),
            FailureHandlerResult::SkipRow(_) => Ok(Control::SkipRow),
        }
    }

    async fn navigate(&self, step: &Step, cancel: &CancellationToken) -> Result<(), FlowError> {
        let url = step
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| FlowError::Navigation {
                step_id: step.id.clone(),
                reason: "navigate step without url".to_string(),
            })?;
        let exec = ExecCtx::new(step.id.clone(), cancel.clone());
        match self.performer.primitives().navigate(&exec, url).await {
            Ok(()) => {
                self.pace().await;
                Ok(())
            }
            Err(ActionError::Interrupted(_)) => Err(FlowError::Cancelled),
            Err(err) => Err(FlowError::Navigation {
                step_id: step.id.clone(),
                reason: err.to_string(),
            }),
        }
    }

    async fn ui_action(
        &self,
        step: &Step,
        ctx: &ReplayContext,
        cancel: &CancellationToken,
        result: &mut StepResult,
    ) -> Result<(), FlowError> {
        let action = step.action_kind()?;
        let raw = match action {
            ActionKind::Press => step
                .key
                .as_deref()
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| step.raw_value()),
            _ => step.raw_value(),
        };
        let value = substitute_placeholders(
            raw,
            ctx.current_row_data(),
            step.transform_type.as_deref(),
            step.transform.as_deref(),
        );

        let smart_column = if step.is_smart_column {
            match ctx.current_row() {
                Some(row) => Some(SmartColumn {
                    row: row.locator.clone(),
                    column_index: step.column_index.unwrap_or_default(),
                }),
                None => {
                    warn!(step_id = %step.id, "smart column step outside a data loop");
                    None
                }
            }
        } else {
            None
        };

        let step_json = serde_json::to_value(step).unwrap_or(Value::Null);
        let request = ActionRequest::new(
            step.id.clone(),
            action,
            step.selector.clone().unwrap_or_default(),
        )
        .with_value(value)
        .with_candidates(step.selectors.clone())
        .with_metadata(step.element.clone())
        .with_bounding_box(step.bounding_box)
        .with_frame_url(step.frame_url.clone())
        .with_smart_column(smart_column)
        .with_step_json(ctx.flow_id.clone(), step_json);

        let exec = ExecCtx::new(step.id.clone(), cancel.clone());
        let outcome = self.performer.perform(&exec, &request).await?;
        debug!(
            step_id = %step.id,
            selector = %outcome.report.selector,
            stage = %outcome.stage,
            "action performed"
        );

        result.selector = Some(outcome.report.selector.clone());
        result.stage = Some(outcome.stage);
        result.action_report = Some(outcome.report);
        Ok(())
    }

    /// Definition named by `source`, else the grid fields inline on the step
    fn loop_definition(
        &self,
        step: &Step,
        ctx: &ReplayContext,
    ) -> Result<(String, ExtractDefinition), FlowError> {
        if let Some(source) = step.source.as_deref().filter(|s| !s.is_empty()) {
            return ctx
                .definition(source)
                .cloned()
                .map(|def| (source.to_string(), def))
                .ok_or_else(|| FlowError::MissingDefinition(source.to_string()));
        }
        if step.grid.is_defined() {
            return Ok((step.id.clone(), step.grid.clone()));
        }
        Err(FlowError::MissingDefinition(step.id.clone()))
    }

    async fn extract_rows(
        &self,
        step: &Step,
        source: &str,
        definition: &ExtractDefinition,
        ctx: &mut ReplayContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtractedRow>, FlowError> {
        let exec = ExecCtx::new(step.id.clone(), cancel.clone());
        let extracted = match resolve_frame(
            self.performer.driver().as_ref(),
            step.frame_url.as_deref(),
        )
        .await
        {
            Ok(frame) => self.extractor.extract(&exec, definition, &frame).await,
            Err(err) => Err(GridError::from(err)),
        };
        let grid = match extracted {
            Ok(grid) => grid,
            Err(GridError::Interrupted(_)) => return Err(FlowError::Cancelled),
            Err(err) => return Err(FlowError::from(err)),
        };

        info!(
            step_id = %step.id,
            source = %source,
            rows = grid.rows.len(),
            total = grid.total_rows,
            "starting data loop"
        );
        ctx.set_filtered_rows(source, grid.rows.clone());
        Ok(grid.rows)
    }

    async fn data_loop(
        &self,
        step: &Step,
        ctx: &mut ReplayContext,
        cancel: &CancellationToken,
        report: &mut ReplayReport,
        result: StepResult,
    ) -> Result<Control, FlowError> {
        let (source, definition) = match self.loop_definition(step, ctx) {
            Ok(found) => found,
            Err(err) => {
                warn!(step_id = %step.id, error = %err, "data loop skipped");
                report.steps.push(result.with_iterations(0).fail(&err));
                return Ok(Control::Next);
            }
        };

        // Loops nested in a data loop iterate the rows their source already produced.
        let cached = if ctx.in_data_loop() {
            ctx.filtered_rows(&source).map(<[ExtractedRow]>::to_vec)
        } else {
            None
        };
        let rows = match cached {
            Some(rows) => {
                debug!(
                    step_id = %step.id,
                    source = %source,
                    rows = rows.len(),
                    "reusing extracted rows"
                );
                rows
            }
            None => match self.extract_rows(step, &source, &definition, ctx, cancel).await {
                Ok(rows) => rows,
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    warn!(step_id = %step.id, error = %err, "extraction failed, loop has no rows");
                    self.emit(ctx, ReplayEventKind::StepFailed, Some(&step.id), err.to_string())
                        .await;
                    report.steps.push(result.with_iterations(0).fail(&err));
                    return Ok(Control::Next);
                }
            },
        };

        for (index, row) in rows.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(FlowError::Cancelled);
            }
            ctx.enter_row(RowContext::from_extracted(index, row));
            self.emit(
                ctx,
                ReplayEventKind::RowStarted,
                Some(&step.id),
                format!("row {}", index + 1),
            )
            .await;
            let outcome = self.run_children(&step.id, ctx, cancel, report).await;
            if let Ok(Control::SkipRow) = outcome {
                self.emit(
                    ctx,
                    ReplayEventKind::RowFailed,
                    Some(&step.id),
                    format!("row {} skipped after a failed step", index + 1),
                )
                .await;
            }
            ctx.exit_row();
            outcome?;
        }

        report.steps.push(result.with_iterations(rows.len()).succeed());
        Ok(Control::Next)
    }
}

#[async_trait]
impl FlowExecutor for DefaultFlowExecutor {
    async fn execute(
        &self,
        tree: StepTree,
        session: SessionId,
        cancel: CancellationToken,
    ) -> Result<ReplayReport, FlowError> {
        self.validate(&tree)?;

        let tree = Arc::new(tree);
        let mut ctx = ReplayContext::new(session.clone(), tree.clone())
            .with_flow_id(self.flow_id.clone());
        let mut report = ReplayReport::new(session, self.flow_id.clone());
        info!(session = %ctx.session, steps = tree.len(), "replay started");
        self.emit(&ctx, ReplayEventKind::ReplayStarted, None, "replay started")
            .await;

        let roots: Vec<&Step> = tree.roots().collect();
        match self.run_sequence(&roots, &mut ctx, &cancel, &mut report).await {
            Ok(_) => {}
            Err(err) if err.is_cancelled() => {
                info!(session = %ctx.session, "replay cancelled");
                report.cancelled = true;
            }
            Err(err) => {
                warn!(session = %ctx.session, error = %err, "replay aborted");
                report.error = Some(err.to_string());
            }
        }

        let report = report.finish();
        let (kind, message) = if report.cancelled {
            (ReplayEventKind::ReplayCancelled, "replay cancelled".to_string())
        } else {
            (
                ReplayEventKind::ReplayFinished,
                format!("replay finished, success={}", report.success),
            )
        };
        self.emit(&ctx, kind, None, message).await;
        info!(
            session = %report.session,
            success = report.success,
            steps = report.steps.len(),
            latency_ms = report.latency_ms,
            "replay complete"
        );
        Ok(report)
    }

    fn validate(&self, tree: &StepTree) -> Result<(), FlowError> {
        tree.validate()
    }
}
