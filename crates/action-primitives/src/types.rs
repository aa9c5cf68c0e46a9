//! Core data types for action primitives

use std::time::Duration;

use cdp_adapter::{DomOperation, FrameTarget};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Execution context for one action
#[derive(Clone)]
pub struct ExecCtx {
    /// Step the action belongs to
    pub step_id: String,

    /// Cooperative stop signal for the whole replay
    pub cancel_token: CancellationToken,

    /// Unique identifier for this action
    pub action_id: String,
}

impl ExecCtx {
    pub fn new(step_id: impl Into<String>, cancel_token: CancellationToken) -> Self {
        Self {
            step_id: step_id.into(),
            cancel_token,
            action_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Recorded UI action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Click,
    #[serde(alias = "doubleclick")]
    Dblclick,
    #[serde(alias = "input")]
    Type,
    Change,
    #[serde(alias = "keypress", alias = "keydown")]
    Press,
    Select,
    Mousedown,
    Focus,
    Blur,
}

/// What the target must satisfy before the action runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Page-level action, no element wait
    None,
    Attached,
    /// Visible and enabled
    Interactable,
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Dblclick => "dblclick",
            ActionKind::Type => "type",
            ActionKind::Change => "change",
            ActionKind::Press => "press",
            ActionKind::Select => "select",
            ActionKind::Mousedown => "mousedown",
            ActionKind::Focus => "focus",
            ActionKind::Blur => "blur",
        }
    }

    pub fn readiness(&self) -> Readiness {
        match self {
            ActionKind::Click | ActionKind::Dblclick | ActionKind::Mousedown => {
                Readiness::Interactable
            }
            ActionKind::Type
            | ActionKind::Change
            | ActionKind::Select
            | ActionKind::Focus
            | ActionKind::Blur => Readiness::Attached,
            ActionKind::Press => Readiness::None,
        }
    }

    /// Actions that write into a form control rather than click it
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            ActionKind::Type | ActionKind::Change | ActionKind::Select
        )
    }

    /// DOM operation for element-level actions; `None` for `press`.
    pub fn dom_operation(&self, value: &str) -> Option<DomOperation> {
        Some(match self {
            ActionKind::Click => DomOperation::Click,
            ActionKind::Dblclick => DomOperation::DoubleClick,
            ActionKind::Type => DomOperation::Type(value.to_string()),
            ActionKind::Change => DomOperation::Fill(value.to_string()),
            ActionKind::Select => DomOperation::SelectOption(value.to_string()),
            ActionKind::Mousedown => DomOperation::DispatchEvent("mousedown".to_string()),
            ActionKind::Focus => DomOperation::DispatchEvent("focus".to_string()),
            ActionKind::Blur => DomOperation::DispatchEvent("blur".to_string()),
            ActionKind::Press => return None,
        })
    }
}

/// Clickable content inside a grid cell
pub const CELL_CLICK_TARGETS: &str = "a, button, [role='button'], [onclick]";

/// Editable content inside a grid cell
pub const CELL_INPUT_TARGETS: &str = "input, select, textarea";

/// Cell selector for a zero-based column index, scoped to a row
pub fn column_cell_selector(column_index: usize) -> String {
    let n = column_index + 1;
    format!(
        "td:nth-of-type({n}), [role='cell']:nth-of-type({n}), div[role='gridcell']:nth-of-type({n})"
    )
}

/// Timing and matching knobs shared by the whole replay
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySettings {
    /// Fixed delay before each UI action and after each navigation
    pub pacing: Duration,

    /// Ceiling for one readiness check
    pub readiness_timeout: Duration,

    pub poll_interval: Duration,

    /// Discovery polling for the recorded verified selector
    pub discovery_attempts: u32,
    pub discovery_interval: Duration,

    /// How long the grid extractor waits for a row selector
    pub row_wait: Duration,

    /// Minimum IoU for geometric disambiguation
    pub bbox_threshold: f64,

    /// Treat several matches without a recorded box as an error
    pub strict_ambiguity: bool,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(1000),
            readiness_timeout: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(100),
            discovery_attempts: 10,
            discovery_interval: Duration::from_millis(500),
            row_wait: Duration::from_millis(3000),
            bbox_threshold: 0.7,
            strict_ambiguity: false,
        }
    }
}

impl ReplaySettings {
    /// Near-zero waits for in-memory drivers.
    pub fn quick() -> Self {
        Self {
            pacing: Duration::ZERO,
            readiness_timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(5),
            discovery_attempts: 1,
            discovery_interval: Duration::ZERO,
            row_wait: Duration::from_millis(30),
            ..Self::default()
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_strict_ambiguity(mut self, strict: bool) -> Self {
        self.strict_ambiguity = strict;
        self
    }
}

/// Recovery information attached to a report when the recorded selector failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfHealInfo {
    pub original_selector: String,
    pub healed_selector: String,
    /// Recovery stage that produced the working selector
    pub stage: String,
    pub score: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    pub ok: bool,
    pub action: ActionKind,
    /// Selector that was finally acted on
    pub selector: String,
    pub frame: FrameTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_index: Option<usize>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub finished_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub self_heal: Option<SelfHealInfo>,
}

impl ActionReport {
    pub fn success(
        action: ActionKind,
        selector: impl Into<String>,
        frame: FrameTarget,
        started_at: DateTime<Utc>,
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            ok: true,
            action,
            selector: selector.into(),
            frame,
            match_index: None,
            started_at,
            finished_at,
            latency_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            self_heal: None,
        }
    }

    pub fn with_match_index(mut self, index: Option<usize>) -> Self {
        self.match_index = index;
        self
    }

    pub fn with_heal(mut self, heal: SelfHealInfo) -> Self {
        self.self_heal = Some(heal);
        self
    }

    pub fn recovered(&self) -> bool {
        self.self_heal.is_some()
    }
}
