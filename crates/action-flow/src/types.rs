//! Core types for flow replay

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use action_locator::{ElementMetadata, RecoveryStage, SelectorCandidate};
use action_primitives::{ActionKind, ActionReport};
use cdp_adapter::Locator;
use chrono::{DateTime, Utc};
use flowreplay_core_types::{BoundingBox, SessionId};
use grid_extract::{ExtractDefinition, ExtractedRow, RowData};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::errors::FlowError;

/// Step type. Matching is case-insensitive; unknown types are kept and skipped.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepKind {
    Navigate,
    UiAction,
    GridExtract,
    Loop,
    CounterLoop,
    DataLoop,
    GridLoop,
    Unknown(String),
}

impl StepKind {
    pub fn as_str(&self) -> &str {
        match self {
            StepKind::Navigate => "navigate",
            StepKind::UiAction => "uiAction",
            StepKind::GridExtract => "gridExtract",
            StepKind::Loop => "loop",
            StepKind::CounterLoop => "counterLoop",
            StepKind::DataLoop => "dataLoop",
            StepKind::GridLoop => "gridLoop",
            StepKind::Unknown(raw) => raw,
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(
            self,
            StepKind::Loop | StepKind::CounterLoop | StepKind::DataLoop | StepKind::GridLoop
        )
    }
}

impl Default for StepKind {
    fn default() -> Self {
        StepKind::Unknown(String::new())
    }
}

impl From<String> for StepKind {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "navigate" => StepKind::Navigate,
            "uiaction" => StepKind::UiAction,
            "gridextract" => StepKind::GridExtract,
            "loop" => StepKind::Loop,
            "counterloop" => StepKind::CounterLoop,
            "dataloop" => StepKind::DataLoop,
            "gridloop" => StepKind::GridLoop,
            _ => StepKind::Unknown(raw),
        }
    }
}

impl From<StepKind> for String {
    fn from(kind: StepKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64().map(|v| v.max(0.0) as u32),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecordedSelector {
    Candidate(SelectorCandidate),
    Plain(String),
}

fn candidate_list<'de, D>(deserializer: D) -> Result<Vec<SelectorCandidate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<RecordedSelector>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .map(|entry| match entry {
            RecordedSelector::Candidate(candidate) => candidate,
            RecordedSelector::Plain(selector) => {
                SelectorCandidate::new(selector, Default::default(), 0)
            }
        })
        .collect())
}

/// One recorded step, as captured. Unknown fields are ignored.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, deserialize_with = "candidate_list")]
    pub selectors: Vec<SelectorCandidate>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub dynamic_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub is_smart_column: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_url: Option<String>,

    #[serde(default, deserialize_with = "lenient_count", skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// gridExtract id a data loop reads from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// gridExtract fields, also inline on gridLoop
    #[serde(flatten)]
    pub grid: ExtractDefinition,
    #[serde(flatten)]
    pub element: ElementMetadata,
}

impl Step {
    pub fn new(id: &str, kind: StepKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }

    pub fn action_kind(&self) -> Result<ActionKind, FlowError> {
        let raw = self
            .action
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| FlowError::InvalidStep {
                step_id: self.id.clone(),
                reason: "uiAction without action".to_string(),
            })?;
        serde_json::from_value(Value::String(raw.to_ascii_lowercase())).map_err(|_| {
            FlowError::InvalidStep {
                step_id: self.id.clone(),
                reason: format!("unsupported action '{}'", raw),
            }
        })
    }

    /// Text fed to placeholder substitution: `dynamicValue`, else `value`
    pub fn raw_value(&self) -> &str {
        self.dynamic_value
            .as_deref()
            .filter(|v| !v.is_empty())
            .or(self.value.as_deref())
            .unwrap_or_default()
    }

    pub fn display_name(&self) -> &str {
        self.label
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }

    /// Capture time in milliseconds; numbers, numeric strings and RFC 3339 are accepted
    pub fn timestamp_millis(&self) -> Option<f64> {
        match self.timestamp.as_ref()? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().or_else(|| {
                DateTime::parse_from_rfc3339(s.trim())
                    .ok()
                    .map(|t| t.timestamp_millis() as f64)
            }),
            _ => None,
        }
    }
}

/// Steps indexed by parent, children in capture order
#[derive(Clone, Debug, Default)]
pub struct StepTree {
    steps: Vec<Step>,
    roots: Vec<usize>,
    children: HashMap<String, Vec<usize>>,
    orphans: Vec<String>,
}

fn by_timestamp(steps: &[Step], ids: &mut [usize]) {
    // Stable; steps without a timestamp keep their order after the stamped ones.
    ids.sort_by(|a, b| {
        match (steps[*a].timestamp_millis(), steps[*b].timestamp_millis()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
    });
}

impl StepTree {
    pub fn from_json(raw: &str) -> Result<Self, FlowError> {
        let steps: Vec<Step> = serde_json::from_str(raw)
            .map_err(|err| FlowError::ValidationFailed(format!("invalid step json: {}", err)))?;
        Self::build(steps)
    }

    pub fn build(steps: Vec<Step>) -> Result<Self, FlowError> {
        let mut seen = HashSet::new();
        for step in &steps {
            if step.id.trim().is_empty() {
                return Err(FlowError::ValidationFailed(
                    "step id cannot be empty".to_string(),
                ));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(FlowError::ValidationFailed(format!(
                    "duplicate step id: {}",
                    step.id
                )));
            }
        }

        let mut roots = Vec::new();
        let mut children: HashMap<String, Vec<usize>> = HashMap::new();
        let mut orphans = Vec::new();
        for (index, step) in steps.iter().enumerate() {
            match step.parent_id.as_deref().filter(|p| !p.is_empty()) {
                None => roots.push(index),
                Some(parent) => {
                    if !seen.contains(parent) {
                        warn!(step_id = %step.id, parent_id = parent, "orphan step will not run");
                        orphans.push(step.id.clone());
                    }
                    children.entry(parent.to_string()).or_default().push(index);
                }
            }
        }

        by_timestamp(&steps, &mut roots);
        for ids in children.values_mut() {
            by_timestamp(&steps, ids);
        }

        Ok(Self {
            steps,
            roots,
            children,
            orphans,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = &Step> {
        self.roots.iter().map(|i| &self.steps[*i])
    }

    pub fn children(&self, id: &str) -> impl Iterator<Item = &Step> {
        self.children
            .get(id)
            .into_iter()
            .flatten()
            .map(|i| &self.steps[*i])
    }

    pub fn get(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn orphans(&self) -> &[String] {
        &self.orphans
    }

    /// Reachable steps in execution order, with their depth
    pub fn walk(&self) -> Vec<(usize, &Step)> {
        let mut out = Vec::new();
        let mut stack: Vec<(usize, &Step)> =
            self.roots.iter().rev().map(|i| (0, &self.steps[*i])).collect();
        while let Some((depth, step)) = stack.pop() {
            out.push((depth, step));
            let kids: Vec<&Step> = self.children(&step.id).collect();
            stack.extend(kids.into_iter().rev().map(|c| (depth + 1, c)));
        }
        out
    }

    /// A non-empty tree needs at least one root; orphans are only reported.
    pub fn validate(&self) -> Result<(), FlowError> {
        if !self.is_empty() && self.roots.is_empty() {
            return Err(FlowError::ValidationFailed(
                "no root step: every step has a parent".to_string(),
            ));
        }
        for orphan in &self.orphans {
            warn!(step_id = %orphan, "orphan step is unreachable");
        }
        Ok(())
    }
}

/// Row bound to one data loop iteration
#[derive(Clone, Debug)]
pub struct RowContext {
    /// Position among the accepted rows
    pub index: usize,
    pub dom_index: usize,
    pub data: RowData,
    pub locator: Locator,
}

impl RowContext {
    pub fn from_extracted(index: usize, row: &ExtractedRow) -> Self {
        Self {
            index,
            dom_index: row.dom_index,
            data: row.data.clone(),
            locator: row.locator.clone(),
        }
    }
}

/// State of one replay run
pub struct ReplayContext {
    pub session: SessionId,
    pub flow_id: Option<String>,
    pub tree: Arc<StepTree>,
    definitions: HashMap<String, ExtractDefinition>,
    filtered_rows: HashMap<String, Vec<ExtractedRow>>,
    rows: Vec<RowContext>,
}

impl ReplayContext {
    pub fn new(session: SessionId, tree: Arc<StepTree>) -> Self {
        Self {
            session,
            flow_id: None,
            tree,
            definitions: HashMap::new(),
            filtered_rows: HashMap::new(),
            rows: Vec::new(),
        }
    }

    pub fn with_flow_id(mut self, flow_id: Option<String>) -> Self {
        self.flow_id = flow_id;
        self
    }

    /// Register a gridExtract definition; rows cached under the same id are dropped.
    pub fn register_definition(&mut self, step_id: &str, definition: ExtractDefinition) {
        self.filtered_rows.remove(step_id);
        self.definitions.insert(step_id.to_string(), definition);
    }

    pub fn definition(&self, step_id: &str) -> Option<&ExtractDefinition> {
        self.definitions.get(step_id)
    }

    pub fn set_filtered_rows(&mut self, source: &str, rows: Vec<ExtractedRow>) {
        self.filtered_rows.insert(source.to_string(), rows);
    }

    pub fn filtered_rows(&self, source: &str) -> Option<&[ExtractedRow]> {
        self.filtered_rows.get(source).map(Vec::as_slice)
    }

    /// Rows extracted before a navigation describe a page that is gone.
    pub fn clear_filtered_rows(&mut self) {
        self.filtered_rows.clear();
    }

    /// Bind a row; the previous one comes back on `exit_row`.
    pub fn enter_row(&mut self, row: RowContext) {
        self.rows.push(row);
    }

    pub fn exit_row(&mut self) -> Option<RowContext> {
        self.rows.pop()
    }

    pub fn current_row(&self) -> Option<&RowContext> {
        self.rows.last()
    }

    pub fn current_row_data(&self) -> Option<&RowData> {
        self.current_row().map(|row| &row.data)
    }

    pub fn current_row_index(&self) -> Option<usize> {
        self.current_row().map(|row| row.index)
    }

    pub fn in_data_loop(&self) -> bool {
        !self.rows.is_empty()
    }
}

/// What to do when a uiAction fails outside a data loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStrategy {
    #[default]
    Abort,
    Continue,
}

/// Step execution result
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_id: String,
    pub kind: StepKind,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_index: Option<usize>,
    /// Selector finally acted on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<RecoveryStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_report: Option<ActionReport>,
    /// Loop iterations actually run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    pub fn new(step_id: &str, kind: StepKind, row_index: Option<usize>) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.to_string(),
            kind,
            success: false,
            row_index,
            selector: None,
            stage: None,
            action_report: None,
            iterations: None,
            started_at: now,
            finished_at: now,
            latency_ms: 0,
            error: None,
        }
    }

    pub fn succeed(mut self) -> Self {
        self.success = true;
        self.finish()
    }

    pub fn fail(mut self, error: &FlowError) -> Self {
        self.success = false;
        self.error = Some(error.to_string());
        self.finish()
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = Some(iterations);
        self
    }

    pub fn recovered(&self) -> bool {
        self.stage.map_or(false, |stage| stage.is_recovery())
    }

    fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self.latency_ms = (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self
    }
}

/// Outcome of one replay run
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub session: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    pub success: bool,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub steps: Vec<StepResult>,
    /// Error that stopped the replay, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplayReport {
    pub fn new(session: SessionId, flow_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            session,
            flow_id,
            success: false,
            cancelled: false,
            started_at: now,
            finished_at: now,
            latency_ms: 0,
            steps: Vec::new(),
            error: None,
        }
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| !s.success)
    }

    pub fn recovered_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| s.recovered())
    }

    /// Set finish time; success means nothing failed and nothing stopped the run.
    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self.latency_ms = (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self.success = !self.cancelled && self.error.is_none() && self.steps.iter().all(|s| s.success);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recorded_steps_with_aliases() {
        let raw = r##"[
            {"id": "n", "type": "navigate", "url": "https://ex.test", "timestamp": 1},
            {"id": "c", "type": "uiaction", "action": "click", "selector": "#go",
             "selectors": [{"selector": "#go", "source": "id", "score": 100.0}, "button.go"],
             "boundingBox": {"x": 1, "y": 2, "width": 3, "height": 4},
             "tagName": "BUTTON", "elementText": "Go", "timestamp": 2, "extra": true},
            {"id": "t", "type": "uiAction", "action": "type", "value": 42, "timestamp": 3}
        ]"##;
        let tree = StepTree::from_json(raw).unwrap();
        let steps: Vec<&Step> = tree.roots().collect();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].kind, StepKind::Navigate);
        assert_eq!(steps[1].kind, StepKind::UiAction);
        assert_eq!(steps[1].selectors.len(), 2);
        assert_eq!(steps[1].selectors[0].score, 100);
        assert_eq!(steps[1].selectors[1].selector, "button.go");
        assert_eq!(steps[1].element.tag().as_deref(), Some("button"));
        assert_eq!(steps[1].bounding_box, Some(BoundingBox::new(1.0, 2.0, 3.0, 4.0)));
        assert_eq!(steps[1].action_kind().unwrap(), ActionKind::Click);
        assert_eq!(steps[2].raw_value(), "42");
    }

    #[test]
    fn inline_grid_loop_fields() {
        let raw = r##"[{"id": "g", "type": "gridloop", "gridSelector": "#grid",
            "rowSelector": "#grid tr",
            "columnMappings": [{"header": {"header": "Name", "type": "text"}, "columnIndex": 0}],
            "filters": [{"column": "Name", "operator": "contains", "value": "a"}],
            "count": "3"}]"##;
        let tree = StepTree::from_json(raw).unwrap();
        let step = tree.get("g").unwrap();
        assert_eq!(step.kind, StepKind::GridLoop);
        assert!(step.grid.is_defined());
        assert_eq!(step.grid.column_mappings[0].name(), "Name");
        assert_eq!(step.grid.filters.len(), 1);
        assert_eq!(step.count, Some(3));
    }

    #[test]
    fn children_follow_capture_order() {
        let raw = r#"[
            {"id": "loop", "type": "loop"},
            {"id": "b", "parentId": "loop", "timestamp": 20},
            {"id": "late", "parentId": "loop"},
            {"id": "a", "parentId": "loop", "timestamp": "10"},
            {"id": "lost", "parentId": "nowhere"}
        ]"#;
        let tree = StepTree::from_json(raw).unwrap();
        let ids: Vec<&str> = tree.children("loop").map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "late"]);
        assert_eq!(tree.orphans(), &["lost".to_string()]);
        let walked: Vec<(usize, &str)> = tree.walk().into_iter().map(|(d, s)| (d, s.id.as_str())).collect();
        assert_eq!(walked, vec![(0, "loop"), (1, "a"), (1, "b"), (1, "late")]);
    }

    #[test]
    fn rejects_duplicate_and_empty_ids() {
        assert!(matches!(
            StepTree::from_json(r#"[{"id": "a"}, {"id": "a"}]"#),
            Err(FlowError::ValidationFailed(_))
        ));
        assert!(matches!(
            StepTree::from_json(r#"[{"id": " "}]"#),
            Err(FlowError::ValidationFailed(_))
        ));
    }

    #[test]
    fn unknown_kind_is_preserved() {
        let tree = StepTree::from_json(r#"[{"id": "x", "type": "hover"}]"#).unwrap();
        assert_eq!(tree.get("x").unwrap().kind, StepKind::Unknown("hover".into()));
    }

    #[test]
    fn unsupported_action_is_invalid_step() {
        let mut step = Step::new("s", StepKind::UiAction);
        step.action = Some("hover".into());
        assert!(matches!(step.action_kind(), Err(FlowError::InvalidStep { .. })));
        step.action = None;
        assert!(step.action_kind().is_err());
    }

    #[test]
    fn row_stack_restores_outer_row() {
        let mut ctx = ReplayContext::new(SessionId::from("s"), Arc::new(StepTree::default()));
        let row = |index| RowContext {
            index,
            dom_index: index,
            data: RowData::new(),
            locator: Locator::new("tr").nth(index),
        };
        ctx.enter_row(row(0));
        ctx.enter_row(row(4));
        assert_eq!(ctx.current_row_index(), Some(4));
        ctx.exit_row();
        assert_eq!(ctx.current_row_index(), Some(0));
        ctx.exit_row();
        assert!(!ctx.in_data_loop());
    }

    #[test]
    fn cached_rows_drop_on_redefinition_and_navigation() {
        let mut ctx = ReplayContext::new(SessionId::from("s"), Arc::new(StepTree::default()));
        let rows = || {
            vec![ExtractedRow {
                dom_index: 0,
                locator: Locator::new("tr").nth(0),
                data: RowData::new(),
            }]
        };
        ctx.set_filtered_rows("g", rows());
        ctx.set_filtered_rows("h", rows());
        assert_eq!(ctx.filtered_rows("g").map(<[ExtractedRow]>::len), Some(1));

        ctx.register_definition("g", ExtractDefinition::default());
        assert!(ctx.filtered_rows("g").is_none());
        assert!(ctx.filtered_rows("h").is_some());

        ctx.clear_filtered_rows();
        assert!(ctx.filtered_rows("h").is_none());
    }
}
