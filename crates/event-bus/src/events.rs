use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flowreplay_core_types::SessionId;

/// Outbound channel on the status surface. Ordering is preserved per channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Log,
    Event,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Log => "log",
            Channel::Event => "event",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayEventKind {
    ReplayStarted,
    StepStarted,
    StepSucceeded,
    StepFailed,
    SelectorRecovered,
    RowStarted,
    RowFailed,
    ReplayFinished,
    ReplayCancelled,
}

/// Structured status record emitted during a replay.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayEvent {
    pub session: SessionId,
    pub kind: ReplayEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_index: Option<usize>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ReplayEvent {
    pub fn new(session: SessionId, kind: ReplayEventKind, message: impl Into<String>) -> Self {
        Self {
            session,
            kind,
            step_id: None,
            row_index: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_row(mut self, row_index: usize) -> Self {
        self.row_index = Some(row_index);
        self
    }

    /// Failures and recoveries go to the log channel, lifecycle to the event channel.
    pub fn channel(&self) -> Channel {
        match self.kind {
            ReplayEventKind::StepFailed
            | ReplayEventKind::RowFailed
            | ReplayEventKind::SelectorRecovered => Channel::Log,
            _ => Channel::Event,
        }
    }
}
