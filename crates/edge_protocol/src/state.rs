//! Pipeline status, its transition table and the persisted pipeline state.

use crate::issues::Issues;
use crate::now_millis;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub const ISSUES_ATTR: &str = "issues";
pub const IS_REMOTE_PIPELINE_ATTR: &str = "IS_REMOTE_PIPELINE";

// ============================================================================
// Pipeline Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Edited,
    Starting,
    StartError,
    Running,
    RunningError,
    RunError,
    Finishing,
    Finished,
    Retry,
    Stopping,
    Stopped,
}

impl PipelineStatus {
    pub const ALL: [PipelineStatus; 11] = [
        PipelineStatus::Edited,
        PipelineStatus::Starting,
        PipelineStatus::StartError,
        PipelineStatus::Running,
        PipelineStatus::RunningError,
        PipelineStatus::RunError,
        PipelineStatus::Finishing,
        PipelineStatus::Finished,
        PipelineStatus::Retry,
        PipelineStatus::Stopping,
        PipelineStatus::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Edited => "EDITED",
            PipelineStatus::Starting => "STARTING",
            PipelineStatus::StartError => "START_ERROR",
            PipelineStatus::Running => "RUNNING",
            PipelineStatus::RunningError => "RUNNING_ERROR",
            PipelineStatus::RunError => "RUN_ERROR",
            PipelineStatus::Finishing => "FINISHING",
            PipelineStatus::Finished => "FINISHED",
            PipelineStatus::Retry => "RETRY",
            PipelineStatus::Stopping => "STOPPING",
            PipelineStatus::Stopped => "STOPPED",
        }
    }

    /// Get valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [PipelineStatus] {
        match self {
            PipelineStatus::Edited => &[PipelineStatus::Starting],
            PipelineStatus::Starting => &[
                PipelineStatus::StartError,
                PipelineStatus::Running,
                PipelineStatus::Stopping,
            ],
            PipelineStatus::StartError => &[PipelineStatus::Starting],
            PipelineStatus::Running => &[
                PipelineStatus::RunningError,
                PipelineStatus::Finishing,
                PipelineStatus::Stopping,
            ],
            PipelineStatus::RunningError => &[PipelineStatus::Retry, PipelineStatus::RunError],
            PipelineStatus::Retry => &[PipelineStatus::Starting, PipelineStatus::Stopping],
            PipelineStatus::RunError => &[PipelineStatus::Starting],
            PipelineStatus::Finishing => &[PipelineStatus::Finished],
            PipelineStatus::Stopping => &[PipelineStatus::Stopped],
            PipelineStatus::Finished => &[PipelineStatus::Starting],
            PipelineStatus::Stopped => &[PipelineStatus::Starting],
        }
    }

    pub fn can_transition_to(&self, target: PipelineStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Statuses in which a pipeline owns a running (or starting/stopping) loop.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Starting
                | PipelineStatus::Running
                | PipelineStatus::RunningError
                | PipelineStatus::Retry
                | PipelineStatus::Finishing
                | PipelineStatus::Stopping
        )
    }

    /// Offsets may not be reset while the pipeline is in one of these.
    pub fn blocks_offset_reset(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Finishing
                | PipelineStatus::Retry
                | PipelineStatus::Running
                | PipelineStatus::Starting
                | PipelineStatus::Stopping
        )
    }

    /// Offsets may only be committed externally while in one of these.
    pub fn allows_offset_commit(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Edited | PipelineStatus::Finished | PipelineStatus::Stopped
        )
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing a PipelineStatus from string.
#[derive(Debug, Error, Clone)]
#[error("invalid pipeline status: {0}")]
pub struct StatusParseError(String);

impl std::str::FromStr for PipelineStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PipelineStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| StatusParseError(s.to_string()))
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("cannot change state from {from} to {to}")]
pub struct InvalidTransition {
    pub from: PipelineStatus,
    pub to: PipelineStatus,
}

// ============================================================================
// Pipeline State
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub pipeline_id: String,
    pub status: PipelineStatus,
    #[serde(default)]
    pub message: Option<String>,
    pub time_stamp: i64,
    #[serde(default)]
    pub attributes: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub retry_attempt: u32,
    #[serde(default)]
    pub next_retry_time_stamp: i64,
    #[serde(default)]
    pub user: Option<String>,
}

impl PipelineState {
    pub fn new(pipeline_id: impl Into<String>, status: PipelineStatus) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            status,
            message: None,
            time_stamp: now_millis(),
            attributes: BTreeMap::new(),
            retry_attempt: 0,
            next_retry_time_stamp: 0,
            user: None,
        }
    }

    /// Successor state for `to`, carrying attributes and retry bookkeeping.
    /// Fails without side effects when the table forbids the transition.
    pub fn transition(
        &self,
        to: PipelineStatus,
        message: Option<String>,
    ) -> Result<PipelineState, InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        Ok(self.forced(to, message))
    }

    /// Successor state without consulting the table (recovery after restart).
    pub fn forced(&self, to: PipelineStatus, message: Option<String>) -> PipelineState {
        PipelineState {
            pipeline_id: self.pipeline_id.clone(),
            status: to,
            message,
            time_stamp: now_millis(),
            attributes: self.attributes.clone(),
            retry_attempt: self.retry_attempt,
            next_retry_time_stamp: self.next_retry_time_stamp,
            user: self.user.clone(),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.attributes
            .get(IS_REMOTE_PIPELINE_ATTR)
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
    }

    pub fn set_remote(&mut self, remote: bool) {
        self.attributes
            .insert(IS_REMOTE_PIPELINE_ATTR.to_string(), JsonValue::Bool(remote));
    }

    pub fn issues(&self) -> Option<Issues> {
        self.attributes
            .get(ISSUES_ATTR)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_issues(&mut self, issues: &Issues) {
        match serde_json::to_value(issues) {
            Ok(value) => {
                self.attributes.insert(ISSUES_ATTR.to_string(), value);
            }
            Err(_) => {
                self.attributes.remove(ISSUES_ATTR);
            }
        }
    }

    pub fn clear_issues(&mut self) {
        self.attributes.remove(ISSUES_ATTR);
    }
}
