//! Control-plane wire protocol.
//!
//! Every exchange is one `POST <base>/messaging/rest/v1/events` carrying a JSON
//! array of [`ClientEvent`]s; the response is a JSON array of [`ServerEvent`]s.
//! Payloads travel as JSON strings inside the envelope.

use crate::error::ProtocolError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Event types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ValidatePipeline,
    SavePipeline,
    SaveRulesPipeline,
    StartPipeline,
    StopPipeline,
    ResetOffsetPipeline,
    DeletePipeline,
    DeleteHistoryPipeline,
    PingFrequencyAdjustment,
    StopDeletePipeline,
    SsoDisconnectedModeCredentials,
    SyncAcl,
    StatusPipeline,
    SdcInfoEvent,
    StatusMultiplePipelines,
    SdcProcessMetricsEvent,
    AckEvent,
}

impl EventType {
    pub const ALL: [EventType; 17] = [
        EventType::ValidatePipeline,
        EventType::SavePipeline,
        EventType::SaveRulesPipeline,
        EventType::StartPipeline,
        EventType::StopPipeline,
        EventType::ResetOffsetPipeline,
        EventType::DeletePipeline,
        EventType::DeleteHistoryPipeline,
        EventType::PingFrequencyAdjustment,
        EventType::StopDeletePipeline,
        EventType::SsoDisconnectedModeCredentials,
        EventType::SyncAcl,
        EventType::StatusPipeline,
        EventType::SdcInfoEvent,
        EventType::StatusMultiplePipelines,
        EventType::SdcProcessMetricsEvent,
        EventType::AckEvent,
    ];

    pub fn id(&self) -> i32 {
        match self {
            EventType::ValidatePipeline => 1000,
            EventType::SavePipeline => 1001,
            EventType::SaveRulesPipeline => 1002,
            EventType::StartPipeline => 1003,
            EventType::StopPipeline => 1004,
            EventType::ResetOffsetPipeline => 1005,
            EventType::DeletePipeline => 1006,
            EventType::DeleteHistoryPipeline => 1007,
            EventType::PingFrequencyAdjustment => 1008,
            EventType::StopDeletePipeline => 1009,
            EventType::SsoDisconnectedModeCredentials => 1010,
            EventType::SyncAcl => 1011,
            EventType::StatusPipeline => 2000,
            EventType::SdcInfoEvent => 2001,
            EventType::StatusMultiplePipelines => 2002,
            EventType::SdcProcessMetricsEvent => 2003,
            EventType::AckEvent => 5000,
        }
    }

    pub fn from_id(id: i32) -> Result<Self, ProtocolError> {
        EventType::ALL
            .iter()
            .find(|t| t.id() == id)
            .copied()
            .ok_or(ProtocolError::UnknownEventType(id))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.id())
    }
}

// ============================================================================
// Envelopes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEvent {
    pub event_id: String,
    pub destinations: Vec<String>,
    pub requires_ack: bool,
    pub ack_event: bool,
    pub event_type_id: i32,
    pub payload: String,
    #[serde(default)]
    pub org_id: String,
}

impl ClientEvent {
    /// Event with a fresh id whose payload is `payload` serialized to JSON.
    pub fn new<T: Serialize>(
        event_type: EventType,
        destinations: Vec<String>,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            destinations,
            requires_ack: false,
            ack_event: false,
            event_type_id: event_type.id(),
            payload: serde_json::to_string(payload)?,
            org_id: String::new(),
        })
    }

    /// Ack for a server event; carries the acknowledged event's id.
    pub fn ack(server_event: &ServerEvent, ack: &AckEvent) -> Result<Self, ProtocolError> {
        Ok(Self {
            event_id: server_event.event_id.clone(),
            destinations: vec![server_event.from.clone()],
            requires_ack: false,
            ack_event: true,
            event_type_id: EventType::AckEvent.id(),
            payload: serde_json::to_string(ack)?,
            org_id: server_event.org_id.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvent {
    pub event_id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub requires_ack: bool,
    #[serde(default)]
    pub is_ack_event: bool,
    pub event_type_id: i32,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub received_time: i64,
    #[serde(default)]
    pub org_id: String,
}

impl ServerEvent {
    pub fn event_type(&self) -> Result<EventType, ProtocolError> {
        EventType::from_id(self.event_type_id)
    }

    /// Decodes the JSON string payload.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

// ============================================================================
// Acks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckEventStatus {
    Success,
    Error,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckEvent {
    pub ack_event_status: AckEventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AckEvent {
    pub fn success() -> Self {
        Self {
            ack_event_status: AckEventStatus::Success,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ack_event_status: AckEventStatus::Error,
            message: Some(message.into()),
        }
    }

    pub fn ignore(message: impl Into<String>) -> Self {
        Self {
            ack_event_status: AckEventStatus::Ignore,
            message: Some(message.into()),
        }
    }
}

// ============================================================================
// Server → agent payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineBaseEvent {
    /// Pipeline id.
    pub name: String,
    #[serde(default)]
    pub rev: String,
    #[serde(default)]
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStartEvent {
    pub name: String,
    #[serde(default)]
    pub rev: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub runtime_parameters: Option<JsonMap<String, JsonValue>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfigurationAndRules {
    /// Pipeline configuration as a JSON string.
    pub pipeline_config: String,
    #[serde(default)]
    pub rule_definitions: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSaveEvent {
    pub name: String,
    #[serde(default)]
    pub rev: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub description: String,
    pub pipeline_configuration_and_rules: PipelineConfigurationAndRules,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingFrequencyAdjustmentEvent {
    /// Milliseconds.
    pub ping_frequency: u64,
}

// ============================================================================
// Agent → server payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatusEvent {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub rev: String,
    pub time_stamp: i64,
    pub is_remote: bool,
    pub pipeline_status: String,
    #[serde(default)]
    pub message: Option<String>,
    /// Committed source offset as a JSON string.
    #[serde(default)]
    pub offset: Option<String>,
    #[serde(default)]
    pub offset_persisted: bool,
    #[serde(default)]
    pub is_cluster_mode: bool,
    #[serde(default = "default_runner_count")]
    pub runner_count: u32,
    /// Metrics snapshot as a JSON string, attached for remote pipelines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<String>,
}

fn default_runner_count() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatusEvents {
    pub pipeline_status_event_list: Vec<PipelineStatusEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub version: String,
    pub built_date: String,
    pub built_by: String,
    pub built_repo_sha: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdcInfoEvent {
    pub sdc_id: String,
    pub http_url: String,
    pub runtime_version: String,
    pub sdc_build_info: BuildInfo,
    #[serde(default)]
    pub labels: Vec<String>,
    pub edge: bool,
    #[serde(default)]
    pub total_memory: u64,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMetricsEvent {
    /// Process CPU usage in percent.
    pub cpu_load: f64,
    /// Resident memory in bytes.
    pub used_memory: u64,
}
