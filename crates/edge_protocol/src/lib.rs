//! Shared types for the edge agent.
//!
//! Everything that crosses a boundary lives here: pipeline configurations and
//! info blocks as stored on disk, pipeline state and its transition table,
//! configuration issues, source offsets, and the JSON messages exchanged with
//! the control plane.

pub mod defaults;
pub mod error;
pub mod events;
pub mod info;
pub mod issues;
pub mod offset;
pub mod paths;
pub mod pipeline;
pub mod state;

pub use error::ProtocolError;
pub use events::{
    AckEvent, AckEventStatus, BuildInfo, ClientEvent, EventType, PingFrequencyAdjustmentEvent,
    PipelineBaseEvent, PipelineConfigurationAndRules, PipelineSaveEvent, PipelineStartEvent,
    PipelineStatusEvent, PipelineStatusEvents, ProcessMetricsEvent, SdcInfoEvent, ServerEvent,
};
pub use info::PipelineInfo;
pub use issues::{Issue, IssueLevel, Issues};
pub use offset::{SourceOffset, POLL_SOURCE_OFFSET_KEY};
pub use paths::EdgePaths;
pub use pipeline::{
    validate_stage_wiring, Config, PipelineConfiguration, PipelineFragmentConfiguration,
    ServiceConfiguration, StageConfiguration,
};
pub use state::{InvalidTransition, PipelineState, PipelineStatus};

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
