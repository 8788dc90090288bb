//! Pipeline lifecycle management for the edge agent.
//!
//! A [`PipelineRunner`] owns one pipeline's state machine and its loop
//! thread; the [`PipelineManager`] keeps one runner per stored pipeline plus
//! the preview sessions, and restores pipelines when the agent boots.

pub mod error;
pub mod manager;
mod publisher;
pub mod runner;
mod state;

pub use error::{ManagerError, RunnerError};
pub use manager::{ManagerConfig, PipelineManager};
pub use publisher::PublishedMetrics;
pub use runner::{
    runtime_parameters, PipelineRunner, RunnerServices, RuntimeParameters, RESTART_ON_BOOT_ATTR,
    RUNTIME_PARAMETERS_ATTR,
};
