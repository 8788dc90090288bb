//! Stage contract: kinds, capabilities and the lifecycle trait.

use crate::batch::{Batch, BatchMaker};
use crate::context::StageContext;
use crate::error::StageError;
use edge_protocol::{Issue, StageConfiguration};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageKind {
    Origin,
    Processor,
    Target,
}

/// What the runtime does around a stage's `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Receives records from input lanes.
    pub consumes: bool,
    /// Writes records to output lanes.
    pub produces: bool,
    /// Its returned offset becomes the batch offset.
    pub commits_offset: bool,
}

impl StageKind {
    pub fn capabilities(&self) -> Capabilities {
        match self {
            StageKind::Origin => Capabilities {
                consumes: false,
                produces: true,
                commits_offset: true,
            },
            StageKind::Processor => Capabilities {
                consumes: true,
                produces: true,
                commits_offset: false,
            },
            StageKind::Target => Capabilities {
                consumes: true,
                produces: false,
                commits_offset: false,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Origin => "ORIGIN",
            StageKind::Processor => "PROCESSOR",
            StageKind::Target => "TARGET",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and wiring of one stage instance inside a pipe graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInfo {
    pub instance_name: String,
    pub library: String,
    pub stage_name: String,
    pub kind: StageKind,
    pub input_lanes: Vec<String>,
    pub output_lanes: Vec<String>,
    pub event_lanes: Vec<String>,
}

impl StageInfo {
    pub fn from_config(config: &StageConfiguration, kind: StageKind) -> Self {
        Self {
            instance_name: config.instance_name.clone(),
            library: config.library.clone(),
            stage_name: config.stage_name.clone(),
            kind,
            input_lanes: config.input_lanes.clone(),
            output_lanes: config.output_lanes.clone(),
            event_lanes: config.event_lanes.clone(),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.kind.capabilities()
    }
}

/// One stage implementation.
///
/// Every kind goes through the same three calls. Origins get an empty batch
/// carrying the last committed offset and the maximum batch size, and return
/// the new offset (`None` means the source is exhausted). Processors and
/// targets get the records of their input lanes and return `None`. Targets
/// get a maker without output lanes.
pub trait Stage: Send {
    /// Reads configuration and prepares resources. Any returned issue keeps
    /// the pipeline from starting.
    fn init(&mut self, _ctx: &StageContext) -> Vec<Issue> {
        Vec::new()
    }

    fn execute(
        &mut self,
        ctx: &StageContext,
        batch: Batch,
        maker: &mut BatchMaker,
    ) -> Result<Option<String>, StageError>;

    fn destroy(&mut self, _ctx: &StageContext) {}
}
