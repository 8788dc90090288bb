//! Pipeline execution core for the edge agent.
//!
//! # Batch flow
//!
//! A [`ProductionPipeline`] owns a [`PipeGraph`] of stage runtimes wired by
//! named lanes. Each tick:
//!
//! 1. the error and event sinks are cleared
//! 2. the origin gets the last committed offset and produces a batch
//! 3. processors and targets run in list order, reading their input lanes
//! 4. error records collected during the batch go to the error stage
//! 5. the origin's new offset is committed and the batch counters published
//!
//! The same graph runs in memory under a [`Previewer`], which captures every
//! stage's output instead of committing anything.

pub mod batch;
pub mod cancel;
pub mod config;
pub mod context;
pub mod el;
pub mod error;
pub mod metrics;
pub mod offset;
pub mod params;
pub mod pipe;
pub mod pipeline;
pub mod preview;
pub mod process_metrics;
pub mod registry;
pub mod sinks;
pub mod stage;
pub mod stages;

pub use batch::{Batch, BatchMaker, PipeBatch, StageOutput};
pub use cancel::CancellationToken;
pub use config::{
    CommonStageConfig, ConfigReader, DeliveryGuarantee, ErrorRecordPolicy, ExecutionMode,
    OnRecordError, PipelineConfigBean,
};
pub use context::{PipelineShared, StageContext};
pub use el::{ElError, ElValue, EvalContext, Expression};
pub use error::{ConfigError, OffsetStoreError, PipelineError, PreviewError, StageError};
pub use metrics::{Counter, Gauge, MetricRegistry, MetricsSnapshot, Timer};
pub use offset::{
    MemoryOffsetStore, OffsetStore, PreviewSourceOffsetTracker, ProductionSourceOffsetTracker,
    SourceOffsetTracker,
};
pub use params::{build_parameters, resolve_configs, Parameters};
pub use pipe::{PipeGraph, StageRuntime};
pub use pipeline::{BatchSummary, PipelineOptions, ProductionPipeline, RunOutcome};
pub use preview::{PreviewOptions, PreviewOutput, PreviewStatus, Previewer};
pub use process_metrics::{ProcessMetricsProbe, ProcessMetricsSnapshot};
pub use registry::{StageDefinition, StageRegistry};
pub use sinks::{ErrorHistory, ErrorMessage, ErrorSink, EventSink};
pub use stage::{Capabilities, Stage, StageInfo, StageKind};
