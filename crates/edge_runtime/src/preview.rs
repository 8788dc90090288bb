//! In-memory preview runs of a pipeline.
//!
//! A previewer runs the pipe graph against the live origin, the configured
//! test origin, or recorded stage outputs, and captures what every stage
//! produced batch by batch. Nothing is committed anywhere. Synchronous and
//! asynchronous runs share one core; [`Previewer::start_async`] marks the run
//! STARTING and drives that core from a dedicated thread.

use crate::batch::StageOutput;
use crate::cancel::CancellationToken;
use crate::config::PipelineConfigBean;
use crate::context::PipelineShared;
use crate::error::PreviewError;
use crate::offset::{PreviewSourceOffsetTracker, SourceOffsetTracker};
use crate::params::build_parameters;
use crate::pipe::PipeGraph;
use crate::registry::StageRegistry;
use crate::stage::StageKind;
use edge_protocol::defaults::{
    DEFAULT_PREVIEW_BATCHES, DEFAULT_PREVIEW_BATCH_SIZE, DEFAULT_PREVIEW_TIMEOUT_MILLIS,
};
use edge_protocol::{Issue, Issues, PipelineConfiguration};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreviewStatus {
    Created,
    Validating,
    Valid,
    Invalid,
    ValidationError,
    Starting,
    StartError,
    Running,
    RunError,
    Finishing,
    Finished,
    Cancelling,
    Cancelled,
    TimingOut,
    TimedOut,
}

impl PreviewStatus {
    pub const ALL: &'static [PreviewStatus] = &[
        PreviewStatus::Created,
        PreviewStatus::Validating,
        PreviewStatus::Valid,
        PreviewStatus::Invalid,
        PreviewStatus::ValidationError,
        PreviewStatus::Starting,
        PreviewStatus::StartError,
        PreviewStatus::Running,
        PreviewStatus::RunError,
        PreviewStatus::Finishing,
        PreviewStatus::Finished,
        PreviewStatus::Cancelling,
        PreviewStatus::Cancelled,
        PreviewStatus::TimingOut,
        PreviewStatus::TimedOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewStatus::Created => "CREATED",
            PreviewStatus::Validating => "VALIDATING",
            PreviewStatus::Valid => "VALID",
            PreviewStatus::Invalid => "INVALID",
            PreviewStatus::ValidationError => "VALIDATION_ERROR",
            PreviewStatus::Starting => "STARTING",
            PreviewStatus::StartError => "START_ERROR",
            PreviewStatus::Running => "RUNNING",
            PreviewStatus::RunError => "RUN_ERROR",
            PreviewStatus::Finishing => "FINISHING",
            PreviewStatus::Finished => "FINISHED",
            PreviewStatus::Cancelling => "CANCELLING",
            PreviewStatus::Cancelled => "CANCELLED",
            PreviewStatus::TimingOut => "TIMING_OUT",
            PreviewStatus::TimedOut => "TIMED_OUT",
        }
    }

    /// Statuses during which the preview holds resources.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PreviewStatus::Validating
                | PreviewStatus::Starting
                | PreviewStatus::Running
                | PreviewStatus::Finishing
                | PreviewStatus::Cancelling
                | PreviewStatus::TimingOut
        )
    }
}

impl fmt::Display for PreviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewOptions {
    pub batches: usize,
    pub batch_size: usize,
    pub skip_targets: bool,
    pub timeout: Duration,
    pub test_origin: bool,
    /// Stop each batch after this stage.
    pub end_stage: Option<String>,
    /// Recorded outputs replayed instead of running those stages.
    pub stage_outputs_to_override: Vec<StageOutput>,
    pub runtime_parameters: Option<JsonMap<String, JsonValue>>,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            batches: DEFAULT_PREVIEW_BATCHES,
            batch_size: DEFAULT_PREVIEW_BATCH_SIZE,
            skip_targets: true,
            timeout: Duration::from_millis(DEFAULT_PREVIEW_TIMEOUT_MILLIS),
            test_origin: false,
            end_stage: None,
            stage_outputs_to_override: Vec::new(),
            runtime_parameters: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewOutput {
    pub status: PreviewStatus,
    #[serde(default)]
    pub issues: Issues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// One entry per batch, each listing the stages in run order.
    #[serde(default)]
    pub batches_output: Vec<Vec<StageOutput>>,
}

impl PreviewOutput {
    fn new(status: PreviewStatus) -> Self {
        Self {
            status,
            issues: Issues::default(),
            message: None,
            batches_output: Vec::new(),
        }
    }
}

/// How a run ended, before it is folded into the shared state.
enum Halt {
    Cancelled,
    TimedOut,
}

pub struct Previewer {
    id: String,
    pipeline_id: String,
    agent_id: String,
    config: PipelineConfiguration,
    registry: Arc<StageRegistry>,
    output: Mutex<PreviewOutput>,
    stop: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    finished_at: Mutex<Option<Instant>>,
}

impl Previewer {
    pub fn new(
        config: PipelineConfiguration,
        registry: Arc<StageRegistry>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pipeline_id: config.pipeline_id.clone(),
            agent_id: agent_id.into(),
            config,
            registry,
            output: Mutex::new(PreviewOutput::new(PreviewStatus::Created)),
            stop: CancellationToken::new(),
            worker: Mutex::new(None),
            finished_at: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn status(&self) -> PreviewStatus {
        self.lock_output().status
    }

    pub fn output(&self) -> PreviewOutput {
        self.lock_output().clone()
    }

    /// When the last run ended; `None` while it is still going or never ran.
    pub fn finished_at(&self) -> Option<Instant> {
        *self.finished_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_output(&self) -> MutexGuard<'_, PreviewOutput> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: PreviewStatus) {
        debug!(preview = %self.id, status = %status, "Preview status");
        self.lock_output().status = status;
    }

    /// Like `set_status`, but leaves a pending CANCELLING in place.
    fn advance(&self, status: PreviewStatus) {
        let mut output = self.lock_output();
        if output.status != PreviewStatus::Cancelling {
            debug!(preview = %self.id, status = %status, "Preview status");
            output.status = status;
        }
    }

    fn fail(&self, status: PreviewStatus, issues: Vec<Issue>, message: String) {
        let mut output = self.lock_output();
        output.status = status;
        output.message = Some(message);
        output.issues = Issues::from_list(issues);
    }

    /// Builds and initializes the pipeline without running it.
    pub fn validate(&self) -> PreviewOutput {
        self.set_status(PreviewStatus::Validating);
        match self.build_graph(&PreviewOptions::default()) {
            Ok(mut graph) => {
                let issues = graph.init();
                graph.destroy();
                if issues.is_empty() {
                    self.set_status(PreviewStatus::Valid);
                } else {
                    let message = issues[0].to_string();
                    self.fail(PreviewStatus::Invalid, issues, message);
                }
            }
            Err(issue) => {
                let message = issue.to_string();
                self.fail(PreviewStatus::ValidationError, vec![issue], message);
            }
        }
        self.output()
    }

    /// Runs the preview on the calling thread and returns its output.
    pub fn run_sync(&self, options: &PreviewOptions) -> PreviewOutput {
        self.set_status(PreviewStatus::Starting);
        self.run(options)
    }

    /// Body of a run already marked STARTING.
    fn run(&self, options: &PreviewOptions) -> PreviewOutput {
        let output = self.execute(options);
        *self.finished_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        output
    }

    /// A stop that landed before the run got here ends it as CANCELLED.
    fn execute(&self, options: &PreviewOptions) -> PreviewOutput {
        if self.stop.is_cancelled() {
            self.set_status(PreviewStatus::Cancelled);
            info!(preview = %self.id, "Preview cancelled before start");
            return self.output();
        }
        let mut graph = match self.build_graph(options) {
            Ok(graph) => graph,
            Err(issue) => {
                let message = issue.to_string();
                self.fail(PreviewStatus::StartError, vec![issue], message);
                return self.output();
            }
        };
        let issues = graph.init();
        if !issues.is_empty() {
            graph.destroy();
            let message = issues[0].to_string();
            self.fail(PreviewStatus::StartError, issues, message);
            return self.output();
        }

        self.advance(PreviewStatus::Running);
        let result = self.run_batches(&mut graph, options);
        graph.destroy();
        match result {
            Ok(None) => {
                self.set_status(PreviewStatus::Finishing);
                self.set_status(PreviewStatus::Finished);
            }
            Ok(Some(Halt::Cancelled)) => self.set_status(PreviewStatus::Cancelled),
            Ok(Some(Halt::TimedOut)) => self.set_status(PreviewStatus::TimedOut),
            Err(message) => {
                warn!(preview = %self.id, error = %message, "Preview failed");
                self.fail(PreviewStatus::RunError, Vec::new(), message);
            }
        }
        info!(preview = %self.id, status = %self.status(), "Preview done");
        self.output()
    }

    /// Runs the preview on its own thread and returns immediately.
    pub fn start_async(self: &Arc<Self>, options: PreviewOptions) -> Result<(), PreviewError> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(PreviewError::AlreadyRunning(self.id.clone()));
        }
        self.set_status(PreviewStatus::Starting);
        let previewer = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(format!("preview-{}", self.id))
            .spawn(move || {
                previewer.run(&options);
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Requests cancellation; the run notices at the next stage boundary.
    pub fn stop(&self) {
        let mut output = self.lock_output();
        if output.status.is_active() {
            output.status = PreviewStatus::Cancelling;
            self.stop.cancel();
        }
    }

    /// Blocks until an asynchronous run has finished.
    pub fn wait(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(preview = %self.id, "Preview thread panicked");
            }
        }
    }

    fn build_graph(&self, options: &PreviewOptions) -> Result<PipeGraph, Issue> {
        let bean = PipelineConfigBean::parse(&self.config.configuration)
            .map_err(|err| err.to_issue(None))?;
        let parameters = Arc::new(build_parameters(
            &bean.constants,
            options.runtime_parameters.as_ref(),
        ));
        let shared = Arc::new(
            PipelineShared::new(
                self.pipeline_id.clone(),
                self.config.title.clone(),
                self.agent_id.clone(),
                bean.error_record_policy,
            )
            .for_preview()
            .with_stop_token(self.stop.clone()),
        );
        PipeGraph::build(
            &self.config,
            &self.registry,
            shared,
            parameters,
            options.test_origin,
        )
        .map_err(|err| Issue::pipeline(err.to_string()))
    }

    fn run_batches(
        &self,
        graph: &mut PipeGraph,
        options: &PreviewOptions,
    ) -> Result<Option<Halt>, String> {
        let deadline = Instant::now() + options.timeout;
        let mut tracker = PreviewSourceOffsetTracker::new(None);

        for _ in 0..options.batches {
            graph.shared().clear_batch();
            let previous = tracker.offset().map(str::to_string);
            let mut pipe_batch = graph
                .new_pipe_batch(options.batch_size.max(1), previous)
                .with_snapshots();

            for index in 0..graph.len() {
                if let Some(halt) = self.check_halt(deadline) {
                    return Ok(Some(halt));
                }
                let info = graph.info(index).clone();
                let recorded = options
                    .stage_outputs_to_override
                    .iter()
                    .find(|o| o.instance_name == info.instance_name);
                if let Some(recorded) = recorded {
                    graph.override_stage(index, &mut pipe_batch, recorded);
                } else if options.skip_targets && info.kind == StageKind::Target {
                    graph.skip_stage(index, &mut pipe_batch);
                } else {
                    let offset = graph
                        .run_stage(index, &mut pipe_batch)
                        .map_err(|err| err.to_string())?;
                    if let Some(offset) = offset {
                        tracker.set_offset(offset);
                    }
                }
                if options.end_stage.as_deref() == Some(info.instance_name.as_str()) {
                    break;
                }
            }

            if let Err(err) = tracker.commit_offset() {
                return Err(err.to_string());
            }
            self.lock_output()
                .batches_output
                .push(pipe_batch.take_snapshots());
            if tracker.is_finished() {
                break;
            }
        }
        Ok(None)
    }

    /// Cancellation wins over the timeout; a timeout passes through
    /// TIMING_OUT before the run winds down.
    fn check_halt(&self, deadline: Instant) -> Option<Halt> {
        if self.stop.is_cancelled() {
            return Some(Halt::Cancelled);
        }
        if Instant::now() >= deadline {
            self.set_status(PreviewStatus::TimingOut);
            self.stop.cancel();
            return Some(Halt::TimedOut);
        }
        None
    }
}

impl fmt::Debug for Previewer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Previewer")
            .field("id", &self.id)
            .field("pipeline_id", &self.pipeline_id)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::BASIC_LIBRARY;
    use edge_protocol::{PipelineInfo, StageConfiguration};
    use serde_json::json;

    fn previewer() -> Arc<Previewer> {
        let mut config = PipelineConfiguration::new(PipelineInfo::new("p1", "Test", "", "admin"));
        config.stages = vec![
            StageConfiguration::new("gen", BASIC_LIBRARY, "dev_data_generator")
                .with_config("dataGenConfigs", json!([{"field": "n", "type": "LONG"}]))
                .with_config("numberOfRecords", 5)
                .with_outputs(["out"]),
            StageConfiguration::new("sink", BASIC_LIBRARY, "trash").with_inputs(["out"]),
        ];
        Arc::new(Previewer::new(
            config,
            Arc::new(StageRegistry::with_builtin_stages()),
            "agent",
        ))
    }

    #[test]
    fn test_stop_between_start_and_run_is_kept() {
        // start_async has marked the run STARTING; the worker thread has not
        // picked it up yet when stop() arrives.
        let preview = previewer();
        preview.set_status(PreviewStatus::Starting);
        preview.stop();
        assert_eq!(preview.status(), PreviewStatus::Cancelling);

        assert!(preview.finished_at().is_none());
        let output = preview.run(&PreviewOptions::default());
        assert_eq!(output.status, PreviewStatus::Cancelled);
        assert!(output.batches_output.is_empty());
        assert!(preview.finished_at().is_some());
    }

    #[test]
    fn test_advance_does_not_hide_cancelling() {
        let preview = previewer();
        preview.set_status(PreviewStatus::Starting);
        preview.advance(PreviewStatus::Running);
        assert_eq!(preview.status(), PreviewStatus::Running);
        preview.stop();
        preview.advance(PreviewStatus::Running);
        assert_eq!(preview.status(), PreviewStatus::Cancelling);
    }
}
