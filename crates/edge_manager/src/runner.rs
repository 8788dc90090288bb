//! Pipeline runner: the owner of one pipeline's lifecycle.
//!
//! Design principles:
//! - Every status change goes through the transition table and is persisted
//!   before it becomes visible
//! - The first build happens on the caller's thread, so `start` reports
//!   START_ERROR synchronously; retries rebuild on the loop thread
//! - The loop thread writes the terminal state (STOPPED, FINISHED or
//!   RUN_ERROR) before it exits
//! - `stop` flips the cancellation token and joins the loop thread

use crate::error::RunnerError;
use crate::publisher::{MetricsPublisher, PublishedMetrics};
use crate::state::StateHandle;
use edge_protocol::{now_millis, Issue, Issues, PipelineState, PipelineStatus, SourceOffset};
use edge_record::Record;
use edge_runtime::{
    CancellationToken, ErrorHistory, ErrorMessage, MetricRegistry, MetricsSnapshot, OffsetStore,
    PipelineConfigBean, PipelineOptions, ProductionPipeline, ProductionSourceOffsetTracker,
    RunOutcome, StageRegistry,
};
use edge_state_store::{PipelineStore, StateStore};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Runtime parameters of the last start, replayed when the agent restarts
/// the pipeline.
pub const RUNTIME_PARAMETERS_ATTR: &str = "runtimeParameters";
/// Set on pipelines stopped by an agent shutdown.
pub const RESTART_ON_BOOT_ATTR: &str = "restartOnBoot";

pub type RuntimeParameters = JsonMap<String, JsonValue>;

/// Everything a runner needs besides its own state.
#[derive(Clone)]
pub struct RunnerServices {
    pub pipelines: Arc<PipelineStore>,
    pub states: Arc<StateStore>,
    pub offsets: Arc<dyn OffsetStore>,
    pub registry: Arc<StageRegistry>,
    pub agent_id: String,
    pub metrics_interval: Duration,
}

struct RunHandle {
    stop: CancellationToken,
    thread: JoinHandle<()>,
    publisher: Option<MetricsPublisher>,
}

impl RunHandle {
    fn join(self, pipeline_id: &str) {
        if self.thread.join().is_err() {
            error!(pipeline = %pipeline_id, "Pipeline thread panicked");
        }
        if let Some(publisher) = self.publisher {
            publisher.stop();
        }
    }
}

pub struct PipelineRunner {
    pipeline_id: String,
    services: RunnerServices,
    state: StateHandle,
    metrics: Mutex<MetricRegistry>,
    errors: Arc<Mutex<ErrorHistory>>,
    published: PublishedMetrics,
    worker: Mutex<Option<RunHandle>>,
}

impl PipelineRunner {
    /// Loads the persisted state, or records a fresh EDITED state.
    pub fn new(pipeline_id: impl Into<String>, services: RunnerServices) -> Result<Self, RunnerError> {
        let pipeline_id = pipeline_id.into();
        let state = match services.states.load_state(&pipeline_id)? {
            Some(state) => state,
            None => {
                let state = PipelineState::new(&pipeline_id, PipelineStatus::Edited);
                services.states.save_state(&state)?;
                state
            }
        };
        Ok(Self {
            state: StateHandle::new(services.states.clone(), state),
            pipeline_id,
            services,
            metrics: Mutex::new(MetricRegistry::new()),
            errors: Arc::new(Mutex::new(ErrorHistory::new(
                edge_protocol::defaults::DEFAULT_ERROR_HISTORY_SIZE,
            ))),
            published: PublishedMetrics::default(),
            worker: Mutex::new(None),
        })
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn status(&self) -> PipelineState {
        self.state.current()
    }

    pub fn is_remote(&self) -> bool {
        self.state.current().is_remote()
    }

    pub fn set_remote(&self, remote: bool) -> Result<(), RunnerError> {
        self.state.update(|state| state.set_remote(remote))?;
        Ok(())
    }

    /// Every saved state, newest first, starting with the current one.
    pub fn history(&self) -> Result<Vec<PipelineState>, RunnerError> {
        Ok(self.services.states.history(&self.pipeline_id)?)
    }

    pub fn delete_history(&self) -> Result<(), RunnerError> {
        Ok(self.services.states.delete_history(&self.pipeline_id)?)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        lock(&self.metrics).snapshot()
    }

    /// Last snapshot taken by the metrics publisher of a remote pipeline.
    pub fn published_metrics(&self) -> Option<String> {
        lock(&self.published).clone()
    }

    pub fn error_records(&self, stage: &str, n: usize) -> Vec<Record> {
        lock(&self.errors).records(stage, n)
    }

    pub fn error_messages(&self, stage: &str, n: usize) -> Vec<ErrorMessage> {
        lock(&self.errors).messages(stage, n)
    }

    pub fn offset(&self) -> Result<SourceOffset, RunnerError> {
        Ok(self.services.offsets.load_offset(&self.pipeline_id)?)
    }

    pub fn reset_offset(&self) -> Result<(), RunnerError> {
        let status = self.state.status();
        if status.blocks_offset_reset() {
            return Err(RunnerError::ResetRefused(status));
        }
        self.services.offsets.reset_offset(&self.pipeline_id)?;
        info!(pipeline = %self.pipeline_id, "Offset reset");
        Ok(())
    }

    pub fn commit_offset(&self, offset: &str) -> Result<(), RunnerError> {
        let status = self.state.status();
        if !status.allows_offset_commit() {
            return Err(RunnerError::CommitRefused(status));
        }
        let mut current = self.services.offsets.load_offset(&self.pipeline_id)?;
        current.set_poll_offset(Some(offset));
        self.services.offsets.save_offset(&self.pipeline_id, &current)?;
        info!(pipeline = %self.pipeline_id, offset = %offset, "Offset committed");
        Ok(())
    }

    /// Builds and initializes the pipeline, then runs it on its own thread.
    /// Initialization issues end in START_ERROR, which is returned as the
    /// new state rather than as an error.
    pub fn start(
        &self,
        user: &str,
        runtime_parameters: Option<RuntimeParameters>,
    ) -> Result<PipelineState, RunnerError> {
        let mut worker = lock(&self.worker);
        self.state.transition(PipelineStatus::Starting, None, |state| {
            state.user = Some(user.to_string());
            state.retry_attempt = 0;
            state.next_retry_time_stamp = 0;
            state.clear_issues();
            state.attributes.remove(RESTART_ON_BOOT_ATTR);
            match &runtime_parameters {
                Some(params) => {
                    state
                        .attributes
                        .insert(RUNTIME_PARAMETERS_ATTR.to_string(), JsonValue::Object(params.clone()));
                }
                None => {
                    state.attributes.remove(RUNTIME_PARAMETERS_ATTR);
                }
            }
        })?;
        if let Some(previous) = worker.take() {
            previous.join(&self.pipeline_id);
        }

        let metrics = MetricRegistry::new();
        *lock(&self.metrics) = metrics.clone();
        *lock(&self.published) = None;
        let job = RunJob {
            pipeline_id: self.pipeline_id.clone(),
            services: self.services.clone(),
            state: self.state.clone(),
            errors: self.errors.clone(),
            metrics: metrics.clone(),
            stop: CancellationToken::new(),
            user: user.to_string(),
            runtime_parameters,
        };

        let Some(mut pipeline) = job.prepare() else {
            return Ok(self.state.current());
        };
        let state = match self.state.transition(PipelineStatus::Running, None, |_| {}) {
            Ok(state) => state,
            Err(err) => {
                pipeline.destroy();
                return Err(err);
            }
        };

        let stop = job.stop.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("pipeline-{}", self.pipeline_id))
            .spawn(move || job.run(pipeline));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => {
                let message = format!("failed to spawn pipeline thread: {}", err);
                let _ = self
                    .state
                    .transition(PipelineStatus::RunningError, Some(message.clone()), |_| {});
                let _ = self.state.transition(PipelineStatus::RunError, Some(message), |_| {});
                return Err(err.into());
            }
        };

        let publisher = if state.is_remote() {
            MetricsPublisher::start(
                &self.pipeline_id,
                metrics,
                self.published.clone(),
                self.services.metrics_interval,
            )
            .map_err(|err| warn!(pipeline = %self.pipeline_id, error = %err, "Metrics publisher not started"))
            .ok()
        } else {
            None
        };
        *worker = Some(RunHandle {
            stop,
            thread,
            publisher,
        });
        info!(pipeline = %self.pipeline_id, user = %user, "Pipeline started");
        Ok(state)
    }

    /// Stops the loop and waits for it to record STOPPED.
    pub fn stop(&self) -> Result<PipelineState, RunnerError> {
        self.stop_with(|_| {})
    }

    /// Like [`PipelineRunner::stop`], but marks the pipeline for restart on
    /// the next boot.
    pub fn shutdown(&self) -> Result<PipelineState, RunnerError> {
        self.stop_with(|state| {
            state
                .attributes
                .insert(RESTART_ON_BOOT_ATTR.to_string(), JsonValue::Bool(true));
        })
    }

    fn stop_with(&self, update: impl FnOnce(&mut PipelineState)) -> Result<PipelineState, RunnerError> {
        let mut worker = lock(&self.worker);
        self.state.transition(PipelineStatus::Stopping, None, update)?;
        match worker.take() {
            Some(handle) => {
                handle.stop.cancel();
                handle.join(&self.pipeline_id);
            }
            None => {
                self.state.transition(PipelineStatus::Stopped, None, |_| {})?;
            }
        }
        info!(pipeline = %self.pipeline_id, "Pipeline stopped");
        Ok(self.state.current())
    }

    /// Forces a pipeline left active by a previous agent process to
    /// STOPPED.
    pub(crate) fn recover(&self, message: &str) -> Result<PipelineState, RunnerError> {
        self.state
            .force(PipelineStatus::Stopped, Some(message.to_string()))
    }

    /// Polls until the status leaves the active set or `timeout` passes,
    /// then reaps a loop thread that has exited.
    pub fn wait_inactive(&self, timeout: Duration) -> PipelineState {
        let deadline = Instant::now() + timeout;
        while self.state.status().is_active() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        let mut worker = lock(&self.worker);
        if !self.state.status().is_active() {
            if let Some(handle) = worker.take() {
                handle.join(&self.pipeline_id);
            }
        }
        self.state.current()
    }
}

impl fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("pipeline_id", &self.pipeline_id)
            .field("status", &self.state.status())
            .finish()
    }
}

/// Runtime parameters a state was started with.
pub fn runtime_parameters(state: &PipelineState) -> Option<RuntimeParameters> {
    match state.attributes.get(RUNTIME_PARAMETERS_ATTR) {
        Some(JsonValue::Object(params)) => Some(params.clone()),
        _ => None,
    }
}

fn as_issue(err: impl fmt::Display) -> Issue {
    Issue::pipeline(err.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Loop thread
// ============================================================================

struct RunJob {
    pipeline_id: String,
    services: RunnerServices,
    state: StateHandle,
    errors: Arc<Mutex<ErrorHistory>>,
    metrics: MetricRegistry,
    stop: CancellationToken,
    user: String,
    runtime_parameters: Option<RuntimeParameters>,
}

impl RunJob {
    /// Builds and initializes the pipeline, recording START_ERROR on
    /// failure.
    fn prepare(&self) -> Option<ProductionPipeline> {
        let mut pipeline = match self.build() {
            Ok(pipeline) => pipeline,
            Err(issue) => {
                self.start_error(vec![issue]);
                return None;
            }
        };
        let issues = pipeline.init();
        if issues.is_empty() {
            return Some(pipeline);
        }
        pipeline.destroy();
        self.start_error(issues);
        None
    }

    fn build(&self) -> Result<ProductionPipeline, Issue> {
        let config = self
            .services
            .pipelines
            .load(&self.pipeline_id)
            .map_err(as_issue)?;
        let tracker =
            ProductionSourceOffsetTracker::new(&self.pipeline_id, self.services.offsets.clone())
                .map_err(as_issue)?;
        let options = PipelineOptions {
            agent_id: self.services.agent_id.clone(),
            user: self.user.clone(),
            runtime_parameters: self.runtime_parameters.clone(),
            metrics: self.metrics.clone(),
            stop: self.stop.clone(),
        };
        let pipeline =
            ProductionPipeline::build(&config, &self.services.registry, Box::new(tracker), options)
                .map_err(as_issue)?;
        *lock(&self.errors) = pipeline.error_history();
        Ok(pipeline)
    }

    fn start_error(&self, issues: Vec<Issue>) {
        let message = issues.first().map(ToString::to_string);
        let issues = Issues::from_list(issues);
        warn!(
            pipeline = %self.pipeline_id,
            error = message.as_deref().unwrap_or(""),
            "Pipeline failed to start"
        );
        if let Err(err) = self
            .state
            .transition(PipelineStatus::StartError, message, |state| state.set_issues(&issues))
        {
            warn!(pipeline = %self.pipeline_id, error = %err, "Cannot record start error");
            self.stopped();
        }
    }

    fn run(self, mut pipeline: ProductionPipeline) {
        loop {
            let result = pipeline.run();
            pipeline.destroy();
            let message = match result {
                Ok(RunOutcome::Finished) if !self.stop.is_cancelled() => {
                    self.finished();
                    return;
                }
                Ok(_) => {
                    self.stopped();
                    return;
                }
                Err(err) if self.stop.is_cancelled() => {
                    warn!(pipeline = %self.pipeline_id, error = %err, "Pipeline failed while stopping");
                    self.stopped();
                    return;
                }
                Err(err) => err.to_string(),
            };
            error!(pipeline = %self.pipeline_id, error = %message, "Pipeline failed");
            match self.retry(pipeline.bean(), message) {
                Some(next) => pipeline = next,
                None => return,
            }
        }
    }

    fn finished(&self) {
        match self.state.transition(PipelineStatus::Finishing, None, |_| {}) {
            Ok(_) => {
                if let Err(err) = self.state.transition(PipelineStatus::Finished, None, |_| {}) {
                    error!(pipeline = %self.pipeline_id, error = %err, "Cannot record FINISHED");
                }
            }
            Err(_) => self.stopped(),
        }
    }

    fn stopped(&self) {
        if let Err(err) = self.state.transition(PipelineStatus::Stopped, None, |_| {}) {
            error!(pipeline = %self.pipeline_id, error = %err, "Cannot record STOPPED");
        }
    }

    /// RUNNING_ERROR, then either RETRY followed by a fresh build, or
    /// RUN_ERROR once the attempts are used up.
    fn retry(&self, bean: &PipelineConfigBean, message: String) -> Option<ProductionPipeline> {
        let state = match self
            .state
            .transition(PipelineStatus::RunningError, Some(message.clone()), |_| {})
        {
            Ok(state) => state,
            Err(_) => {
                self.stopped();
                return None;
            }
        };

        let attempts = state.retry_attempt;
        if !bean.can_retry(attempts) {
            if let Err(err) = self.state.transition(PipelineStatus::RunError, Some(message), |_| {}) {
                error!(pipeline = %self.pipeline_id, error = %err, "Cannot record RUN_ERROR");
            }
            return None;
        }

        let attempt = attempts + 1;
        let delay = bean.retry_delay(attempt);
        let next_retry = now_millis() + i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        let retried = self.state.transition(PipelineStatus::Retry, Some(message), |state| {
            state.retry_attempt = attempt;
            state.next_retry_time_stamp = next_retry;
        });
        if retried.is_err() {
            self.stopped();
            return None;
        }
        info!(pipeline = %self.pipeline_id, attempt, delay_ms = delay.as_millis() as u64, "Retrying pipeline");

        if !self.stop.sleep(delay)
            || self
                .state
                .transition(PipelineStatus::Starting, None, |_| {})
                .is_err()
        {
            self.stopped();
            return None;
        }
        let mut pipeline = self.prepare()?;
        if self.stop.is_cancelled()
            || self
                .state
                .transition(PipelineStatus::Running, None, |_| {})
                .is_err()
        {
            pipeline.destroy();
            self.stopped();
            return None;
        }
        Some(pipeline)
    }
}
