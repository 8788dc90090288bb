//! Production pipeline: the batch loop over a pipe graph.

use crate::cancel::CancellationToken;
use crate::config::{DeliveryGuarantee, PipelineConfigBean};
use crate::context::PipelineShared;
use crate::error::PipelineError;
use crate::metrics::{Counter, MetricRegistry};
use crate::offset::SourceOffsetTracker;
use crate::params::build_parameters;
use crate::pipe::{PipeGraph, PIPELINE_START_EVENT, PIPELINE_STOP_EVENT};
use crate::registry::StageRegistry;
use crate::sinks::ErrorHistory;
use edge_protocol::defaults::DEFAULT_ERROR_HISTORY_SIZE;
use edge_protocol::{Issue, PipelineConfiguration};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why [`ProductionPipeline::run`] returned normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Stopped,
    Finished,
}

/// Inputs of a pipeline build beyond its configuration.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub agent_id: String,
    pub user: String,
    pub runtime_parameters: Option<JsonMap<String, JsonValue>>,
    pub metrics: MetricRegistry,
    pub stop: CancellationToken,
}

/// Counters published after every batch.
struct BatchCounters {
    batches: Counter,
    input_records: Counter,
    output_records: Counter,
    error_records: Counter,
    error_messages: Counter,
}

impl BatchCounters {
    fn new(metrics: &MetricRegistry) -> Self {
        Self {
            batches: metrics.counter("pipeline.batchCount"),
            input_records: metrics.counter("pipeline.batchInputRecords"),
            output_records: metrics.counter("pipeline.batchOutputRecords"),
            error_records: metrics.counter("pipeline.batchErrorRecords"),
            error_messages: metrics.counter("pipeline.batchErrorMessages"),
        }
    }
}

/// Result of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub input_records: usize,
    pub output_records: usize,
    pub error_records: usize,
    pub error_messages: usize,
}

pub struct ProductionPipeline {
    pipeline_id: String,
    user: String,
    bean: PipelineConfigBean,
    graph: PipeGraph,
    tracker: Box<dyn SourceOffsetTracker>,
    error_history: ErrorHistory,
    counters: BatchCounters,
    stop: CancellationToken,
    started: bool,
}

impl ProductionPipeline {
    pub fn build(
        config: &PipelineConfiguration,
        registry: &StageRegistry,
        tracker: Box<dyn SourceOffsetTracker>,
        options: PipelineOptions,
    ) -> Result<Self, PipelineError> {
        let bean = PipelineConfigBean::parse(&config.configuration)?;
        let parameters = Arc::new(build_parameters(
            &bean.constants,
            options.runtime_parameters.as_ref(),
        ));
        let shared = Arc::new(
            PipelineShared::new(
                config.pipeline_id.clone(),
                config.title.clone(),
                options.agent_id,
                bean.error_record_policy,
            )
            .with_metrics(options.metrics.clone())
            .with_stop_token(options.stop.clone()),
        );
        let graph = PipeGraph::build(config, registry, shared, parameters, false)?;
        Ok(Self {
            pipeline_id: config.pipeline_id.clone(),
            user: options.user,
            counters: BatchCounters::new(&options.metrics),
            bean,
            graph,
            tracker,
            error_history: ErrorHistory::new(DEFAULT_ERROR_HISTORY_SIZE),
            stop: options.stop,
            started: false,
        })
    }

    pub fn bean(&self) -> &PipelineConfigBean {
        &self.bean
    }

    pub fn error_history(&self) -> ErrorHistory {
        self.error_history.clone()
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn is_finished(&self) -> bool {
        self.tracker.is_finished()
    }

    pub fn committed_offset(&self) -> Option<&str> {
        self.tracker.offset()
    }

    /// Initializes every stage and, when that succeeds, notifies the start
    /// event stages. A non-empty result means the pipeline must not run.
    pub fn init(&mut self) -> Vec<Issue> {
        let issues = self.graph.init();
        if !issues.is_empty() {
            return issues;
        }
        match self.graph.run_lifecycle_stages(PIPELINE_START_EVENT, &self.user) {
            Ok(()) => {
                self.started = true;
                Vec::new()
            }
            Err(err) => vec![Issue::pipeline(err.to_string())],
        }
    }

    /// Runs batches until the stop token fires, the origin reports
    /// exhaustion, or a batch fails.
    pub fn run(&mut self) -> Result<RunOutcome, PipelineError> {
        info!(pipeline = %self.pipeline_id, "Pipeline running");
        loop {
            if self.stop.is_cancelled() {
                return Ok(RunOutcome::Stopped);
            }
            if self.tracker.is_finished() {
                info!(pipeline = %self.pipeline_id, "Origin exhausted");
                return Ok(RunOutcome::Finished);
            }
            let summary = self.run_batch()?;
            self.throttle(summary.input_records);
        }
    }

    /// One tick through the graph. The committed offset only moves once the
    /// whole batch, error stage included, went through (or right after the
    /// origin under at-most-once delivery).
    pub fn run_batch(&mut self) -> Result<BatchSummary, PipelineError> {
        let shared = self.graph.shared().clone();
        shared.clear_batch();

        let previous_offset = self.tracker.offset().map(str::to_string);
        let mut pipe_batch = self
            .graph
            .new_pipe_batch(self.bean.max_batch_size, previous_offset.clone());

        let mut staged = None;
        for index in 0..self.graph.len() {
            let offset = self.graph.run_stage(index, &mut pipe_batch)?;
            if index == 0 {
                staged = offset;
                if self.bean.delivery_guarantee == DeliveryGuarantee::AtMostOnce {
                    self.commit(staged.take())?;
                }
            }
        }

        self.graph.run_error_stage(previous_offset)?;
        {
            let sink = shared.error_sink();
            pipe_batch.set_error_counts(sink.total_records(), sink.total_messages());
            self.error_history.record_batch(&sink);
        }
        self.commit(staged)?;

        let summary = BatchSummary {
            input_records: pipe_batch.input_records(),
            output_records: pipe_batch.output_records(),
            error_records: pipe_batch.error_records(),
            error_messages: pipe_batch.error_messages(),
        };
        self.counters.batches.inc();
        self.counters.input_records.add(summary.input_records as u64);
        self.counters.output_records.add(summary.output_records as u64);
        self.counters.error_records.add(summary.error_records as u64);
        self.counters.error_messages.add(summary.error_messages as u64);
        debug!(
            pipeline = %self.pipeline_id,
            input = summary.input_records,
            output = summary.output_records,
            errors = summary.error_records,
            offset = ?self.tracker.offset(),
            "Batch complete"
        );
        Ok(summary)
    }

    fn commit(&mut self, offset: Option<String>) -> Result<(), PipelineError> {
        if let Some(offset) = offset {
            self.tracker.set_offset(offset);
            self.tracker.commit_offset()?;
        }
        Ok(())
    }

    /// Keeps the record rate at or below `rateLimit` records per second.
    fn throttle(&self, records: usize) {
        if self.bean.rate_limit == 0 || records == 0 {
            return;
        }
        let wait = Duration::from_secs_f64(records as f64 / self.bean.rate_limit as f64);
        self.stop.sleep(wait);
    }

    /// Releases every stage. The stop event stages only hear about
    /// pipelines whose start event went out.
    pub fn destroy(&mut self) {
        if std::mem::take(&mut self.started) {
            if let Err(err) = self.graph.run_lifecycle_stages(PIPELINE_STOP_EVENT, &self.user) {
                warn!(pipeline = %self.pipeline_id, error = %err, "Stop event stage failed");
            }
        }
        self.graph.destroy();
    }
}
