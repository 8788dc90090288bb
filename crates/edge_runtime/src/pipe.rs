//! Stage runtimes and the pipe graph that wires them together.
//!
//! The graph is built from a flattened stage list whose order is already a
//! topological order (every input lane is produced by an earlier stage), so
//! running the pipes in list order respects every lane dependency.

use crate::batch::{Batch, BatchMaker, PipeBatch, StageOutput};
use crate::config::{CommonStageConfig, ErrorRecordPolicy};
use crate::context::{PipelineShared, ServiceHandle, StageContext};
use crate::el::Expression;
use crate::error::{PipelineError, StageError};
use crate::metrics::{Counter, Timer};
use crate::params::{resolve_configs, Parameters};
use crate::registry::StageRegistry;
use crate::stage::{Stage, StageInfo, StageKind};
use edge_protocol::{validate_stage_wiring, Issue, PipelineConfiguration, StageConfiguration};
use edge_record::{parse_field_path, Field, Record};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub const PIPELINE_START_EVENT: &str = "pipeline-start";
pub const PIPELINE_STOP_EVENT: &str = "pipeline-stop";

// ============================================================================
// Stage runtime
// ============================================================================

/// One stage instance with its context and the checks the runtime applies
/// around every `execute` call.
pub struct StageRuntime {
    stage: Box<dyn Stage>,
    context: StageContext,
    build_issues: Vec<Issue>,
    preconditions: Vec<Expression>,
    input_records: Counter,
    output_records: Counter,
    batch_timer: Timer,
}

impl StageRuntime {
    fn new(stage: Box<dyn Stage>, context: StageContext, build_issues: Vec<Issue>) -> Self {
        let metrics = context.metrics();
        let prefix = format!("stage.{}", context.instance_name());
        Self {
            input_records: metrics.counter(&format!("{}.inputRecords", prefix)),
            output_records: metrics.counter(&format!("{}.outputRecords", prefix)),
            batch_timer: metrics.timer(&format!("{}.batchProcessing", prefix)),
            stage,
            context,
            build_issues,
            preconditions: Vec::new(),
        }
    }

    pub fn info(&self) -> &StageInfo {
        self.context.info()
    }

    pub fn context(&self) -> &StageContext {
        &self.context
    }

    pub fn init(&mut self) -> Vec<Issue> {
        let mut issues = std::mem::take(&mut self.build_issues);
        let name = self.context.instance_name().to_string();

        for field in &self.context.common().required_fields {
            if let Err(err) = parse_field_path(field) {
                issues.push(
                    Issue::stage(&name, format!("invalid required field '{}': {}", field, err))
                        .with_config(crate::config::REQUIRED_FIELDS_CONFIG),
                );
            }
        }
        self.preconditions.clear();
        for source in &self.context.common().preconditions {
            match Expression::parse(source) {
                Ok(expression) => self.preconditions.push(expression),
                Err(err) => issues.push(
                    Issue::stage(&name, err.to_string())
                        .with_config(crate::config::PRECONDITIONS_CONFIG),
                ),
            }
        }

        issues.extend(self.stage.init(&self.context));
        issues
    }

    /// Runs the stage on `batch`. Origins always return an offset, with the
    /// empty string standing for an exhausted source.
    pub fn execute(
        &mut self,
        batch: Batch,
        maker: &mut BatchMaker,
    ) -> Result<Option<String>, StageError> {
        let started = Instant::now();
        let capabilities = self.info().capabilities();
        let batch = if capabilities.consumes {
            self.input_records.add(batch.size() as u64);
            self.filter_batch(batch)?
        } else {
            batch
        };

        let offset = self.stage.execute(&self.context, batch, maker)?;
        self.output_records.add(maker.size() as u64);
        self.batch_timer.record_since(started);

        if capabilities.commits_offset {
            Ok(Some(offset.unwrap_or_default()))
        } else {
            Ok(None)
        }
    }

    /// Sends records lacking a required field or failing a precondition to
    /// the error path before the stage sees them.
    fn filter_batch(&self, batch: Batch) -> Result<Batch, StageError> {
        let required = &self.context.common().required_fields;
        if required.is_empty() && self.preconditions.is_empty() {
            return Ok(batch);
        }
        let offset = batch.source_offset().map(str::to_string);
        let mut passed = Vec::with_capacity(batch.size());
        for record in batch {
            let missing: Vec<&str> = required
                .iter()
                .filter(|field| !record.has(field).unwrap_or(false))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                let message = format!("missing required fields: {}", missing.join(", "));
                self.context.to_error(record, message)?;
                continue;
            }
            match self.failed_precondition(&record) {
                Some(message) => self.context.to_error(record, message)?,
                None => passed.push(record),
            }
        }
        Ok(Batch::new(offset, passed))
    }

    fn failed_precondition(&self, record: &Record) -> Option<String> {
        for precondition in &self.preconditions {
            match self.context.evaluate_bool(precondition, record) {
                Ok(true) => {}
                Ok(false) => {
                    return Some(format!("unsatisfied precondition '{}'", precondition.source()))
                }
                Err(err) => {
                    return Some(format!(
                        "failed to evaluate precondition '{}': {}",
                        precondition.source(),
                        err
                    ))
                }
            }
        }
        None
    }

    pub fn destroy(&mut self) {
        self.stage.destroy(&self.context);
    }
}

// ============================================================================
// Pipe graph
// ============================================================================

pub struct PipeGraph {
    pipes: Vec<StageRuntime>,
    error_stage: Option<StageRuntime>,
    start_event_stages: Vec<StageRuntime>,
    stop_event_stages: Vec<StageRuntime>,
    lane_consumers: HashMap<String, usize>,
    shared: Arc<PipelineShared>,
}

impl PipeGraph {
    /// Builds the graph from `config` (fragments are flattened here). With
    /// `use_test_origin`, the configured test origin takes the place of the
    /// pipeline origin and inherits its output lanes.
    pub fn build(
        config: &PipelineConfiguration,
        registry: &StageRegistry,
        shared: Arc<PipelineShared>,
        parameters: Arc<Parameters>,
        use_test_origin: bool,
    ) -> Result<Self, PipelineError> {
        let mut config = config.clone();
        config.process_fragment_stages()?;
        validate_stage_wiring(&config.stages)?;

        if use_test_origin {
            substitute_test_origin(&mut config);
        }

        let mut kinds = Vec::with_capacity(config.stages.len());
        for stage in &config.stages {
            kinds.push(stage_kind(registry, stage)?);
        }
        check_topology(&config.stages, &kinds)?;

        let factory = RuntimeFactory {
            registry,
            shared: &shared,
            parameters: &parameters,
        };
        let mut pipes = Vec::with_capacity(config.stages.len());
        for (stage, kind) in config.stages.iter().zip(&kinds) {
            pipes.push(factory.create(stage, *kind)?);
        }

        let error_stage = match &config.error_stage {
            Some(stage) => {
                let kind = stage_kind(registry, stage)?;
                if kind != StageKind::Target {
                    return Err(PipelineError::ErrorStageNotTarget(stage.instance_name.clone()));
                }
                Some(factory.create(&detached(stage), kind)?)
            }
            None => None,
        };
        let start_event_stages = factory.create_event_stages(&config.start_event_stages)?;
        let stop_event_stages = factory.create_event_stages(&config.stop_event_stages)?;

        let mut lane_consumers: HashMap<String, usize> = HashMap::new();
        for stage in &config.stages {
            for lane in &stage.input_lanes {
                *lane_consumers.entry(lane.clone()).or_default() += 1;
            }
        }

        debug!(
            pipeline = %shared.pipeline_id(),
            stages = pipes.len(),
            error_stage = error_stage.is_some(),
            "Built pipe graph"
        );
        Ok(Self {
            pipes,
            error_stage,
            start_event_stages,
            stop_event_stages,
            lane_consumers,
            shared,
        })
    }

    pub fn shared(&self) -> &Arc<PipelineShared> {
        &self.shared
    }

    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    pub fn info(&self, index: usize) -> &StageInfo {
        self.pipes[index].info()
    }

    pub fn infos(&self) -> impl Iterator<Item = &StageInfo> {
        self.pipes.iter().map(StageRuntime::info)
    }

    pub fn position(&self, instance_name: &str) -> Option<usize> {
        self.pipes
            .iter()
            .position(|p| p.info().instance_name == instance_name)
    }

    pub fn new_pipe_batch(&self, max_batch_size: usize, previous_offset: Option<String>) -> PipeBatch {
        PipeBatch::new(&self.lane_consumers, max_batch_size, previous_offset)
    }

    /// Initializes every stage, returning all issues found.
    pub fn init(&mut self) -> Vec<Issue> {
        let mut issues = Vec::new();
        for runtime in self.all_runtimes_mut() {
            issues.extend(runtime.init());
        }
        issues
    }

    pub fn destroy(&mut self) {
        for runtime in self.all_runtimes_mut() {
            runtime.destroy();
        }
    }

    fn all_runtimes_mut(&mut self) -> impl Iterator<Item = &mut StageRuntime> {
        self.pipes
            .iter_mut()
            .chain(self.error_stage.iter_mut())
            .chain(self.start_event_stages.iter_mut())
            .chain(self.stop_event_stages.iter_mut())
    }

    /// Runs pipe `index` against `pipe_batch`. Returns the staged offset for
    /// the origin and `None` for every other stage.
    pub fn run_stage(
        &mut self,
        index: usize,
        pipe_batch: &mut PipeBatch,
    ) -> Result<Option<String>, PipelineError> {
        let runtime = &mut self.pipes[index];
        let info = runtime.info().clone();
        let batch = pipe_batch.get_batch(&info);
        let mut maker = pipe_batch.start_stage(&info);
        let offset = runtime
            .execute(batch, &mut maker)
            .map_err(|err| PipelineError::stage(&info.instance_name, err))?;

        if info.kind == StageKind::Origin
            && self.shared.error_record_policy() == ErrorRecordPolicy::OriginalRecord
        {
            let originals = info
                .output_lanes
                .iter()
                .flat_map(|lane| maker.lane_records(lane).iter());
            self.shared.remember_originals(originals);
        }
        pipe_batch.complete_stage(&info, maker);
        self.collect_side_channels(&info, pipe_batch);
        Ok(offset)
    }

    /// Drains the input of pipe `index` without running it.
    pub fn skip_stage(&mut self, index: usize, pipe_batch: &mut PipeBatch) {
        let info = self.pipes[index].info();
        let _ = pipe_batch.get_batch(info);
        let maker = pipe_batch.start_stage(info);
        pipe_batch.complete_stage(info, maker);
    }

    /// Replays recorded output for pipe `index` instead of running it.
    pub fn override_stage(&mut self, index: usize, pipe_batch: &mut PipeBatch, recorded: &StageOutput) {
        let info = self.pipes[index].info();
        let _ = pipe_batch.get_batch(info);
        pipe_batch.override_stage_output(info, recorded);
    }

    fn collect_side_channels(&self, info: &StageInfo, pipe_batch: &mut PipeBatch) {
        let events = self.shared.event_sink().records(&info.instance_name).to_vec();
        pipe_batch.add_events(info, events);
        if let Some(snapshot) = pipe_batch.snapshot_mut(&info.instance_name) {
            let sink = self.shared.error_sink();
            snapshot.error_records = sink.records(&info.instance_name).to_vec();
            snapshot.stage_errors = sink.messages(&info.instance_name).to_vec();
        }
    }

    /// Hands the batch's error records to the error stage, as one batch
    /// carrying the offset the pipeline had before the batch. Returns the
    /// number of records delivered.
    pub fn run_error_stage(&mut self, previous_offset: Option<String>) -> Result<usize, PipelineError> {
        let records = self.shared.error_sink().all_records();
        let Some(runtime) = self.error_stage.as_mut() else {
            return Ok(0);
        };
        if records.is_empty() {
            return Ok(0);
        }
        let count = records.len();
        let name = runtime.info().instance_name.clone();
        let mut maker = BatchMaker::new(name.clone(), &[]);
        runtime
            .execute(Batch::new(previous_offset, records), &mut maker)
            .map_err(|err| PipelineError::stage(name, err))?;
        Ok(count)
    }

    /// Sends a lifecycle event record to the start or stop event stages.
    pub fn run_lifecycle_stages(&mut self, event_type: &str, user: &str) -> Result<(), PipelineError> {
        let stages = if event_type == PIPELINE_START_EVENT {
            &mut self.start_event_stages
        } else {
            &mut self.stop_event_stages
        };
        for runtime in stages.iter_mut() {
            let name = runtime.info().instance_name.clone();
            let mut record = runtime.context().create_event_record(
                event_type,
                1,
                format!("{}:{}", self.shared.pipeline_id(), event_type),
            );
            let mut fields = IndexMap::new();
            fields.insert("pipelineId".to_string(), Field::string(self.shared.pipeline_id()));
            fields.insert("pipelineTitle".to_string(), Field::string(self.shared.title()));
            fields.insert("user".to_string(), Field::string(user));
            record.set_root(Field::list_map(fields));

            let mut maker = BatchMaker::new(name.clone(), &[]);
            runtime
                .execute(Batch::new(None, vec![record]), &mut maker)
                .map_err(|err| PipelineError::stage(name, err))?;
        }
        Ok(())
    }
}

// ============================================================================
// Build helpers
// ============================================================================

struct RuntimeFactory<'a> {
    registry: &'a StageRegistry,
    shared: &'a Arc<PipelineShared>,
    parameters: &'a Arc<Parameters>,
}

impl RuntimeFactory<'_> {
    fn create(&self, config: &StageConfiguration, kind: StageKind) -> Result<StageRuntime, PipelineError> {
        let definition = self
            .registry
            .get(&config.library, &config.stage_name)
            .ok_or_else(|| unknown_stage(config))?;
        let name = config.instance_name.clone();
        let configs = resolve_configs(&config.configuration, self.parameters);

        let mut issues = Vec::new();
        let common = CommonStageConfig::parse(&configs).unwrap_or_else(|err| {
            issues.push(err.to_issue(Some(&name)));
            CommonStageConfig::default()
        });

        let mut services: HashMap<String, ServiceHandle> = HashMap::new();
        for service in &config.services {
            let Some(factory) = self.registry.service(&service.service) else {
                issues.push(Issue::service(&name, &service.service, "service is not available"));
                continue;
            };
            let service_configs = resolve_configs(&service.configuration, self.parameters);
            match factory(&service_configs) {
                Ok(handle) => {
                    services.insert(service.service.clone(), handle);
                }
                Err(err) => {
                    warn!(stage = %name, service = %service.service, error = %err, "Service creation failed");
                    issues.push(Issue::service(&name, &service.service, err.to_string()));
                }
            }
        }

        let context = StageContext::new(
            StageInfo::from_config(config, kind),
            configs,
            self.parameters.clone(),
            services,
            common,
            self.shared.clone(),
        );
        Ok(StageRuntime::new(definition.create(), context, issues))
    }

    fn create_event_stages(&self, stages: &[StageConfiguration]) -> Result<Vec<StageRuntime>, PipelineError> {
        let mut runtimes = Vec::with_capacity(stages.len());
        for stage in stages {
            let kind = stage_kind(self.registry, stage)?;
            if kind != StageKind::Target {
                return Err(PipelineError::InvalidLanes {
                    stage: stage.instance_name.clone(),
                    reason: "lifecycle event stages must be targets".to_string(),
                });
            }
            runtimes.push(self.create(&detached(stage), kind)?);
        }
        Ok(runtimes)
    }
}

fn unknown_stage(config: &StageConfiguration) -> PipelineError {
    PipelineError::UnknownStage {
        stage: config.instance_name.clone(),
        definition: config.definition_key(),
    }
}

fn stage_kind(registry: &StageRegistry, config: &StageConfiguration) -> Result<StageKind, PipelineError> {
    registry
        .get(&config.library, &config.stage_name)
        .map(|d| d.kind)
        .ok_or_else(|| unknown_stage(config))
}

/// Stages outside the main graph take no lanes.
fn detached(config: &StageConfiguration) -> StageConfiguration {
    let mut config = config.clone();
    config.input_lanes.clear();
    config.output_lanes.clear();
    config.event_lanes.clear();
    config
}

fn substitute_test_origin(config: &mut PipelineConfiguration) {
    let Some(mut test_origin) = config.test_origin_stage.clone() else {
        return;
    };
    let Some(origin) = config.stages.first_mut() else {
        return;
    };
    test_origin.input_lanes.clear();
    test_origin.output_lanes = origin.output_lanes.clone();
    test_origin.event_lanes = origin.event_lanes.clone();
    *origin = test_origin;
}

/// Exactly one origin, listed first; lanes consistent with each kind.
fn check_topology(stages: &[StageConfiguration], kinds: &[StageKind]) -> Result<(), PipelineError> {
    let origins: Vec<String> = stages
        .iter()
        .zip(kinds)
        .filter(|(_, kind)| **kind == StageKind::Origin)
        .map(|(stage, _)| stage.instance_name.clone())
        .collect();
    match origins.len() {
        0 => return Err(PipelineError::MissingOrigin),
        1 => {}
        _ => return Err(PipelineError::MultipleOrigins(origins)),
    }
    if kinds[0] != StageKind::Origin {
        return Err(PipelineError::InvalidLanes {
            stage: origins[0].clone(),
            reason: "the origin must be the first stage".to_string(),
        });
    }

    for (stage, kind) in stages.iter().zip(kinds) {
        let capabilities = kind.capabilities();
        let reason = if !capabilities.consumes && !stage.input_lanes.is_empty() {
            Some("an origin cannot have input lanes")
        } else if capabilities.consumes && stage.input_lanes.is_empty() {
            Some("at least one input lane is required")
        } else if !capabilities.produces && !stage.output_lanes.is_empty() {
            Some("a target cannot have output lanes")
        } else if capabilities.produces && stage.output_lanes.is_empty() {
            Some("at least one output lane is required")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(PipelineError::InvalidLanes {
                stage: stage.instance_name.clone(),
                reason: reason.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_protocol::{PipelineInfo, ProtocolError};

    fn shared() -> Arc<PipelineShared> {
        Arc::new(PipelineShared::new("p1", "Test", "agent", ErrorRecordPolicy::StageRecord))
    }

    fn pipeline(stages: Vec<StageConfiguration>) -> PipelineConfiguration {
        let mut config = PipelineConfiguration::new(PipelineInfo::new("p1", "Test", "", "admin"));
        config.stages = stages;
        config
    }

    fn build(config: &PipelineConfiguration) -> Result<PipeGraph, PipelineError> {
        PipeGraph::build(
            config,
            &StageRegistry::with_builtin_stages(),
            shared(),
            Arc::new(Parameters::new()),
            false,
        )
    }

    fn generator(name: &str, outputs: &[&str]) -> StageConfiguration {
        StageConfiguration::new(name, "basic", "dev_data_generator")
            .with_outputs(outputs.iter().copied())
            .with_config("batchSize", 3)
            .with_config(
                "dataGenConfigs",
                serde_json::json!([{"field": "n", "type": "LONG"}]),
            )
    }

    fn trash(name: &str, inputs: &[&str]) -> StageConfiguration {
        StageConfiguration::new(name, "basic", "trash").with_inputs(inputs.iter().copied())
    }

    #[test]
    fn test_build_rejects_bad_graphs() {
        let no_origin = pipeline(vec![StageConfiguration::new("t", "basic", "trash")]);
        assert!(matches!(build(&no_origin), Err(PipelineError::MissingOrigin)));

        let two_origins = pipeline(vec![generator("a", &["a_out"]), generator("b", &["b_out"])]);
        assert!(matches!(build(&two_origins), Err(PipelineError::MultipleOrigins(names)) if names == vec!["a", "b"]));

        let unknown = pipeline(vec![
            generator("o", &["o_out"]),
            StageConfiguration::new("x", "basic", "nope").with_inputs(["o_out"]),
        ]);
        assert!(matches!(build(&unknown), Err(PipelineError::UnknownStage { definition, .. }) if definition == "basic::nope"));

        let duplicate = pipeline(vec![generator("o", &["o_out"]), trash("o", &["o_out"])]);
        assert!(matches!(
            build(&duplicate),
            Err(PipelineError::Wiring(ProtocolError::DuplicateStage(_)))
        ));

        let cycle = pipeline(vec![
            generator("o", &["o_out"]),
            StageConfiguration::new("p", "basic", "identity")
                .with_inputs(["q_out"])
                .with_outputs(["p_out"]),
            StageConfiguration::new("q", "basic", "identity")
                .with_inputs(["p_out"])
                .with_outputs(["q_out"]),
        ]);
        assert!(matches!(
            build(&cycle),
            Err(PipelineError::Wiring(ProtocolError::UnknownInputLane { .. }))
        ));

        let mut bad_error_stage = pipeline(vec![generator("o", &["o_out"]), trash("t", &["o_out"])]);
        bad_error_stage.error_stage = Some(StageConfiguration::new("err", "basic", "identity"));
        assert!(matches!(
            build(&bad_error_stage),
            Err(PipelineError::ErrorStageNotTarget(name)) if name == "err"
        ));
    }

    #[test]
    fn test_lane_consumers_and_positions() {
        let config = pipeline(vec![
            generator("o", &["o_out"]),
            trash("t1", &["o_out"]),
            trash("t2", &["o_out"]),
        ]);
        let graph = build(&config).unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.lane_consumers.get("o_out"), Some(&2));
        assert_eq!(graph.position("t2"), Some(2));
        assert_eq!(graph.info(0).kind, StageKind::Origin);
    }

    #[test]
    fn test_init_reports_config_issues() {
        let config = pipeline(vec![
            generator("o", &["o_out"]),
            trash("t", &["o_out"])
                .with_config("stageRecordPreconditions", serde_json::json!(["${record:value('/a' >"]))
                .with_config("bogus", 1),
        ]);
        let mut graph = build(&config).unwrap();
        let issues = graph.init();
        assert_eq!(issues.len(), 2, "{:?}", issues);
        assert!(issues.iter().all(|i| i.instance_name.as_deref() == Some("t")));
        assert_eq!(issues[0].config_name.as_deref(), Some("stageRecordPreconditions"));
        assert_eq!(issues[1].config_name.as_deref(), Some("bogus"));
    }

    #[test]
    fn test_preconditions_route_records_to_error() {
        let config = pipeline(vec![
            generator("o", &["o_out"]),
            trash("t", &["o_out"])
                .with_config("stageRecordPreconditions", serde_json::json!(["${record:exists('/missing')}"])),
        ]);
        let mut graph = build(&config).unwrap();
        assert!(graph.init().is_empty());

        let mut pipe_batch = graph.new_pipe_batch(3, None);
        let offset = graph.run_stage(0, &mut pipe_batch).unwrap();
        assert_eq!(offset.as_deref(), Some("3"));
        graph.run_stage(1, &mut pipe_batch).unwrap();
        assert_eq!(graph.shared().error_sink().records("t").len(), 3);
        assert_eq!(
            graph.shared().error_sink().records("t")[0].header().error_message(),
            Some("unsatisfied precondition '${record:exists('/missing')}'")
        );
    }

    #[test]
    fn test_test_origin_takes_origin_lanes() {
        let mut config = pipeline(vec![generator("o", &["o_out"]), trash("t", &["o_out"])]);
        config.test_origin_stage = Some(
            StageConfiguration::new("raw", "basic", "dev_raw_data")
                .with_config("rawData", "{\"a\":1}\n{\"a\":2}"),
        );
        let mut graph = PipeGraph::build(
            &config,
            &StageRegistry::with_builtin_stages(),
            shared(),
            Arc::new(Parameters::new()),
            true,
        )
        .unwrap();
        assert_eq!(graph.info(0).instance_name, "raw");
        assert_eq!(graph.info(0).output_lanes, vec!["o_out"]);
        assert!(graph.init().is_empty());

        let mut pipe_batch = graph.new_pipe_batch(10, None);
        graph.run_stage(0, &mut pipe_batch).unwrap();
        assert_eq!(pipe_batch.lane("o_out").len(), 2);
    }
}
