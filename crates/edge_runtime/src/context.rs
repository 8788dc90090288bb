//! What a stage sees of the pipeline while it runs.

use crate::cancel::CancellationToken;
use crate::config::{CommonStageConfig, ConfigReader, ErrorRecordPolicy, OnRecordError, COMMON_STAGE_OPTIONS};
use crate::el::{ElError, ElValue, EvalContext, Expression};
use crate::error::StageError;
use crate::metrics::MetricRegistry;
use crate::params::Parameters;
use crate::sinks::{ErrorMessage, ErrorSink, EventSink};
use crate::stage::StageInfo;
use edge_protocol::{now_millis, Config};
use edge_record::{ErrorInfo, Record};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Header attribute naming the type of an event record.
pub const EVENT_TYPE_ATTRIBUTE: &str = "edge.event.type";
pub const EVENT_VERSION_ATTRIBUTE: &str = "edge.event.version";
pub const EVENT_CREATION_ATTRIBUTE: &str = "edge.event.creation_timestamp";

pub type ServiceHandle = Arc<dyn Any + Send + Sync>;

/// State shared by every stage of one pipeline instance.
#[derive(Debug)]
pub struct PipelineShared {
    pipeline_id: String,
    title: String,
    agent_id: String,
    error_record_policy: ErrorRecordPolicy,
    preview: bool,
    metrics: MetricRegistry,
    stop: CancellationToken,
    error_sink: Mutex<ErrorSink>,
    event_sink: Mutex<EventSink>,
    originals: Mutex<HashMap<String, Record>>,
}

impl PipelineShared {
    pub fn new(
        pipeline_id: impl Into<String>,
        title: impl Into<String>,
        agent_id: impl Into<String>,
        error_record_policy: ErrorRecordPolicy,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            title: title.into(),
            agent_id: agent_id.into(),
            error_record_policy,
            preview: false,
            metrics: MetricRegistry::new(),
            stop: CancellationToken::new(),
            error_sink: Mutex::new(ErrorSink::new()),
            event_sink: Mutex::new(EventSink::new()),
            originals: Mutex::new(HashMap::new()),
        }
    }

    pub fn for_preview(mut self) -> Self {
        self.preview = true;
        self
    }

    pub fn with_stop_token(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn error_record_policy(&self) -> ErrorRecordPolicy {
        self.error_record_policy
    }

    pub fn is_preview(&self) -> bool {
        self.preview
    }

    pub fn metrics(&self) -> &MetricRegistry {
        &self.metrics
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn error_sink(&self) -> MutexGuard<'_, ErrorSink> {
        self.error_sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn event_sink(&self) -> MutexGuard<'_, EventSink> {
        self.event_sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resets the per-batch side channels.
    pub fn clear_batch(&self) {
        self.error_sink().clear();
        self.event_sink().clear();
        self.originals().clear();
    }

    /// Remembers the origin's version of each record, keyed by source id.
    pub(crate) fn remember_originals<'r>(&self, records: impl IntoIterator<Item = &'r Record>) {
        let mut originals = self.originals();
        for record in records {
            originals.insert(record.header().source_id().to_string(), record.clone());
        }
    }

    fn original(&self, source_id: &str) -> Option<Record> {
        self.originals().get(source_id).cloned()
    }

    fn originals(&self) -> MutexGuard<'_, HashMap<String, Record>> {
        self.originals.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-stage view handed to [`crate::stage::Stage`] calls.
pub struct StageContext {
    info: StageInfo,
    configs: Vec<Config>,
    parameters: Arc<Parameters>,
    services: HashMap<String, ServiceHandle>,
    common: CommonStageConfig,
    shared: Arc<PipelineShared>,
}

impl StageContext {
    pub fn new(
        info: StageInfo,
        configs: Vec<Config>,
        parameters: Arc<Parameters>,
        services: HashMap<String, ServiceHandle>,
        common: CommonStageConfig,
        shared: Arc<PipelineShared>,
    ) -> Self {
        Self {
            info,
            configs,
            parameters,
            services,
            common,
            shared,
        }
    }

    pub fn info(&self) -> &StageInfo {
        &self.info
    }

    pub fn instance_name(&self) -> &str {
        &self.info.instance_name
    }

    pub fn output_lanes(&self) -> &[String] {
        &self.info.output_lanes
    }

    /// Stage configuration with parameters already resolved.
    pub fn configs(&self) -> &[Config] {
        &self.configs
    }

    /// Reader over the stage's own options; the options every stage accepts
    /// are consumed by the runtime.
    pub fn config_reader(&self) -> ConfigReader<'_> {
        ConfigReader::new(&self.configs).ignoring(COMMON_STAGE_OPTIONS)
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn common(&self) -> &CommonStageConfig {
        &self.common
    }

    pub fn on_record_error(&self) -> OnRecordError {
        self.common.on_record_error
    }

    pub fn pipeline_id(&self) -> &str {
        self.shared.pipeline_id()
    }

    pub fn metrics(&self) -> &MetricRegistry {
        self.shared.metrics()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stop_token().is_cancelled()
    }

    pub fn stop_token(&self) -> &CancellationToken {
        self.shared.stop_token()
    }

    pub fn is_preview(&self) -> bool {
        self.shared.is_preview()
    }

    pub(crate) fn shared(&self) -> &Arc<PipelineShared> {
        &self.shared
    }

    /// Service registered under `key`, when it has type `T`.
    pub fn service<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.services.get(key)?.clone().downcast::<T>().ok()
    }

    // ------------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------------

    pub fn create_record(&self, source_id: impl Into<String>) -> Record {
        Record::with_source(self.info.instance_name.clone(), source_id)
    }

    pub fn create_event_record(
        &self,
        event_type: &str,
        version: u32,
        source_id: impl Into<String>,
    ) -> Record {
        let mut record = self.create_record(source_id);
        let header = record.header_mut();
        header.set_attribute(EVENT_TYPE_ATTRIBUTE, event_type);
        header.set_attribute(EVENT_VERSION_ATTRIBUTE, version.to_string());
        header.set_attribute(EVENT_CREATION_ATTRIBUTE, now_millis().to_string());
        record
    }

    /// Routes a failed record according to the stage's on-record-error
    /// policy. `StopPipeline` comes back as an error for `execute` to return.
    pub fn to_error(&self, record: Record, message: impl Into<String>) -> Result<(), StageError> {
        let message = message.into();
        match self.common.on_record_error {
            OnRecordError::Discard => {
                debug!(stage = %self.info.instance_name, error = %message, "Discarding record");
                Ok(())
            }
            OnRecordError::ToError => {
                self.push_error_record(record, message);
                Ok(())
            }
            OnRecordError::StopPipeline => Err(StageError::StopPipeline {
                stage: self.info.instance_name.clone(),
                message,
            }),
        }
    }

    pub(crate) fn push_error_record(&self, record: Record, message: String) {
        let mut record = match self.shared.error_record_policy() {
            ErrorRecordPolicy::StageRecord => record,
            ErrorRecordPolicy::OriginalRecord => {
                match self.shared.original(record.header().source_id()) {
                    Some(original) => {
                        let (header, _) = record.into_parts();
                        let (_, value) = original.into_parts();
                        Record::new(header, value)
                    }
                    None => record,
                }
            }
        };
        record.header_mut().set_error(ErrorInfo {
            data_collector_id: self.shared.agent_id().to_string(),
            pipeline_name: self.shared.pipeline_id().to_string(),
            stage: self.info.instance_name.clone(),
            message,
            timestamp: now_millis(),
        });
        self.shared
            .error_sink()
            .add_record(&self.info.instance_name, record);
    }

    /// Stage-level error not tied to a record. Never fatal.
    pub fn report_error(&self, message: impl Into<String>) {
        let message = ErrorMessage::new(self.info.instance_name.clone(), message);
        self.shared.error_sink().add_message(message);
    }

    pub fn to_event(&self, record: Record) {
        self.shared
            .event_sink()
            .add(&self.info.instance_name, record);
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    pub fn parse_expression(&self, source: &str) -> Result<Expression, ElError> {
        Expression::parse(source)
    }

    pub fn evaluate(&self, expression: &Expression, record: Option<&Record>) -> Result<ElValue, ElError> {
        let ctx = EvalContext::new(&self.parameters);
        match record {
            Some(record) => expression.evaluate(&ctx.with_record(record)),
            None => expression.evaluate(&ctx),
        }
    }

    pub fn evaluate_bool(&self, expression: &Expression, record: &Record) -> Result<bool, ElError> {
        expression.evaluate_bool(&EvalContext::new(&self.parameters).with_record(record))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::stage::StageKind;

    pub fn context(
        name: &str,
        kind: StageKind,
        configs: Vec<Config>,
        outputs: &[&str],
    ) -> StageContext {
        let shared = Arc::new(PipelineShared::new("p1", "Pipeline", "agent-1", ErrorRecordPolicy::StageRecord));
        context_with(name, kind, configs, outputs, shared)
    }

    pub fn context_with(
        name: &str,
        kind: StageKind,
        configs: Vec<Config>,
        outputs: &[&str],
        shared: Arc<PipelineShared>,
    ) -> StageContext {
        let common = CommonStageConfig::parse(&configs).unwrap_or_default();
        let info = StageInfo {
            instance_name: name.to_string(),
            library: "basic".to_string(),
            stage_name: name.to_string(),
            kind,
            input_lanes: Vec::new(),
            output_lanes: outputs.iter().map(|s| s.to_string()).collect(),
            event_lanes: Vec::new(),
        };
        StageContext::new(info, configs, Arc::new(Parameters::new()), HashMap::new(), common, shared)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::stage::StageKind;
    use edge_record::Field;

    #[test]
    fn test_to_error_follows_policy() {
        let ctx = context("p", StageKind::Processor, vec![], &["out"]);
        ctx.to_error(ctx.create_record("r1"), "bad value").unwrap();
        let sink = ctx.shared().error_sink();
        let record = &sink.records("p")[0];
        assert_eq!(record.header().error_stage(), Some("p"));
        assert_eq!(record.header().error_message(), Some("bad value"));
        assert_eq!(record.header().error_data_collector_id(), Some("agent-1"));
        assert_eq!(record.header().error_pipeline_name(), Some("p1"));
        drop(sink);

        let ctx = context(
            "q",
            StageKind::Processor,
            vec![Config::new("stageOnRecordError", "DISCARD")],
            &["out"],
        );
        ctx.to_error(ctx.create_record("r2"), "ignored").unwrap();
        assert_eq!(ctx.shared().error_sink().total_records(), 0);

        let ctx = context(
            "s",
            StageKind::Processor,
            vec![Config::new("stageOnRecordError", "STOP_PIPELINE")],
            &["out"],
        );
        assert!(matches!(
            ctx.to_error(ctx.create_record("r3"), "fatal"),
            Err(StageError::StopPipeline { .. })
        ));
    }

    #[test]
    fn test_original_record_policy_restores_origin_fields() {
        let shared = Arc::new(PipelineShared::new(
            "p1",
            "Pipeline",
            "agent-1",
            ErrorRecordPolicy::OriginalRecord,
        ));
        let ctx = context_with("p", StageKind::Processor, vec![], &["out"], shared.clone());

        let mut original = ctx.create_record("r1");
        original.set("/a", Field::long(1)).unwrap();
        shared.remember_originals([&original]);

        let mut modified = original.clone();
        modified.set("/a", Field::long(2)).unwrap();
        ctx.to_error(modified, "boom").unwrap();

        let sink = shared.error_sink();
        let record = &sink.records("p")[0];
        assert_eq!(record.get("/a").unwrap(), Some(&Field::long(1)));
        assert_eq!(record.header().error_message(), Some("boom"));
    }

    #[test]
    fn test_services_downcast_by_type() {
        let mut ctx = context("p", StageKind::Processor, vec![], &["out"]);
        ctx.services.insert("greeting".into(), Arc::new(String::from("hello")));
        assert_eq!(ctx.service::<String>("greeting").as_deref().map(String::as_str), Some("hello"));
        assert!(ctx.service::<u32>("greeting").is_none());
        assert!(ctx.service::<String>("missing").is_none());
    }

    #[test]
    fn test_event_record_attributes() {
        let ctx = context("o", StageKind::Origin, vec![], &["out"]);
        let event = ctx.create_event_record("new-file", 1, "e1");
        assert_eq!(event.header().attribute(EVENT_TYPE_ATTRIBUTE), Some("new-file"));
        assert_eq!(event.header().attribute(EVENT_VERSION_ATTRIBUTE), Some("1"));
        ctx.to_event(event);
        assert_eq!(ctx.shared().event_sink().records("o").len(), 1);
    }
}
