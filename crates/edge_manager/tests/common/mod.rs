//! Shared fixture: file stores in a temp dir plus a registry with a stage
//! that fails every record.

#![allow(dead_code)]

use edge_manager::{PipelineManager, RunnerServices};
use edge_protocol::{EdgePaths, PipelineState, PipelineStatus, StageConfiguration};
use edge_runtime::stages::BASIC_LIBRARY;
use edge_runtime::{
    Batch, BatchMaker, OffsetStore, Stage, StageContext, StageDefinition, StageError, StageKind,
    StageRegistry,
};
use edge_state_store::{FileOffsetStore, PipelineStore, StateStore};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const TEST_LIBRARY: &str = "test";

/// Processor sending every record to error.
struct RejectAll;

impl Stage for RejectAll {
    fn execute(
        &mut self,
        ctx: &StageContext,
        batch: Batch,
        _maker: &mut BatchMaker,
    ) -> Result<Option<String>, StageError> {
        for record in batch {
            ctx.to_error(record, "record rejected")?;
        }
        Ok(None)
    }
}

pub struct Fixture {
    pub temp: TempDir,
    pub paths: EdgePaths,
    pub services: RunnerServices,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let paths = EdgePaths::new(temp.path());
        paths.create_dirs().unwrap();
        let mut registry = StageRegistry::with_builtin_stages();
        registry.register(StageDefinition::new(
            TEST_LIBRARY,
            "reject",
            StageKind::Processor,
            "Reject",
            || RejectAll,
        ));
        let offsets: Arc<dyn OffsetStore> = Arc::new(FileOffsetStore::new(paths.clone()));
        let services = RunnerServices {
            pipelines: Arc::new(PipelineStore::new(paths.clone())),
            states: Arc::new(StateStore::new(paths.clone())),
            offsets,
            registry: Arc::new(registry),
            agent_id: "agent-1".to_string(),
            metrics_interval: Duration::from_millis(50),
        };
        Self {
            temp,
            paths,
            services,
        }
    }

    pub fn manager(&self) -> PipelineManager {
        PipelineManager::with_services(self.services.clone())
    }

    /// Stores pipeline `id` with `stages` and pipeline-level `configs`.
    pub fn store(&self, id: &str, stages: Vec<StageConfiguration>, configs: &[(&str, JsonValue)]) {
        let mut config = self
            .services
            .pipelines
            .create(id, "Test pipeline", "", "admin")
            .unwrap();
        config.stages = stages;
        for (name, value) in configs {
            config.set_config(name, value.clone());
        }
        self.services.pipelines.save("admin", config).unwrap();
    }
}

/// Origin producing `records` records (unbounded when 0), one per
/// `delay_ms`.
pub fn generator(batch_size: u64, records: u64, delay_ms: u64) -> StageConfiguration {
    StageConfiguration::new("gen", BASIC_LIBRARY, "dev_data_generator")
        .with_config("dataGenConfigs", json!([{"field": "n", "type": "LONG"}]))
        .with_config("batchSize", batch_size)
        .with_config("numberOfRecords", records)
        .with_config("delay", delay_ms)
        .with_outputs(["out"])
}

pub fn trash(lane: &str) -> StageConfiguration {
    StageConfiguration::new("trash", BASIC_LIBRARY, "trash").with_inputs([lane])
}

/// Target sending every record to the error sink.
pub fn to_error(lane: &str) -> StageConfiguration {
    StageConfiguration::new("to_error", BASIC_LIBRARY, "to_error").with_inputs([lane])
}

pub fn reject() -> StageConfiguration {
    StageConfiguration::new("reject", TEST_LIBRARY, "reject")
        .with_config("stageOnRecordError", "STOP_PIPELINE")
        .with_inputs(["out"])
        .with_outputs(["kept"])
}

pub fn statuses(history: &[PipelineState]) -> Vec<PipelineStatus> {
    history.iter().rev().map(|state| state.status).collect()
}
