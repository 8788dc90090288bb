//! The stores working together on one base directory.

use edge_protocol::{EdgePaths, PipelineState, PipelineStatus, StageConfiguration};
use edge_runtime::stages::BASIC_LIBRARY;
use edge_runtime::{
    OffsetStore, PipelineOptions, ProductionPipeline, ProductionSourceOffsetTracker, StageRegistry,
};
use edge_state_store::{FileOffsetStore, PipelineStore, StateStore};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn build(
    store: &PipelineStore,
    offsets: Arc<dyn OffsetStore>,
    registry: &StageRegistry,
) -> ProductionPipeline {
    let config = store.load("p1").unwrap();
    let tracker = ProductionSourceOffsetTracker::new("p1", offsets).unwrap();
    let mut pipeline =
        ProductionPipeline::build(&config, registry, Box::new(tracker), PipelineOptions::default())
            .unwrap();
    assert!(pipeline.init().is_empty());
    pipeline
}

#[test]
fn test_offset_survives_restart() {
    let temp = TempDir::new().unwrap();
    let paths = EdgePaths::new(temp.path());
    paths.create_dirs().unwrap();
    let store = PipelineStore::new(paths.clone());
    let registry = StageRegistry::with_builtin_stages();

    let mut config = store.create("p1", "Counter", "", "admin").unwrap();
    config.stages = vec![
        StageConfiguration::new("gen", BASIC_LIBRARY, "dev_data_generator")
            .with_config("dataGenConfigs", json!([{"field": "v", "type": "INTEGER"}]))
            .with_config("batchSize", 5)
            .with_outputs(["out"]),
        StageConfiguration::new("trash", BASIC_LIBRARY, "trash").with_inputs(["out"]),
    ];
    store.save("admin", config).unwrap();

    let offsets: Arc<dyn OffsetStore> = Arc::new(FileOffsetStore::new(paths.clone()));
    let mut first = build(&store, offsets.clone(), &registry);
    first.run_batch().unwrap();
    first.run_batch().unwrap();
    first.destroy();

    let reopened: Arc<dyn OffsetStore> = Arc::new(FileOffsetStore::new(paths.clone()));
    let mut second = build(&store, reopened, &registry);
    assert_eq!(second.committed_offset(), Some("10"));
    second.run_batch().unwrap();
    assert_eq!(offsets.load_offset("p1").unwrap().poll_offset(), Some("15"));
}

#[test]
fn test_delete_clears_state_and_offset() {
    let temp = TempDir::new().unwrap();
    let paths = EdgePaths::new(temp.path());
    let pipelines = PipelineStore::new(paths.clone());
    let states = StateStore::new(paths.clone());
    let offsets = FileOffsetStore::new(paths.clone());

    pipelines.create("p1", "A", "", "admin").unwrap();
    states
        .save_state(&PipelineState::new("p1", PipelineStatus::Edited))
        .unwrap();
    offsets
        .save_offset("p1", &edge_protocol::SourceOffset::from_poll_offset(Some("3")))
        .unwrap();

    pipelines.delete("p1").unwrap();
    assert_eq!(states.load_state("p1").unwrap(), None);
    assert!(states.history("p1").unwrap().is_empty());
    assert_eq!(offsets.load_offset("p1").unwrap().poll_offset(), None);
}
