//! Preview runs: captured outputs, overrides, and the status they end in.

use edge_protocol::{PipelineConfiguration, PipelineInfo, StageConfiguration};
use edge_record::{Field, Header, Record};
use edge_runtime::stages::BASIC_LIBRARY;
use edge_runtime::{PreviewOptions, PreviewStatus, Previewer, StageOutput, StageRegistry};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn generator(batch_size: u64, records: u64, delay_millis: u64) -> StageConfiguration {
    StageConfiguration::new("gen", BASIC_LIBRARY, "dev_data_generator")
        .with_config("dataGenConfigs", json!([{"field": "n", "type": "LONG"}]))
        .with_config("batchSize", batch_size)
        .with_config("numberOfRecords", records)
        .with_config("delay", delay_millis)
        .with_outputs(["out"])
}

fn previewer(stages: Vec<StageConfiguration>) -> Arc<Previewer> {
    let mut config = PipelineConfiguration::new(PipelineInfo::new("p1", "Test", "", "admin"));
    config.stages = stages;
    Arc::new(Previewer::new(
        config,
        Arc::new(StageRegistry::with_builtin_stages()),
        "agent",
    ))
}

fn three_stages(origin: StageConfiguration) -> Vec<StageConfiguration> {
    vec![
        origin,
        StageConfiguration::new("id", BASIC_LIBRARY, "identity")
            .with_inputs(["out"])
            .with_outputs(["id_out"]),
        StageConfiguration::new("sink", BASIC_LIBRARY, "to_error").with_inputs(["id_out"]),
    ]
}

fn stage_names(batch: &[StageOutput]) -> Vec<&str> {
    batch.iter().map(|o| o.instance_name.as_str()).collect()
}

#[test]
fn test_captures_every_stage_until_origin_finishes() {
    let preview = previewer(three_stages(generator(10, 4, 0)));
    let options = PreviewOptions {
        batches: 10,
        batch_size: 3,
        ..Default::default()
    };
    let output = preview.run_sync(&options);

    assert_eq!(output.status, PreviewStatus::Finished);
    assert_eq!(output.batches_output.len(), 2);
    let first = &output.batches_output[0];
    assert_eq!(stage_names(first), vec!["gen", "id", "sink"]);
    assert_eq!(first[0].records("out").len(), 3);
    assert_eq!(first[1].records("id_out").len(), 3);
    assert_eq!(output.batches_output[1][0].records("out").len(), 1);
    // skipped target: nothing reached the error path
    assert!(first[2].error_records.is_empty());
}

#[test]
fn test_targets_run_when_not_skipped() {
    let preview = previewer(three_stages(generator(2, 2, 0)));
    let options = PreviewOptions {
        batches: 1,
        skip_targets: false,
        ..Default::default()
    };
    let output = preview.run_sync(&options);
    assert_eq!(output.status, PreviewStatus::Finished);
    assert_eq!(output.batches_output[0][2].error_records.len(), 2);
}

#[test]
fn test_end_stage_cuts_the_batch() {
    let preview = previewer(three_stages(generator(2, 0, 0)));
    let options = PreviewOptions {
        batches: 2,
        end_stage: Some("id".to_string()),
        ..Default::default()
    };
    let output = preview.run_sync(&options);
    assert_eq!(output.batches_output.len(), 2);
    assert_eq!(stage_names(&output.batches_output[0]), vec!["gen", "id"]);
}

#[test]
fn test_recorded_output_replaces_stage() {
    let preview = previewer(three_stages(generator(5, 0, 0)));
    let mut recorded = StageOutput::new("gen");
    let mut record = Record::new(Header::new("gen", "r1"), Field::map(Default::default()));
    record.set("/n", Field::long(42)).unwrap();
    recorded.output.insert("out".to_string(), vec![record]);

    let options = PreviewOptions {
        batches: 1,
        stage_outputs_to_override: vec![recorded],
        ..Default::default()
    };
    let output = preview.run_sync(&options);
    let passed = output.batches_output[0][1].records("id_out");
    assert_eq!(passed.len(), 1);
    assert_eq!(passed[0].get("/n").unwrap(), Some(&Field::long(42)));
}

#[test]
fn test_validate() {
    let valid = previewer(three_stages(generator(1, 0, 0)));
    assert_eq!(valid.validate().status, PreviewStatus::Valid);

    let bad_option = previewer(three_stages(generator(1, 0, 0).with_config("bogus", 1)));
    let output = bad_option.validate();
    assert_eq!(output.status, PreviewStatus::Invalid);
    assert!(!output.issues.is_empty());

    let no_origin = previewer(vec![
        StageConfiguration::new("sink", BASIC_LIBRARY, "trash").with_inputs(["out"]),
    ]);
    assert_eq!(no_origin.validate().status, PreviewStatus::ValidationError);
}

#[test]
fn test_init_issues_are_start_errors() {
    let preview = previewer(three_stages(generator(0, 0, 0)));
    let output = preview.run_sync(&PreviewOptions::default());
    assert_eq!(output.status, PreviewStatus::StartError);
    assert!(output.message.is_some());
    assert!(output.batches_output.is_empty());
}

#[test]
fn test_async_preview_can_be_cancelled() {
    let preview = previewer(three_stages(generator(1, 0, 200)));
    let options = PreviewOptions {
        batches: 100,
        timeout: Duration::from_secs(60),
        ..Default::default()
    };
    preview.start_async(options.clone()).unwrap();
    assert!(preview.start_async(options).is_err());

    std::thread::sleep(Duration::from_millis(50));
    preview.stop();
    preview.wait();
    assert_eq!(preview.status(), PreviewStatus::Cancelled);
}

#[test]
fn test_preview_times_out() {
    let preview = previewer(three_stages(generator(1, 0, 50)));
    let options = PreviewOptions {
        batches: 1000,
        timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let output = preview.run_sync(&options);
    assert_eq!(output.status, PreviewStatus::TimedOut);
    assert!(!output.batches_output.is_empty());
}
