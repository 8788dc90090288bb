//! Fragment flattening and pipeline.json decoding.

use edge_protocol::pipeline::{
    FRAGMENT_INSTANCE_ID_CONFIG, FRAGMENT_PROCESSOR_STAGE, FRAGMENT_SOURCE_STAGE,
    FRAGMENT_TARGET_STAGE,
};
use edge_protocol::{
    PipelineConfiguration, PipelineFragmentConfiguration, PipelineInfo, ProtocolError,
    StageConfiguration,
};

fn stage(name: &str, inputs: &[&str], outputs: &[&str]) -> StageConfiguration {
    StageConfiguration::new(name, "basic", "identity")
        .with_inputs(inputs.iter().copied())
        .with_outputs(outputs.iter().copied())
}

fn placeholder(name: &str, kind: &str, fragment: &str) -> StageConfiguration {
    StageConfiguration::new(name, "fragment", kind).with_config(FRAGMENT_INSTANCE_ID_CONFIG, fragment)
}

fn fragment(instance: &str, stages: Vec<StageConfiguration>) -> PipelineFragmentConfiguration {
    PipelineFragmentConfiguration {
        fragment_id: format!("{}-def", instance),
        fragment_instance_id: instance.to_string(),
        title: instance.to_string(),
        stages,
        fragments: Vec::new(),
    }
}

fn fragmented_pipeline() -> PipelineConfiguration {
    let mut config = PipelineConfiguration::new(PipelineInfo::new("p1", "Fragments", "", "admin"));
    config.fragments = vec![
        fragment(
            "f_origin",
            vec![stage("O1", &[], &["o1"]), stage("O2", &["o1"], &["o2"])],
        ),
        fragment(
            "f_proc",
            vec![
                stage("P1", &["o2"], &["p1"]),
                stage("P2", &["p1"], &["p2"]),
                stage("P3", &["p2"], &["p3"]),
            ],
        ),
        fragment("f_target", vec![stage("T1", &["p3"], &[])]),
    ];
    config.stages = vec![
        placeholder("origin_fragment", FRAGMENT_SOURCE_STAGE, "f_origin"),
        placeholder("processor_fragment", FRAGMENT_PROCESSOR_STAGE, "f_proc"),
        StageConfiguration::new("Trash", "basic", "trash").with_inputs(["p3"]),
        placeholder("target_fragment", FRAGMENT_TARGET_STAGE, "f_target"),
    ];
    config
}

#[test]
fn fragments_flatten_in_place() {
    let mut config = fragmented_pipeline();
    config.process_fragment_stages().unwrap();

    let names: Vec<&str> = config
        .stages
        .iter()
        .map(|s| s.instance_name.as_str())
        .collect();
    assert_eq!(names, vec!["O1", "O2", "P1", "P2", "P3", "Trash", "T1"]);
    assert!(config.stages.iter().all(|s| !s.is_fragment_placeholder()));
}

#[test]
fn missing_fragment_is_reported() {
    let mut config = fragmented_pipeline();
    config.fragments.pop();
    let err = config.process_fragment_stages().unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::MissingFragment { ref fragment, .. } if fragment == "f_target"
    ));
}

#[test]
fn flattened_wiring_is_revalidated() {
    let mut config = fragmented_pipeline();
    // Trash now reads a lane only produced later.
    config.stages.swap(1, 2);
    assert!(matches!(
        config.process_fragment_stages(),
        Err(ProtocolError::UnknownInputLane { .. })
    ));
}

#[test]
fn duplicate_names_after_flattening_are_rejected() {
    let mut config = PipelineConfiguration::new(PipelineInfo::new("p1", "Fragments", "", "admin"));
    config.fragments = vec![fragment("f_origin", vec![stage("O1", &[], &["o1"])])];
    config.stages = vec![
        placeholder("origin_fragment", FRAGMENT_SOURCE_STAGE, "f_origin"),
        stage("dup", &["o1"], &[]),
        StageConfiguration::new("dup", "basic", "trash").with_inputs(["o1"]),
    ];
    assert!(matches!(
        config.process_fragment_stages(),
        Err(ProtocolError::DuplicateStage(ref name)) if name == "dup"
    ));

    // A fragment stage colliding with a pipeline stage is a duplicate too.
    let mut config = fragmented_pipeline();
    config.stages[2] = StageConfiguration::new("P2", "basic", "trash").with_inputs(["p3"]);
    assert!(matches!(
        config.process_fragment_stages(),
        Err(ProtocolError::DuplicateStage(ref name)) if name == "P2"
    ));
}

#[test]
fn repeated_placeholder_inlines_fragment_once() {
    let mut config = PipelineConfiguration::new(PipelineInfo::new("p1", "Fragments", "", "admin"));
    config.fragments = vec![fragment(
        "f_io",
        vec![stage("O1", &[], &["o1"]), stage("T1", &["o1"], &[])],
    )];
    config.stages = vec![
        placeholder("source_half", FRAGMENT_SOURCE_STAGE, "f_io"),
        placeholder("target_half", FRAGMENT_TARGET_STAGE, "f_io"),
    ];
    config.process_fragment_stages().unwrap();
    let names: Vec<&str> = config.stages.iter().map(|s| s.instance_name.as_str()).collect();
    assert_eq!(names, vec!["O1", "T1"]);
}

#[test]
fn pipeline_json_decodes_with_defaults() {
    let json = serde_json::json!({
        "pipelineId": "p1",
        "title": "Demo",
        "uuid": "u-1",
        "configuration": [{"name": "executionMode", "value": "EDGE"}],
        "stages": [{
            "instanceName": "gen",
            "library": "basic",
            "stageName": "dev_data_generator",
            "configuration": [{"name": "batchSize", "value": 4}],
            "outputLanes": ["gen_out"]
        }],
        "errorStage": {
            "instanceName": "err",
            "library": "basic",
            "stageName": "trash"
        },
        "info": {
            "pipelineId": "p1",
            "title": "Demo",
            "created": 1,
            "lastModified": 2,
            "uuid": "u-1"
        }
    });
    let config: PipelineConfiguration = serde_json::from_value(json).unwrap();
    assert_eq!(config.stages[0].config("batchSize"), Some(&serde_json::json!(4)));
    assert_eq!(config.config("executionMode"), Some(&serde_json::json!("EDGE")));
    assert!(config.stages[0].input_lanes.is_empty());
    assert_eq!(config.error_stage.unwrap().definition_key(), "basic::trash");
}
