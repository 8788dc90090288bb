//! Pipeline configuration as stored in `pipeline.json`.

use crate::defaults::PIPELINE_SCHEMA_VERSION;
use crate::error::ProtocolError;
use crate::info::PipelineInfo;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::{HashMap, HashSet};

/// Stage names of fragment placeholders. They only exist until
/// [`PipelineConfiguration::process_fragment_stages`] runs.
pub const FRAGMENT_SOURCE_STAGE: &str = "fragment_source";
pub const FRAGMENT_PROCESSOR_STAGE: &str = "fragment_processor";
pub const FRAGMENT_TARGET_STAGE: &str = "fragment_target";
pub const FRAGMENT_INSTANCE_ID_CONFIG: &str = "conf.fragmentInstanceId";

/// One `{name, value}` configuration entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub name: String,
    #[serde(default)]
    pub value: JsonValue,
}

impl Config {
    pub fn new(name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

fn find_config<'a>(configs: &'a [Config], name: &str) -> Option<&'a JsonValue> {
    configs.iter().find(|c| c.name == name).map(|c| &c.value)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfiguration {
    pub service: String,
    #[serde(default)]
    pub service_version: i32,
    #[serde(default)]
    pub configuration: Vec<Config>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConfiguration {
    pub instance_name: String,
    pub library: String,
    pub stage_name: String,
    #[serde(default)]
    pub stage_version: String,
    #[serde(default)]
    pub configuration: Vec<Config>,
    #[serde(default)]
    pub ui_info: JsonMap<String, JsonValue>,
    #[serde(default)]
    pub input_lanes: Vec<String>,
    #[serde(default)]
    pub output_lanes: Vec<String>,
    #[serde(default)]
    pub event_lanes: Vec<String>,
    #[serde(default)]
    pub services: Vec<ServiceConfiguration>,
}

impl StageConfiguration {
    pub fn new(
        instance_name: impl Into<String>,
        library: impl Into<String>,
        stage_name: impl Into<String>,
    ) -> Self {
        Self {
            instance_name: instance_name.into(),
            library: library.into(),
            stage_name: stage_name.into(),
            stage_version: "1".to_string(),
            configuration: Vec::new(),
            ui_info: JsonMap::new(),
            input_lanes: Vec::new(),
            output_lanes: Vec::new(),
            event_lanes: Vec::new(),
            services: Vec::new(),
        }
    }

    pub fn with_config(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.configuration.push(Config::new(name, value));
        self
    }

    pub fn with_inputs<I, S>(mut self, lanes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_lanes = lanes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, lanes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_lanes = lanes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_event_lanes<I, S>(mut self, lanes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_lanes = lanes.into_iter().map(Into::into).collect();
        self
    }

    pub fn config(&self, name: &str) -> Option<&JsonValue> {
        find_config(&self.configuration, name)
    }

    /// Registry key of the stage definition: `library::stageName`.
    pub fn definition_key(&self) -> String {
        format!("{}::{}", self.library, self.stage_name)
    }

    pub fn is_fragment_placeholder(&self) -> bool {
        matches!(
            self.stage_name.as_str(),
            FRAGMENT_SOURCE_STAGE | FRAGMENT_PROCESSOR_STAGE | FRAGMENT_TARGET_STAGE
        )
    }

    /// Output and event lanes, in that order.
    pub fn produced_lanes(&self) -> impl Iterator<Item = &String> {
        self.output_lanes.iter().chain(self.event_lanes.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineFragmentConfiguration {
    pub fragment_id: String,
    pub fragment_instance_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub stages: Vec<StageConfiguration>,
    #[serde(default)]
    pub fragments: Vec<PipelineFragmentConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfiguration {
    pub pipeline_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub schema_version: i32,
    #[serde(default)]
    pub configuration: Vec<Config>,
    #[serde(default)]
    pub ui_info: JsonMap<String, JsonValue>,
    #[serde(default)]
    pub fragments: Vec<PipelineFragmentConfiguration>,
    #[serde(default)]
    pub stages: Vec<StageConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stage: Option<StageConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_aggregator_stage: Option<StageConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_origin_stage: Option<StageConfiguration>,
    #[serde(default)]
    pub start_event_stages: Vec<StageConfiguration>,
    #[serde(default)]
    pub stop_event_stages: Vec<StageConfiguration>,
    pub info: PipelineInfo,
    #[serde(default)]
    pub metadata: JsonMap<String, JsonValue>,
}

impl PipelineConfiguration {
    /// Empty configuration for a freshly created pipeline.
    pub fn new(info: PipelineInfo) -> Self {
        Self {
            pipeline_id: info.pipeline_id.clone(),
            title: info.title.clone(),
            description: info.description.clone(),
            uuid: info.uuid.clone(),
            version: 1,
            schema_version: PIPELINE_SCHEMA_VERSION,
            configuration: Vec::new(),
            ui_info: JsonMap::new(),
            fragments: Vec::new(),
            stages: Vec::new(),
            error_stage: None,
            stats_aggregator_stage: None,
            test_origin_stage: None,
            start_event_stages: Vec::new(),
            stop_event_stages: Vec::new(),
            metadata: JsonMap::new(),
            info,
        }
    }

    pub fn config(&self, name: &str) -> Option<&JsonValue> {
        find_config(&self.configuration, name)
    }

    /// Sets (or replaces) a pipeline-level configuration value.
    pub fn set_config(&mut self, name: &str, value: impl Into<JsonValue>) {
        let value = value.into();
        match self.configuration.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.value = value,
            None => self.configuration.push(Config::new(name, value)),
        }
    }

    pub fn stage(&self, instance_name: &str) -> Option<&StageConfiguration> {
        self.stages.iter().find(|s| s.instance_name == instance_name)
    }

    /// Replaces every fragment placeholder stage in place by the stages of the
    /// fragment it references, then re-validates the wiring.
    pub fn process_fragment_stages(&mut self) -> Result<(), ProtocolError> {
        if self.stages.iter().all(|s| !s.is_fragment_placeholder()) {
            return Ok(());
        }

        let mut by_instance: HashMap<String, Vec<StageConfiguration>> = HashMap::new();
        collect_fragment_stages(&self.fragments, &mut by_instance);

        let mut flattened = Vec::with_capacity(self.stages.len());
        let mut expanded = HashSet::new();
        for stage in self.stages.drain(..) {
            if !stage.is_fragment_placeholder() {
                flattened.push(stage);
                continue;
            }
            let fragment = stage
                .config(FRAGMENT_INSTANCE_ID_CONFIG)
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string();
            match by_instance.get(&fragment) {
                // Several placeholders of one fragment instance inline it once.
                Some(_) if !expanded.insert(fragment.clone()) => {}
                Some(stages) => flattened.extend(stages.iter().cloned()),
                None => {
                    return Err(ProtocolError::MissingFragment {
                        stage: stage.instance_name,
                        fragment,
                    })
                }
            }
        }

        self.stages = flattened;
        validate_stage_wiring(&self.stages)
    }
}

fn collect_fragment_stages(
    fragments: &[PipelineFragmentConfiguration],
    out: &mut HashMap<String, Vec<StageConfiguration>>,
) {
    for fragment in fragments {
        out.insert(
            fragment.fragment_instance_id.clone(),
            fragment.stages.clone(),
        );
        collect_fragment_stages(&fragment.fragments, out);
    }
}

/// Checks that instance names are unique, every lane has one producer and
/// every input lane is produced by an earlier stage. The last rule makes the
/// list order a topological order, so the wiring is acyclic.
pub fn validate_stage_wiring(stages: &[StageConfiguration]) -> Result<(), ProtocolError> {
    let mut names = HashSet::new();
    let mut producers: HashMap<&str, &str> = HashMap::new();
    for stage in stages {
        if !names.insert(stage.instance_name.as_str()) {
            return Err(ProtocolError::DuplicateStage(stage.instance_name.clone()));
        }
        for lane in &stage.input_lanes {
            if !producers.contains_key(lane.as_str()) {
                return Err(ProtocolError::UnknownInputLane {
                    stage: stage.instance_name.clone(),
                    lane: lane.clone(),
                });
            }
        }
        for lane in stage.produced_lanes() {
            if let Some(first) = producers.insert(lane.as_str(), stage.instance_name.as_str()) {
                return Err(ProtocolError::DuplicateLaneProducer {
                    lane: lane.clone(),
                    first: first.to_string(),
                    second: stage.instance_name.clone(),
                });
            }
        }
    }
    Ok(())
}
