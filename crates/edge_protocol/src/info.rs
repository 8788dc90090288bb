//! Pipeline info block as stored in `info.json`.

use crate::now_millis;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineInfo {
    pub pipeline_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Milliseconds since the epoch.
    pub created: i64,
    pub last_modified: i64,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub last_modifier: String,
    pub uuid: String,
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub metadata: JsonMap<String, JsonValue>,
}

impl PipelineInfo {
    pub fn new(
        pipeline_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        creator: impl Into<String>,
    ) -> Self {
        let now = now_millis();
        let creator = creator.into();
        Self {
            pipeline_id: pipeline_id.into(),
            title: title.into(),
            description: description.into(),
            created: now,
            last_modified: now,
            last_modifier: creator.clone(),
            creator,
            uuid: uuid::Uuid::new_v4().to_string(),
            valid: true,
            metadata: JsonMap::new(),
        }
    }

    /// Gives the info a fresh uuid and modification stamp.
    pub fn touch(&mut self, modifier: &str) {
        self.uuid = uuid::Uuid::new_v4().to_string();
        self.last_modified = now_millis().max(self.last_modified + 1);
        self.last_modifier = modifier.to_string();
    }
}
