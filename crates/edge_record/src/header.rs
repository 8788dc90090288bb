//! Record header: provenance, tracking and error metadata plus user attributes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    stage_creator: String,
    source_id: String,
    stages_path: String,
    tracking_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous_tracking_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_data_collector_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_pipeline_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_timestamp: Option<i64>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

/// Error metadata stamped on a record routed to the error sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub data_collector_id: String,
    pub pipeline_name: String,
    pub stage: String,
    pub message: String,
    pub timestamp: i64,
}

impl Header {
    pub fn new(stage_creator: impl Into<String>, source_id: impl Into<String>) -> Self {
        let stage_creator = stage_creator.into();
        let source_id = source_id.into();
        Self {
            tracking_id: source_id.clone(),
            stage_creator,
            source_id,
            ..Default::default()
        }
    }

    pub fn stage_creator(&self) -> &str {
        &self.stage_creator
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn set_source_id(&mut self, source_id: impl Into<String>) {
        self.source_id = source_id.into();
    }

    pub fn stages_path(&self) -> &str {
        &self.stages_path
    }

    pub fn tracking_id(&self) -> &str {
        &self.tracking_id
    }

    pub fn set_tracking_id(&mut self, tracking_id: impl Into<String>) {
        self.tracking_id = tracking_id.into();
    }

    pub fn previous_tracking_id(&self) -> Option<&str> {
        self.previous_tracking_id.as_deref()
    }

    /// Records that the record passed through `instance`.
    ///
    /// The stages path gains `:instance`, the current tracking id becomes the
    /// previous one and the new tracking id is `<old>::<instance>`.
    pub fn record_stage(&mut self, instance: &str) {
        if !self.stages_path.is_empty() {
            self.stages_path.push(':');
        }
        self.stages_path.push_str(instance);
        let old = std::mem::take(&mut self.tracking_id);
        self.tracking_id = format!("{}::{}", old, instance);
        self.previous_tracking_id = Some(old);
    }

    pub fn error_data_collector_id(&self) -> Option<&str> {
        self.error_data_collector_id.as_deref()
    }

    pub fn error_pipeline_name(&self) -> Option<&str> {
        self.error_pipeline_name.as_deref()
    }

    pub fn error_stage(&self) -> Option<&str> {
        self.error_stage.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn error_timestamp(&self) -> Option<i64> {
        self.error_timestamp
    }

    pub fn set_error(&mut self, info: ErrorInfo) {
        self.error_data_collector_id = Some(info.data_collector_id);
        self.error_pipeline_name = Some(info.pipeline_name);
        self.error_stage = Some(info.stage);
        self.error_message = Some(info.message);
        self.error_timestamp = Some(info.timestamp);
    }

    pub fn clear_error(&mut self) {
        self.error_data_collector_id = None;
        self.error_pipeline_name = None;
        self.error_stage = None;
        self.error_message = None;
        self.error_timestamp = None;
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn delete_attribute(&mut self, name: &str) -> Option<String> {
        self.attributes.remove(name)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_stage_chains_tracking_ids() {
        let mut header = Header::new("origin", "file.txt::0");
        assert_eq!(header.tracking_id(), "file.txt::0");
        assert_eq!(header.previous_tracking_id(), None);

        header.record_stage("origin");
        assert_eq!(header.tracking_id(), "file.txt::0::origin");
        header.record_stage("proc");
        assert_eq!(header.stages_path(), "origin:proc");
        assert_eq!(header.previous_tracking_id(), Some("file.txt::0::origin"));
        assert_eq!(header.tracking_id(), "file.txt::0::origin::proc");
    }

    #[test]
    fn test_error_fields_roundtrip() {
        let mut header = Header::new("origin", "s");
        header.set_error(ErrorInfo {
            data_collector_id: "edge-1".into(),
            pipeline_name: "p1".into(),
            stage: "proc".into(),
            message: "boom".into(),
            timestamp: 42,
        });
        assert_eq!(header.error_stage(), Some("proc"));
        assert_eq!(header.error_timestamp(), Some(42));

        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json["errorMessage"], "boom");
        let back: Header = serde_json::from_value(json).unwrap();
        assert_eq!(back, header);

        header.clear_error();
        assert_eq!(header.error_message(), None);
    }
}
