//! Per-pipeline side channels: error records, error messages and events.
//!
//! Both sinks are keyed by stage instance name, keep insertion order, and are
//! cleared at the start of every batch.

use edge_record::Record;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Stage-level error message (not tied to a record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub stage: String,
    pub message: String,
    pub timestamp: i64,
}

impl ErrorMessage {
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
            timestamp: edge_protocol::now_millis(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct StageErrors {
    messages: Vec<ErrorMessage>,
    records: Vec<Record>,
}

#[derive(Debug, Default)]
pub struct ErrorSink {
    stages: IndexMap<String, StageErrors>,
    total_records: usize,
    total_messages: usize,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.stages.clear();
        self.total_records = 0;
        self.total_messages = 0;
    }

    pub fn add_record(&mut self, stage: &str, record: Record) {
        self.entry(stage).records.push(record);
        self.total_records += 1;
    }

    pub fn add_message(&mut self, message: ErrorMessage) {
        let stage = message.stage.clone();
        self.entry(&stage).messages.push(message);
        self.total_messages += 1;
    }

    fn entry(&mut self, stage: &str) -> &mut StageErrors {
        if !self.stages.contains_key(stage) {
            self.stages.insert(stage.to_string(), StageErrors::default());
        }
        &mut self.stages[stage]
    }

    pub fn records(&self, stage: &str) -> &[Record] {
        self.stages
            .get(stage)
            .map(|e| e.records.as_slice())
            .unwrap_or(&[])
    }

    pub fn messages(&self, stage: &str) -> &[ErrorMessage] {
        self.stages
            .get(stage)
            .map(|e| e.messages.as_slice())
            .unwrap_or(&[])
    }

    /// Every error record of the batch, stage by stage in the order the
    /// stages first reported.
    pub fn all_records(&self) -> Vec<Record> {
        self.stages
            .values()
            .flat_map(|e| e.records.iter().cloned())
            .collect()
    }

    pub fn all_messages(&self) -> Vec<ErrorMessage> {
        self.stages
            .values()
            .flat_map(|e| e.messages.iter().cloned())
            .collect()
    }

    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.stages.keys().map(String::as_str)
    }

    pub fn total_records(&self) -> usize {
        self.total_records
    }

    pub fn total_messages(&self) -> usize {
        self.total_messages
    }
}

#[derive(Debug, Default)]
pub struct EventSink {
    stages: IndexMap<String, Vec<Record>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.stages.clear();
    }

    pub fn add(&mut self, stage: &str, record: Record) {
        if !self.stages.contains_key(stage) {
            self.stages.insert(stage.to_string(), Vec::new());
        }
        self.stages[stage].push(record);
    }

    pub fn records(&self, stage: &str) -> &[Record] {
        self.stages.get(stage).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total(&self) -> usize {
        self.stages.values().map(Vec::len).sum()
    }
}

/// Error records and messages kept across batches, per stage, newest last.
/// Each stage keeps at most `capacity` of each.
#[derive(Debug, Clone)]
pub struct ErrorHistory {
    capacity: usize,
    stages: Arc<Mutex<IndexMap<String, (VecDeque<Record>, VecDeque<ErrorMessage>)>>>,
}

impl ErrorHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            stages: Arc::new(Mutex::new(IndexMap::new())),
        }
    }

    /// Appends everything the batch's sink holds.
    pub fn record_batch(&self, sink: &ErrorSink) {
        let mut stages = self.stages.lock().unwrap_or_else(PoisonError::into_inner);
        for (stage, errors) in &sink.stages {
            let (records, messages) = stages.entry(stage.clone()).or_default();
            push_capped(records, errors.records.iter().cloned(), self.capacity);
            push_capped(messages, errors.messages.iter().cloned(), self.capacity);
        }
    }

    /// Up to `n` most recent error records of `stage`, newest first.
    pub fn records(&self, stage: &str, n: usize) -> Vec<Record> {
        let stages = self.stages.lock().unwrap_or_else(PoisonError::into_inner);
        stages
            .get(stage)
            .map(|(records, _)| records.iter().rev().take(n).cloned().collect())
            .unwrap_or_default()
    }

    /// Up to `n` most recent error messages of `stage`, newest first.
    pub fn messages(&self, stage: &str, n: usize) -> Vec<ErrorMessage> {
        let stages = self.stages.lock().unwrap_or_else(PoisonError::into_inner);
        stages
            .get(stage)
            .map(|(_, messages)| messages.iter().rev().take(n).cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.stages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn push_capped<T>(queue: &mut VecDeque<T>, items: impl Iterator<Item = T>, capacity: usize) {
    for item in items {
        if queue.len() == capacity {
            queue.pop_front();
        }
        queue.push_back(item);
    }
}
