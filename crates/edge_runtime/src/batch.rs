//! Batches, the per-stage batch maker, and the per-tick pipe batch.

use crate::error::StageError;
use crate::sinks::ErrorMessage;
use crate::stage::{StageInfo, StageKind};
use edge_record::Record;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Batch
// ============================================================================

/// Records offered to one stage for one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    source_offset: Option<String>,
    records: Vec<Record>,
    max_batch_size: usize,
}

impl Batch {
    pub fn new(source_offset: Option<String>, records: Vec<Record>) -> Self {
        let max_batch_size = records.len();
        Self {
            source_offset,
            records,
            max_batch_size,
        }
    }

    /// Empty batch handed to an origin: last committed offset plus the
    /// maximum number of records it may produce.
    pub fn for_origin(source_offset: Option<String>, max_batch_size: usize) -> Self {
        Self {
            source_offset,
            records: Vec::new(),
            max_batch_size,
        }
    }

    pub fn source_offset(&self) -> Option<&str> {
        self.source_offset.as_deref()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

impl IntoIterator for Batch {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

// ============================================================================
// Batch maker
// ============================================================================

/// Write side of a stage for one tick.
#[derive(Debug)]
pub struct BatchMaker {
    instance_name: String,
    lanes: IndexMap<String, Vec<Record>>,
    size: usize,
}

impl BatchMaker {
    pub fn new(instance_name: impl Into<String>, output_lanes: &[String]) -> Self {
        Self {
            instance_name: instance_name.into(),
            lanes: output_lanes
                .iter()
                .map(|lane| (lane.clone(), Vec::new()))
                .collect(),
            size: 0,
        }
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn lanes(&self) -> impl Iterator<Item = &str> {
        self.lanes.keys().map(String::as_str)
    }

    /// Adds `record` to every output lane.
    pub fn add_record(&mut self, record: Record) -> Result<(), StageError> {
        let lanes: Vec<String> = self.lanes.keys().cloned().collect();
        if lanes.is_empty() {
            return Err(StageError::NoOutputLanes(self.instance_name.clone()));
        }
        self.push(record, &lanes);
        Ok(())
    }

    /// Adds `record` to the named lanes, cloning it for each extra lane. An
    /// empty lane list means every output lane.
    pub fn add_record_to(&mut self, record: Record, lanes: &[&str]) -> Result<(), StageError> {
        if lanes.is_empty() {
            return self.add_record(record);
        }
        if let Some(unknown) = lanes.iter().find(|lane| !self.lanes.contains_key(**lane)) {
            return Err(StageError::UnknownLane(unknown.to_string()));
        }
        let lanes: Vec<String> = lanes.iter().map(|lane| lane.to_string()).collect();
        self.push(record, &lanes);
        Ok(())
    }

    fn push(&mut self, mut record: Record, lanes: &[String]) {
        record.header_mut().record_stage(&self.instance_name);
        let Some((last, rest)) = lanes.split_last() else {
            return;
        };
        for lane in rest {
            if let Some(records) = self.lanes.get_mut(lane) {
                records.push(record.clone());
            }
        }
        if let Some(records) = self.lanes.get_mut(last) {
            records.push(record);
        }
        self.size += 1;
    }

    /// Number of records added (a record sent to several lanes counts once).
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn lane_records(&self, lane: &str) -> &[Record] {
        self.lanes.get(lane).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn into_lanes(self) -> IndexMap<String, Vec<Record>> {
        self.lanes
    }
}

// ============================================================================
// Stage output snapshot
// ============================================================================

/// What one stage produced in one batch, as captured by preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageOutput {
    pub instance_name: String,
    #[serde(default)]
    pub output: IndexMap<String, Vec<Record>>,
    #[serde(default)]
    pub error_records: Vec<Record>,
    #[serde(default)]
    pub stage_errors: Vec<ErrorMessage>,
    #[serde(default)]
    pub event_records: Vec<Record>,
}

impl StageOutput {
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            output: IndexMap::new(),
            error_records: Vec::new(),
            stage_errors: Vec::new(),
            event_records: Vec::new(),
        }
    }

    pub fn records(&self, lane: &str) -> &[Record] {
        self.output.get(lane).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ============================================================================
// Pipe batch
// ============================================================================

/// Per-tick coordination object: lane buffers, counters and snapshots.
#[derive(Debug)]
pub struct PipeBatch {
    max_batch_size: usize,
    previous_offset: Option<String>,
    lanes: HashMap<String, Vec<Record>>,
    remaining_consumers: HashMap<String, usize>,
    snapshots: Option<Vec<StageOutput>>,
    last_input_size: usize,
    input_records: usize,
    output_records: usize,
    error_records: usize,
    error_messages: usize,
}

impl PipeBatch {
    /// `lane_consumers` counts, per lane, the stages reading it.
    pub fn new(
        lane_consumers: &HashMap<String, usize>,
        max_batch_size: usize,
        previous_offset: Option<String>,
    ) -> Self {
        Self {
            max_batch_size,
            previous_offset,
            lanes: HashMap::new(),
            remaining_consumers: lane_consumers.clone(),
            snapshots: None,
            last_input_size: 0,
            input_records: 0,
            output_records: 0,
            error_records: 0,
            error_messages: 0,
        }
    }

    pub fn with_snapshots(mut self) -> Self {
        self.snapshots = Some(Vec::new());
        self
    }

    pub fn previous_offset(&self) -> Option<&str> {
        self.previous_offset.as_deref()
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Input batch of `pipe`: its input lanes concatenated in declared order.
    /// A lane is cloned while other consumers remain and moved to the last.
    pub fn get_batch(&mut self, pipe: &StageInfo) -> Batch {
        if pipe.kind == StageKind::Origin {
            self.last_input_size = 0;
            return Batch::for_origin(self.previous_offset.clone(), self.max_batch_size);
        }
        let mut records = Vec::new();
        for lane in &pipe.input_lanes {
            records.extend(self.take_lane(lane));
        }
        self.last_input_size = records.len();
        Batch::new(self.previous_offset.clone(), records)
    }

    fn take_lane(&mut self, lane: &str) -> Vec<Record> {
        let remaining = self.remaining_consumers.get_mut(lane);
        match remaining {
            Some(count) if *count > 1 => {
                *count -= 1;
                self.lanes.get(lane).cloned().unwrap_or_default()
            }
            Some(count) => {
                *count = 0;
                self.lanes.remove(lane).unwrap_or_default()
            }
            None => self.lanes.remove(lane).unwrap_or_default(),
        }
    }

    pub fn start_stage(&self, pipe: &StageInfo) -> BatchMaker {
        BatchMaker::new(pipe.instance_name.clone(), &pipe.output_lanes)
    }

    /// Moves the maker's output into the lane map.
    pub fn complete_stage(&mut self, pipe: &StageInfo, maker: BatchMaker) {
        match pipe.kind {
            StageKind::Origin => self.input_records += maker.size(),
            StageKind::Target => self.output_records += self.last_input_size,
            StageKind::Processor => {}
        }
        let lanes = maker.into_lanes();
        if let Some(snapshots) = self.snapshots.as_mut() {
            let mut output = StageOutput::new(pipe.instance_name.clone());
            output.output = lanes.clone();
            snapshots.push(output);
        }
        for (lane, records) in lanes {
            self.lanes.entry(lane).or_default().extend(records);
        }
    }

    /// Pushes the stage's event records onto each of its event lanes.
    pub fn add_events(&mut self, pipe: &StageInfo, events: Vec<Record>) {
        if events.is_empty() {
            return;
        }
        if let Some(snapshot) = self.snapshot_mut(&pipe.instance_name) {
            snapshot.event_records.extend(events.iter().cloned());
        }
        if pipe.event_lanes.is_empty() {
            return;
        }
        let staging = format!("{}::events", pipe.instance_name);
        self.lanes.insert(staging.clone(), events);
        self.move_lane_copying(&staging, &pipe.event_lanes);
    }

    /// Replaces the stage's output by a recorded one instead of running it.
    pub fn override_stage_output(&mut self, pipe: &StageInfo, recorded: &StageOutput) {
        let mut maker = self.start_stage(pipe);
        for lane in &pipe.output_lanes {
            for record in recorded.records(lane) {
                if let Some(records) = maker.lanes.get_mut(lane) {
                    records.push(record.clone());
                }
            }
        }
        maker.size = maker.lanes.values().map(Vec::len).max().unwrap_or(0);
        self.complete_stage(pipe, maker);
    }

    pub fn move_lane(&mut self, from: &str, to: &str) {
        let records = self.lanes.remove(from).unwrap_or_default();
        self.lanes.insert(to.to_string(), records);
    }

    /// Moves `from` into every lane of `to`, cloning for all but the last.
    pub fn move_lane_copying(&mut self, from: &str, to: &[String]) {
        let records = self.lanes.remove(from).unwrap_or_default();
        let Some((last, rest)) = to.split_last() else {
            return;
        };
        for lane in rest {
            self.lanes
                .entry(lane.clone())
                .or_default()
                .extend(records.iter().cloned());
        }
        self.lanes.entry(last.clone()).or_default().extend(records);
    }

    /// Concatenates `lanes` (in order) into `to`, removing the sources.
    pub fn combine_lanes(&mut self, lanes: &[String], to: &str) {
        let mut combined = Vec::new();
        for lane in lanes {
            combined.extend(self.lanes.remove(lane).unwrap_or_default());
        }
        self.lanes.insert(to.to_string(), combined);
    }

    pub fn lane(&self, lane: &str) -> &[Record] {
        self.lanes.get(lane).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn snapshots(&self) -> Option<&[StageOutput]> {
        self.snapshots.as_deref()
    }

    pub fn snapshot_mut(&mut self, instance_name: &str) -> Option<&mut StageOutput> {
        self.snapshots
            .as_mut()?
            .iter_mut()
            .rev()
            .find(|s| s.instance_name == instance_name)
    }

    pub fn take_snapshots(&mut self) -> Vec<StageOutput> {
        self.snapshots.as_mut().map(std::mem::take).unwrap_or_default()
    }

    pub fn set_error_counts(&mut self, records: usize, messages: usize) {
        self.error_records = records;
        self.error_messages = messages;
    }

    pub fn input_records(&self) -> usize {
        self.input_records
    }

    pub fn output_records(&self) -> usize {
        self.output_records
    }

    pub fn error_records(&self) -> usize {
        self.error_records
    }

    pub fn error_messages(&self) -> usize {
        self.error_messages
    }
}
