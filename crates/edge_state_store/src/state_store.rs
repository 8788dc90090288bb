//! Current pipeline state plus a bounded log of every state saved, the
//! current one included.

use crate::error::Result;
use crate::files::{check_id, read_json, remove_file, write_json, IdLocks};
use edge_protocol::defaults::STATE_HISTORY_LIMIT;
use edge_protocol::{EdgePaths, PipelineState};
use std::fs;
use std::io::ErrorKind;
use tracing::{debug, warn};

pub struct StateStore {
    paths: EdgePaths,
    locks: IdLocks,
    history_limit: usize,
}

impl StateStore {
    pub fn new(paths: EdgePaths) -> Self {
        Self {
            paths,
            locks: IdLocks::default(),
            history_limit: STATE_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Persists `state` as current and appends it to the history. The
    /// current state is written first.
    pub fn save_state(&self, state: &PipelineState) -> Result<()> {
        check_id(&state.pipeline_id)?;
        self.locks.with_lock(&state.pipeline_id, || {
            write_json(&self.paths.state_file(&state.pipeline_id), state)?;

            let history_file = self.paths.state_history_file(&state.pipeline_id);
            let mut history: Vec<PipelineState> = read_json(&history_file)?.unwrap_or_default();
            history.push(state.clone());
            if history.len() > self.history_limit {
                let excess = history.len() - self.history_limit;
                history.drain(..excess);
            }
            write_json(&history_file, &history)?;
            debug!(pipeline = %state.pipeline_id, status = %state.status, "State saved");
            Ok(())
        })
    }

    pub fn load_state(&self, pipeline_id: &str) -> Result<Option<PipelineState>> {
        check_id(pipeline_id)?;
        read_json(&self.paths.state_file(pipeline_id))
    }

    /// Every saved state, newest first. The first entry is the current
    /// state, so a pipeline that never changed has a one-entry history.
    /// Empty after `delete_history` until the next save.
    pub fn history(&self, pipeline_id: &str) -> Result<Vec<PipelineState>> {
        check_id(pipeline_id)?;
        let mut history: Vec<PipelineState> =
            read_json(&self.paths.state_history_file(pipeline_id))?.unwrap_or_default();
        history.reverse();
        Ok(history)
    }

    /// Drops the history, keeping the current state.
    pub fn delete_history(&self, pipeline_id: &str) -> Result<()> {
        check_id(pipeline_id)?;
        self.locks.with_lock(pipeline_id, || {
            remove_file(&self.paths.state_history_file(pipeline_id))?;
            Ok(())
        })
    }

    /// Current state of every pipeline that has one. Unreadable entries are
    /// skipped with a warning.
    pub fn all_states(&self) -> Result<Vec<PipelineState>> {
        let root = self.paths.run_info_root();
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(crate::error::StoreError::io("list", root, err)),
        };
        let mut states = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path().join("pipelineState.json");
            match read_json::<PipelineState>(&path) {
                Ok(Some(state)) => states.push(state),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "Skipping unreadable pipeline state"),
            }
        }
        states.sort_by(|a, b| a.pipeline_id.cmp(&b.pipeline_id));
        Ok(states)
    }
}
