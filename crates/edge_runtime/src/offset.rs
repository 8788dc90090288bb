//! Source offset tracking.
//!
//! The origin stages an offset for every batch; the pipeline commits it once
//! the whole graph has run. Production trackers persist through an
//! [`OffsetStore`], preview trackers keep everything in memory.

use crate::error::OffsetStoreError;
use edge_protocol::{now_millis, SourceOffset};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Persistence seam for committed offsets, keyed by pipeline id.
pub trait OffsetStore: Send + Sync {
    fn load_offset(&self, pipeline_id: &str) -> Result<SourceOffset, OffsetStoreError>;
    fn save_offset(&self, pipeline_id: &str, offset: &SourceOffset) -> Result<(), OffsetStoreError>;
    fn reset_offset(&self, pipeline_id: &str) -> Result<(), OffsetStoreError>;
}

pub trait SourceOffsetTracker: Send {
    /// Last committed offset; `None` before the first commit.
    fn offset(&self) -> Option<&str>;

    /// Stages the offset reached by the current batch.
    fn set_offset(&mut self, offset: String);

    /// Makes the staged offset the committed one. Without a staged value this
    /// does nothing, so a batch commits at most once.
    fn commit_offset(&mut self) -> Result<(), OffsetStoreError>;

    /// The source reported exhaustion (committed offset is the empty string).
    fn is_finished(&self) -> bool;

    /// Time of the last commit in ms, zero before the first.
    fn last_batch_time(&self) -> i64;
}

// ============================================================================
// Production tracker
// ============================================================================

pub struct ProductionSourceOffsetTracker {
    pipeline_id: String,
    store: Arc<dyn OffsetStore>,
    committed: SourceOffset,
    staged: Option<String>,
    last_batch_time: i64,
}

impl ProductionSourceOffsetTracker {
    pub fn new(
        pipeline_id: impl Into<String>,
        store: Arc<dyn OffsetStore>,
    ) -> Result<Self, OffsetStoreError> {
        let pipeline_id = pipeline_id.into();
        let committed = store.load_offset(&pipeline_id)?;
        debug!(pipeline = %pipeline_id, offset = ?committed.poll_offset(), "Loaded committed offset");
        Ok(Self {
            pipeline_id,
            store,
            committed,
            staged: None,
            last_batch_time: 0,
        })
    }
}

impl SourceOffsetTracker for ProductionSourceOffsetTracker {
    fn offset(&self) -> Option<&str> {
        self.committed.poll_offset()
    }

    fn set_offset(&mut self, offset: String) {
        self.staged = Some(offset);
    }

    fn commit_offset(&mut self) -> Result<(), OffsetStoreError> {
        let Some(staged) = self.staged.take() else {
            return Ok(());
        };
        let mut next = self.committed.clone();
        next.set_poll_offset(Some(&staged));
        self.store.save_offset(&self.pipeline_id, &next)?;
        self.committed = next;
        self.last_batch_time = now_millis();
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.committed.is_finished()
    }

    fn last_batch_time(&self) -> i64 {
        self.last_batch_time
    }
}

// ============================================================================
// Preview tracker
// ============================================================================

#[derive(Debug, Default)]
pub struct PreviewSourceOffsetTracker {
    committed: Option<String>,
    staged: Option<String>,
    last_batch_time: i64,
}

impl PreviewSourceOffsetTracker {
    pub fn new(offset: Option<String>) -> Self {
        Self {
            committed: offset,
            ..Default::default()
        }
    }
}

impl SourceOffsetTracker for PreviewSourceOffsetTracker {
    fn offset(&self) -> Option<&str> {
        self.committed.as_deref()
    }

    fn set_offset(&mut self, offset: String) {
        self.staged = Some(offset);
    }

    fn commit_offset(&mut self) -> Result<(), OffsetStoreError> {
        if let Some(staged) = self.staged.take() {
            self.committed = Some(staged);
            self.last_batch_time = now_millis();
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.committed.as_deref() == Some("")
    }

    fn last_batch_time(&self) -> i64 {
        self.last_batch_time
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Offset store that lives as long as the process. Used by standalone runs
/// and tests.
#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    offsets: Mutex<HashMap<String, SourceOffset>>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OffsetStore for MemoryOffsetStore {
    fn load_offset(&self, pipeline_id: &str) -> Result<SourceOffset, OffsetStoreError> {
        let offsets = self.offsets.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(offsets.get(pipeline_id).cloned().unwrap_or_default())
    }

    fn save_offset(&self, pipeline_id: &str, offset: &SourceOffset) -> Result<(), OffsetStoreError> {
        let mut offsets = self.offsets.lock().unwrap_or_else(PoisonError::into_inner);
        offsets.insert(pipeline_id.to_string(), offset.clone());
        Ok(())
    }

    fn reset_offset(&self, pipeline_id: &str) -> Result<(), OffsetStoreError> {
        let mut offsets = self.offsets.lock().unwrap_or_else(PoisonError::into_inner);
        offsets.remove(pipeline_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_is_noop_without_staged_value() {
        let store = Arc::new(MemoryOffsetStore::new());
        let mut tracker = ProductionSourceOffsetTracker::new("p1", store.clone()).unwrap();
        assert_eq!(tracker.offset(), None);

        tracker.commit_offset().unwrap();
        assert_eq!(tracker.last_batch_time(), 0);

        tracker.set_offset("10".into());
        assert_eq!(tracker.offset(), None);
        tracker.commit_offset().unwrap();
        assert_eq!(tracker.offset(), Some("10"));
        assert_eq!(store.load_offset("p1").unwrap().poll_offset(), Some("10"));

        // A second commit in the same batch does not rewrite anything.
        store.reset_offset("p1").unwrap();
        tracker.commit_offset().unwrap();
        assert_eq!(store.load_offset("p1").unwrap().poll_offset(), None);
    }

    #[test]
    fn test_empty_offset_means_finished() {
        let store = Arc::new(MemoryOffsetStore::new());
        let mut tracker = ProductionSourceOffsetTracker::new("p1", store.clone()).unwrap();
        tracker.set_offset(String::new());
        tracker.commit_offset().unwrap();
        assert!(tracker.is_finished());

        let reloaded = ProductionSourceOffsetTracker::new("p1", store).unwrap();
        assert!(reloaded.is_finished());
    }

    #[test]
    fn test_preview_tracker() {
        let mut tracker = PreviewSourceOffsetTracker::new(Some("5".into()));
        assert_eq!(tracker.offset(), Some("5"));
        tracker.set_offset("6".into());
        tracker.commit_offset().unwrap();
        assert_eq!(tracker.offset(), Some("6"));
        assert!(!tracker.is_finished());
    }
}
