//! Committed source offsets in `runInfo/<id>/offset.json`.

use crate::error::Result;
use crate::files::{check_id, read_json, remove_file, write_json, IdLocks};
use edge_protocol::{EdgePaths, SourceOffset};
use edge_runtime::{OffsetStore, OffsetStoreError};
use tracing::info;

pub struct FileOffsetStore {
    paths: EdgePaths,
    locks: IdLocks,
}

impl FileOffsetStore {
    pub fn new(paths: EdgePaths) -> Self {
        Self {
            paths,
            locks: IdLocks::default(),
        }
    }

    fn load(&self, pipeline_id: &str) -> Result<SourceOffset> {
        check_id(pipeline_id)?;
        Ok(read_json(&self.paths.offset_file(pipeline_id))?.unwrap_or_default())
    }

    fn save(&self, pipeline_id: &str, offset: &SourceOffset) -> Result<()> {
        check_id(pipeline_id)?;
        self.locks.with_lock(pipeline_id, || {
            write_json(&self.paths.offset_file(pipeline_id), offset)
        })
    }

    fn reset(&self, pipeline_id: &str) -> Result<()> {
        check_id(pipeline_id)?;
        self.locks.with_lock(pipeline_id, || {
            if remove_file(&self.paths.offset_file(pipeline_id))? {
                info!(pipeline = %pipeline_id, "Offset reset");
            }
            Ok(())
        })
    }
}

impl OffsetStore for FileOffsetStore {
    fn load_offset(&self, pipeline_id: &str) -> std::result::Result<SourceOffset, OffsetStoreError> {
        self.load(pipeline_id)
            .map_err(|err| OffsetStoreError(err.to_string()))
    }

    fn save_offset(
        &self,
        pipeline_id: &str,
        offset: &SourceOffset,
    ) -> std::result::Result<(), OffsetStoreError> {
        self.save(pipeline_id, offset)
            .map_err(|err| OffsetStoreError(err.to_string()))
    }

    fn reset_offset(&self, pipeline_id: &str) -> std::result::Result<(), OffsetStoreError> {
        self.reset(pipeline_id)
            .map_err(|err| OffsetStoreError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_offset_lifecycle() {
        let temp = TempDir::new().unwrap();
        let paths = EdgePaths::new(temp.path());
        let store = FileOffsetStore::new(paths.clone());
        assert_eq!(store.load_offset("p1").unwrap().poll_offset(), None);

        store
            .save_offset("p1", &SourceOffset::from_poll_offset(Some("17")))
            .unwrap();
        assert!(paths.offset_file("p1").is_file());
        assert_eq!(store.load_offset("p1").unwrap().poll_offset(), Some("17"));

        store.reset_offset("p1").unwrap();
        assert_eq!(store.load_offset("p1").unwrap(), SourceOffset::default());
        store.reset_offset("p1").unwrap();
    }
}
