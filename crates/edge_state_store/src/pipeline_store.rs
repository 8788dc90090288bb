//! Pipeline configurations and info blocks.
//!
//! # Storage Format
//!
//! ```text
//! <base>/data/pipelines/<id>/
//! ├── pipeline.json   full configuration
//! └── info.json       info block (uuid, timestamps, creator)
//! ```
//!
//! Every save rotates the info uuid. A save carrying a uuid other than the
//! stored one was based on a stale copy and is rejected.

use crate::error::{Result, StoreError};
use crate::files::{check_id, read_json, remove_dir, write_json, IdLocks};
use edge_protocol::{EdgePaths, PipelineConfiguration, PipelineInfo};
use std::fs;
use std::io::ErrorKind;
use tracing::{debug, info};

pub struct PipelineStore {
    paths: EdgePaths,
    locks: IdLocks,
}

impl PipelineStore {
    pub fn new(paths: EdgePaths) -> Self {
        Self {
            paths,
            locks: IdLocks::default(),
        }
    }

    pub fn paths(&self) -> &EdgePaths {
        &self.paths
    }

    pub fn exists(&self, pipeline_id: &str) -> bool {
        check_id(pipeline_id).is_ok() && self.paths.info_file(pipeline_id).is_file()
    }

    /// Creates an empty pipeline. Fails if the id is taken.
    pub fn create(
        &self,
        pipeline_id: &str,
        title: &str,
        description: &str,
        user: &str,
    ) -> Result<PipelineConfiguration> {
        check_id(pipeline_id)?;
        self.locks.with_lock(pipeline_id, || {
            if self.paths.pipeline_dir(pipeline_id).exists() {
                return Err(StoreError::AlreadyExists(pipeline_id.to_string()));
            }
            let info = PipelineInfo::new(pipeline_id, title, description, user);
            let config = PipelineConfiguration::new(info);
            self.write(&config)?;
            info!(pipeline = %pipeline_id, user = %user, "Pipeline created");
            Ok(config)
        })
    }

    pub fn load(&self, pipeline_id: &str) -> Result<PipelineConfiguration> {
        check_id(pipeline_id)?;
        read_json(&self.paths.pipeline_file(pipeline_id))?
            .ok_or_else(|| StoreError::NotFound(pipeline_id.to_string()))
    }

    pub fn info(&self, pipeline_id: &str) -> Result<PipelineInfo> {
        check_id(pipeline_id)?;
        read_json(&self.paths.info_file(pipeline_id))?
            .ok_or_else(|| StoreError::NotFound(pipeline_id.to_string()))
    }

    /// Info blocks of every stored pipeline, ordered by id.
    pub fn list(&self) -> Result<Vec<PipelineInfo>> {
        let dir = self.paths.pipelines_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io("list", dir, err)),
        };
        let mut infos = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| StoreError::io("list", &dir, err))?;
            if let Some(info) = read_json::<PipelineInfo>(&entry.path().join("info.json"))? {
                infos.push(info);
            }
        }
        infos.sort_by(|a, b| a.pipeline_id.cmp(&b.pipeline_id));
        Ok(infos)
    }

    /// Replaces the stored configuration. `config.uuid` must match the
    /// stored uuid; the returned configuration carries the new one.
    pub fn save(&self, user: &str, mut config: PipelineConfiguration) -> Result<PipelineConfiguration> {
        let pipeline_id = config.pipeline_id.clone();
        check_id(&pipeline_id)?;
        self.locks.with_lock(&pipeline_id, || {
            let mut info = self.info(&pipeline_id)?;
            if info.uuid != config.uuid {
                return Err(StoreError::Changed { pipeline_id: pipeline_id.clone() });
            }
            info.touch(user);
            info.title = config.title.clone();
            info.description = config.description.clone();
            config.uuid = info.uuid.clone();
            config.info = info;
            self.write(&config)?;
            debug!(pipeline = %pipeline_id, uuid = %config.uuid, "Pipeline saved");
            Ok(config)
        })
    }

    /// Removes the configuration and the pipeline's run info.
    pub fn delete(&self, pipeline_id: &str) -> Result<()> {
        check_id(pipeline_id)?;
        self.locks.with_lock(pipeline_id, || {
            if !remove_dir(&self.paths.pipeline_dir(pipeline_id))? {
                return Err(StoreError::NotFound(pipeline_id.to_string()));
            }
            remove_dir(&self.paths.run_info_dir(pipeline_id))?;
            info!(pipeline = %pipeline_id, "Pipeline deleted");
            Ok(())
        })
    }

    fn write(&self, config: &PipelineConfiguration) -> Result<()> {
        write_json(&self.paths.pipeline_file(&config.pipeline_id), config)?;
        write_json(&self.paths.info_file(&config.pipeline_id), &config.info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, PipelineStore) {
        let temp = TempDir::new().unwrap();
        let store = PipelineStore::new(EdgePaths::new(temp.path()));
        (temp, store)
    }

    #[test]
    fn test_create_and_load() {
        let (_temp, store) = store();
        let created = store.create("p1", "Readings", "plant floor", "admin").unwrap();
        assert!(store.exists("p1"));

        let loaded = store.load("p1").unwrap();
        assert_eq!(loaded, created);
        assert_eq!(store.info("p1").unwrap().uuid, created.uuid);
    }

    #[test]
    fn test_create_rejects_existing_id() {
        let (_temp, store) = store();
        store.create("p1", "A", "", "admin").unwrap();
        assert!(matches!(
            store.create("p1", "B", "", "admin"),
            Err(StoreError::AlreadyExists(id)) if id == "p1"
        ));
    }

    #[test]
    fn test_save_rotates_uuid_and_rejects_stale_copies() {
        let (_temp, store) = store();
        let created = store.create("p1", "A", "", "admin").unwrap();

        let mut edited = created.clone();
        edited.title = "Renamed".to_string();
        let saved = store.save("bob", edited).unwrap();
        assert_ne!(saved.uuid, created.uuid);
        assert_eq!(saved.info.last_modifier, "bob");
        assert_eq!(store.info("p1").unwrap().title, "Renamed");

        let err = store.save("carol", created).unwrap_err();
        assert_eq!(err.to_string(), "pipeline has been changed");
        assert_eq!(store.load("p1").unwrap().uuid, saved.uuid);
    }

    #[test]
    fn test_delete_removes_both_directories() {
        let (_temp, store) = store();
        store.create("p1", "A", "", "admin").unwrap();
        let run_info = store.paths().run_info_dir("p1");
        fs::create_dir_all(&run_info).unwrap();
        fs::write(run_info.join("offset.json"), "{}").unwrap();

        store.delete("p1").unwrap();
        assert!(!store.paths().pipeline_dir("p1").exists());
        assert!(!run_info.exists());
        assert!(matches!(store.delete("p1"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_list_orders_by_id() {
        let (_temp, store) = store();
        store.create("b", "B", "", "admin").unwrap();
        store.create("a", "A", "", "admin").unwrap();
        let ids: Vec<_> = store.list().unwrap().into_iter().map(|i| i.pipeline_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let (_temp, store) = store();
        assert!(matches!(
            store.create("../escape", "X", "", "admin"),
            Err(StoreError::InvalidId(_))
        ));
    }
}
