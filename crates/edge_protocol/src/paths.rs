//! On-disk layout under the agent base directory.
//!
//! ```text
//! <base>/data/pipelines/<id>/{pipeline.json,info.json}
//! <base>/data/runInfo/<id>/{pipelineState.json,pipelineStateHistory.json,offset.json}
//! <base>/data/edge.id
//! <base>/etc/edge.conf
//! <base>/log/edge.log
//! ```

use std::io;
use std::path::{Path, PathBuf};

pub const BASE_DIR_ENV: &str = "EDGE_HOME";

/// Resolve the agent base directory.
///
/// Priority:
/// 1) EDGE_HOME
/// 2) the current working directory
pub fn default_base_dir() -> PathBuf {
    if let Ok(override_path) = std::env::var(BASE_DIR_ENV) {
        return PathBuf::from(override_path);
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgePaths {
    base: PathBuf,
}

impl EdgePaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base.join("data")
    }

    pub fn pipelines_dir(&self) -> PathBuf {
        self.data_dir().join("pipelines")
    }

    pub fn pipeline_dir(&self, pipeline_id: &str) -> PathBuf {
        self.pipelines_dir().join(pipeline_id)
    }

    pub fn pipeline_file(&self, pipeline_id: &str) -> PathBuf {
        self.pipeline_dir(pipeline_id).join("pipeline.json")
    }

    pub fn info_file(&self, pipeline_id: &str) -> PathBuf {
        self.pipeline_dir(pipeline_id).join("info.json")
    }

    pub fn run_info_root(&self) -> PathBuf {
        self.data_dir().join("runInfo")
    }

    pub fn run_info_dir(&self, pipeline_id: &str) -> PathBuf {
        self.run_info_root().join(pipeline_id)
    }

    pub fn state_file(&self, pipeline_id: &str) -> PathBuf {
        self.run_info_dir(pipeline_id).join("pipelineState.json")
    }

    pub fn state_history_file(&self, pipeline_id: &str) -> PathBuf {
        self.run_info_dir(pipeline_id)
            .join("pipelineStateHistory.json")
    }

    pub fn offset_file(&self, pipeline_id: &str) -> PathBuf {
        self.run_info_dir(pipeline_id).join("offset.json")
    }

    pub fn agent_id_file(&self) -> PathBuf {
        self.data_dir().join("edge.id")
    }

    pub fn etc_dir(&self) -> PathBuf {
        self.base.join("etc")
    }

    pub fn config_file(&self) -> PathBuf {
        self.etc_dir().join("edge.conf")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.base.join("log")
    }

    /// Creates every directory of the layout that must exist at startup.
    pub fn create_dirs(&self) -> io::Result<()> {
        for dir in [
            self.pipelines_dir(),
            self.run_info_root(),
            self.etc_dir(),
            self.log_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
