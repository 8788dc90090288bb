//! Agent identity: the persistent agent id and the build info announced to
//! the control plane.

use anyhow::{Context, Result};
use edge_protocol::{BuildInfo, EdgePaths};
use std::fs;

/// Reads `data/edge.id`, creating it with a fresh UUID on first start.
pub fn load_or_create_agent_id(paths: &EdgePaths) -> Result<String> {
    let path = paths.agent_id_file();
    if path.exists() {
        let id = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read agent id: {}", path.display()))?;
        let id = id.trim();
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(&path, &id)
        .with_context(|| format!("Failed to write agent id: {}", path.display()))?;
    Ok(id)
}

/// Version of this binary plus what the build environment recorded.
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        built_date: option_env!("EDGE_BUILD_DATE").unwrap_or("").to_string(),
        built_by: option_env!("EDGE_BUILT_BY").unwrap_or("unknown").to_string(),
        built_repo_sha: option_env!("EDGE_BUILD_COMMIT")
            .unwrap_or("unknown")
            .to_string(),
    }
}
