//! Registry of pipeline runners and preview sessions.

use crate::error::ManagerError;
use crate::runner::{runtime_parameters, PipelineRunner, RunnerServices, RuntimeParameters, RESTART_ON_BOOT_ATTR};
use edge_protocol::defaults::{
    AGENT_RESTARTED_MESSAGE, DEFAULT_METRICS_PUBLISH_INTERVAL_MILLIS, DEFAULT_PREVIEW_RETENTION_MILLIS,
};
use edge_protocol::{
    EdgePaths, PipelineConfiguration, PipelineInfo, PipelineState, PipelineStatus, SourceOffset,
};
use edge_runtime::{OffsetStore, PreviewOptions, PreviewOutput, PreviewStatus, Previewer, StageRegistry};
use edge_state_store::{FileOffsetStore, PipelineStore, StateStore};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub agent_id: String,
    /// How often remote pipelines publish their metrics.
    pub metrics_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            metrics_interval: Duration::from_millis(DEFAULT_METRICS_PUBLISH_INTERVAL_MILLIS),
        }
    }
}

pub struct PipelineManager {
    services: RunnerServices,
    runners: RwLock<HashMap<String, Arc<PipelineRunner>>>,
    previews: RwLock<HashMap<String, Arc<Previewer>>>,
    /// Finished previews older than this are dropped on the next create.
    preview_retention: Duration,
}

impl PipelineManager {
    /// Manager over the file stores rooted at `paths`.
    pub fn new(paths: EdgePaths, registry: Arc<StageRegistry>, config: ManagerConfig) -> Self {
        let offsets: Arc<dyn OffsetStore> = Arc::new(FileOffsetStore::new(paths.clone()));
        Self::with_services(RunnerServices {
            pipelines: Arc::new(PipelineStore::new(paths.clone())),
            states: Arc::new(StateStore::new(paths)),
            offsets,
            registry,
            agent_id: config.agent_id,
            metrics_interval: config.metrics_interval,
        })
    }

    pub fn with_services(services: RunnerServices) -> Self {
        Self {
            services,
            runners: RwLock::new(HashMap::new()),
            previews: RwLock::new(HashMap::new()),
            preview_retention: Duration::from_millis(DEFAULT_PREVIEW_RETENTION_MILLIS),
        }
    }

    pub fn with_preview_retention(mut self, retention: Duration) -> Self {
        self.preview_retention = retention;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.services.agent_id
    }

    pub fn registry(&self) -> &Arc<StageRegistry> {
        &self.services.registry
    }

    // ========================================================================
    // Pipelines
    // ========================================================================

    pub fn create_pipeline(
        &self,
        pipeline_id: &str,
        title: &str,
        description: &str,
        user: &str,
    ) -> Result<PipelineConfiguration, ManagerError> {
        let config = self
            .services
            .pipelines
            .create(pipeline_id, title, description, user)?;
        self.runner(pipeline_id)?;
        Ok(config)
    }

    pub fn exists(&self, pipeline_id: &str) -> bool {
        self.services.pipelines.exists(pipeline_id)
    }

    /// Saves a new revision. Refused while the pipeline is active.
    pub fn save_pipeline(
        &self,
        user: &str,
        config: PipelineConfiguration,
    ) -> Result<PipelineConfiguration, ManagerError> {
        let runner = self.runner(&config.pipeline_id)?;
        let status = runner.status().status;
        if status.is_active() {
            return Err(ManagerError::Active {
                pipeline_id: config.pipeline_id,
                status,
            });
        }
        Ok(self.services.pipelines.save(user, config)?)
    }

    pub fn pipeline(&self, pipeline_id: &str) -> Result<PipelineConfiguration, ManagerError> {
        if !self.exists(pipeline_id) {
            return Err(ManagerError::NotFound(pipeline_id.to_string()));
        }
        Ok(self.services.pipelines.load(pipeline_id)?)
    }

    pub fn pipelines(&self) -> Result<Vec<PipelineInfo>, ManagerError> {
        Ok(self.services.pipelines.list()?)
    }

    // ========================================================================
    // Runners
    // ========================================================================

    /// The runner for `pipeline_id`, created on first use.
    pub fn runner(&self, pipeline_id: &str) -> Result<Arc<PipelineRunner>, ManagerError> {
        if let Some(runner) = self.read_runners().get(pipeline_id) {
            return Ok(runner.clone());
        }
        if !self.exists(pipeline_id) {
            return Err(ManagerError::NotFound(pipeline_id.to_string()));
        }
        let mut runners = self.write_runners();
        if let Some(runner) = runners.get(pipeline_id) {
            return Ok(runner.clone());
        }
        let runner = Arc::new(PipelineRunner::new(pipeline_id, self.services.clone())?);
        runners.insert(pipeline_id.to_string(), runner.clone());
        Ok(runner)
    }

    pub fn start(
        &self,
        pipeline_id: &str,
        user: &str,
        runtime_parameters: Option<RuntimeParameters>,
    ) -> Result<PipelineState, ManagerError> {
        Ok(self.runner(pipeline_id)?.start(user, runtime_parameters)?)
    }

    pub fn stop(&self, pipeline_id: &str) -> Result<PipelineState, ManagerError> {
        Ok(self.runner(pipeline_id)?.stop()?)
    }

    /// The runner for `pipeline_id` if one was already created.
    pub fn existing_runner(&self, pipeline_id: &str) -> Option<Arc<PipelineRunner>> {
        self.read_runners().get(pipeline_id).cloned()
    }

    /// Current state of every stored pipeline, ordered by id. Pipelines
    /// without a runner are read from the state store; a pipeline that never
    /// left EDITED has no state file and is reported as EDITED. Nothing is
    /// created or written.
    pub fn states(&self) -> Result<Vec<(PipelineInfo, PipelineState)>, ManagerError> {
        let mut states = Vec::new();
        for info in self.pipelines()? {
            let state = match self.existing_runner(&info.pipeline_id) {
                Some(runner) => runner.status(),
                None => match self.services.states.load_state(&info.pipeline_id) {
                    Ok(Some(state)) => state,
                    Ok(None) => PipelineState::new(&info.pipeline_id, PipelineStatus::Edited),
                    Err(err) => {
                        warn!(pipeline = %info.pipeline_id, error = %err, "Skipping pipeline");
                        continue;
                    }
                },
            };
            states.push((info, state));
        }
        Ok(states)
    }

    /// Committed offset of `pipeline_id`, read straight from the offset store.
    pub fn offset(&self, pipeline_id: &str) -> Result<SourceOffset, ManagerError> {
        Ok(self.services.offsets.load_offset(pipeline_id)?)
    }

    /// Deletes configuration, state and offset. Refused while active.
    pub fn delete(&self, pipeline_id: &str) -> Result<(), ManagerError> {
        let runner = self.runner(pipeline_id)?;
        let status = runner.status().status;
        if status.is_active() {
            return Err(ManagerError::Active {
                pipeline_id: pipeline_id.to_string(),
                status,
            });
        }
        self.write_runners().remove(pipeline_id);
        self.services.pipelines.delete(pipeline_id)?;
        Ok(())
    }

    pub fn stop_and_delete(&self, pipeline_id: &str) -> Result<(), ManagerError> {
        let runner = self.runner(pipeline_id)?;
        if runner.status().status.is_active() {
            runner.stop()?;
        }
        self.delete(pipeline_id)
    }

    // ========================================================================
    // Previews
    // ========================================================================

    /// Builds and initializes the pipeline without running it.
    pub fn validate(&self, pipeline_id: &str) -> Result<PreviewOutput, ManagerError> {
        let config = self.pipeline(pipeline_id)?;
        let previewer = Previewer::new(config, self.services.registry.clone(), self.agent_id());
        Ok(previewer.validate())
    }

    /// Registers a preview of the stored configuration and runs it, on the
    /// calling thread or in the background.
    pub fn create_preview(
        &self,
        pipeline_id: &str,
        options: PreviewOptions,
        run_async: bool,
    ) -> Result<Arc<Previewer>, ManagerError> {
        let config = self.pipeline(pipeline_id)?;
        let previewer = Arc::new(Previewer::new(
            config,
            self.services.registry.clone(),
            self.agent_id(),
        ));
        {
            let mut previews = self.write_previews();
            reap_finished_previews(&mut previews, self.preview_retention);
            previews.insert(previewer.id().to_string(), previewer.clone());
        }
        if run_async {
            previewer.start_async(options)?;
        } else {
            previewer.run_sync(&options);
        }
        Ok(previewer)
    }

    pub fn preview(&self, previewer_id: &str) -> Result<Arc<Previewer>, ManagerError> {
        self.previews
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(previewer_id)
            .cloned()
            .ok_or_else(|| ManagerError::PreviewNotFound(previewer_id.to_string()))
    }

    pub fn preview_status(&self, previewer_id: &str) -> Result<PreviewStatus, ManagerError> {
        Ok(self.preview(previewer_id)?.status())
    }

    pub fn stop_preview(&self, previewer_id: &str) -> Result<PreviewStatus, ManagerError> {
        let previewer = self.preview(previewer_id)?;
        previewer.stop();
        previewer.wait();
        Ok(previewer.status())
    }

    /// Forgets a preview that is no longer running.
    pub fn remove_preview(&self, previewer_id: &str) -> Result<(), ManagerError> {
        let previewer = self.preview(previewer_id)?;
        if previewer.status().is_active() {
            self.stop_preview(previewer_id)?;
        }
        self.write_previews().remove(previewer_id);
        Ok(())
    }

    // ========================================================================
    // Agent lifecycle
    // ========================================================================

    /// Restarts pipelines a previous agent process left active or stopped
    /// on shutdown. Active ones are first forced to STOPPED. Returns how
    /// many were started.
    pub fn restore(&self) -> Result<usize, ManagerError> {
        let mut restarted = 0;
        for state in self.services.states.all_states()? {
            let marked = state.status == PipelineStatus::Stopped
                && state.attributes.get(RESTART_ON_BOOT_ATTR) == Some(&JsonValue::Bool(true));
            if !state.status.is_active() && !marked {
                continue;
            }
            let runner = match self.runner(&state.pipeline_id) {
                Ok(runner) => runner,
                Err(err) => {
                    warn!(pipeline = %state.pipeline_id, error = %err, "Cannot restore pipeline");
                    continue;
                }
            };
            if state.status.is_active() {
                if let Err(err) = runner.recover(AGENT_RESTARTED_MESSAGE) {
                    warn!(pipeline = %state.pipeline_id, error = %err, "Cannot reset pipeline state");
                    continue;
                }
            }
            let user = state.user.clone().unwrap_or_default();
            match runner.start(&user, runtime_parameters(&state)) {
                Ok(started) => {
                    info!(pipeline = %state.pipeline_id, status = %started.status, "Pipeline restored");
                    restarted += 1;
                }
                Err(err) => warn!(pipeline = %state.pipeline_id, error = %err, "Cannot restart pipeline"),
            }
        }
        Ok(restarted)
    }

    /// Stops every active runner and preview.
    pub fn shutdown(&self) {
        let runners: Vec<_> = self.read_runners().values().cloned().collect();
        for runner in runners {
            if !runner.status().status.is_active() {
                continue;
            }
            if let Err(err) = runner.shutdown() {
                warn!(pipeline = %runner.pipeline_id(), error = %err, "Cannot stop pipeline");
            }
        }
        let previews: Vec<_> = self
            .previews
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for previewer in previews {
            previewer.stop();
            previewer.wait();
        }
        info!("Pipeline manager stopped");
    }

    fn read_runners(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<PipelineRunner>>> {
        self.runners.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_runners(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<PipelineRunner>>> {
        self.runners.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_previews(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Previewer>>> {
        self.previews.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drops previews whose run ended at least `retention` ago.
fn reap_finished_previews(previews: &mut HashMap<String, Arc<Previewer>>, retention: Duration) {
    previews.retain(|id, previewer| match previewer.finished_at() {
        Some(finished) if finished.elapsed() >= retention => {
            debug!(preview = %id, "Reaped finished preview");
            false
        }
        _ => true,
    });
}
