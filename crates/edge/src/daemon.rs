//! Agent lifecycle: startup wiring, the wait for Ctrl-C, ordered shutdown.
//!
//! Design principles:
//! - Everything that can fail at startup fails before Ctrl-C is awaited
//! - Pipelines are restored before the control plane can send commands
//! - Shutdown stops the control-plane loop first, then the pipelines

use crate::config::EdgeConfig;
use crate::identity::{build_info, load_or_create_agent_id};
use anyhow::{Context, Result};
use edge_control::{AgentInfo, EventLoopHandle, HttpTransport, Transport};
use edge_manager::{ManagerConfig, PipelineManager};
use edge_protocol::EdgePaths;
use edge_runtime::{MetricRegistry, ProcessMetricsProbe, StageRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Upper bound on stopping pipelines once Ctrl-C arrived.
const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Running agent.
pub struct Agent {
    pub agent_id: String,
    manager: Arc<PipelineManager>,
    probe: Option<ProbeTask>,
    control: Option<EventLoopHandle>,
}

struct ProbeTask {
    stop_tx: watch::Sender<bool>,
    join_handle: JoinHandle<()>,
}

impl Agent {
    /// Builds the manager, restores pipelines and connects to the control
    /// plane when enabled.
    pub async fn start(paths: &EdgePaths, config: &EdgeConfig) -> Result<Self> {
        let agent_id = load_or_create_agent_id(paths)?;
        info!(agent = %agent_id, base = %paths.base().display(), "Starting edge agent");

        let manager = Arc::new(PipelineManager::new(
            paths.clone(),
            Arc::new(StageRegistry::with_builtin_stages()),
            ManagerConfig {
                agent_id: agent_id.clone(),
                metrics_interval: config.execution.metrics_publish_interval(),
            },
        ));
        let restoring = manager.clone();
        let restarted = tokio::task::spawn_blocking(move || restoring.restore())
            .await
            .context("Pipeline restore panicked")?
            .context("Failed to restore pipelines")?;
        info!(restarted, "Pipelines restored");

        let (probe, probe_task) = if config.process_metrics.enabled {
            let probe = Arc::new(ProcessMetricsProbe::new(&MetricRegistry::new()));
            let task = spawn_probe(probe.clone(), config.process_metrics.interval());
            (Some(probe), Some(task))
        } else {
            (None, None)
        };

        let mut agent = Self {
            agent_id,
            manager,
            probe: probe_task,
            control: None,
        };
        if config.control_plane.enabled {
            match agent.connect(config, probe).await {
                Ok(handle) => agent.control = Some(handle),
                Err(err) => {
                    agent.shutdown().await;
                    return Err(err);
                }
            }
        } else {
            info!("Control plane disabled");
        }
        Ok(agent)
    }

    pub fn manager(&self) -> &Arc<PipelineManager> {
        &self.manager
    }

    async fn connect(
        &self,
        config: &EdgeConfig,
        probe: Option<Arc<ProcessMetricsProbe>>,
    ) -> Result<EventLoopHandle> {
        let control = &config.control_plane;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(
            control.base_url.clone(),
            control.request_timeout(),
        )?);
        let agent = AgentInfo {
            agent_id: self.agent_id.clone(),
            component_id: control.component_id(&self.agent_id).to_string(),
            http_url: config.http.base_url.clone(),
            build: build_info(),
            labels: control.labels.clone(),
        };
        edge_control::connect(control, transport, self.manager.clone(), agent, probe)
            .await
            .context("Failed to connect to the control plane")
    }

    /// Stops the control-plane loop, the probe and every active pipeline.
    pub async fn shutdown(mut self) {
        if let Some(control) = self.control.take() {
            if let Err(err) = control.shutdown().await {
                warn!(error = %format!("{:#}", err), "Control-plane loop shutdown error");
            }
        }
        if let Some(probe) = self.probe.take() {
            let _ = probe.stop_tx.send(true);
            let _ = probe.join_handle.await;
        }

        let manager = self.manager.clone();
        let stopping = tokio::task::spawn_blocking(move || manager.shutdown());
        match tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS), stopping).await {
            Ok(Ok(())) => info!("Edge agent stopped"),
            Ok(Err(err)) => error!(error = %err, "Pipeline shutdown panicked"),
            Err(_) => warn!(
                timeout_secs = SHUTDOWN_TIMEOUT_SECS,
                "Shutdown timeout exceeded, leaving pipelines behind"
            ),
        }
    }
}

fn spawn_probe(probe: Arc<ProcessMetricsProbe>, period: Duration) -> ProbeTask {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let join_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => {
                    probe.refresh();
                }
            }
        }
    });
    ProbeTask {
        stop_tx,
        join_handle,
    }
}

/// `edge run`: start, wait for Ctrl-C, stop.
pub async fn run(paths: EdgePaths, config: EdgeConfig) -> Result<()> {
    let agent = Agent::start(&paths, &config).await?;
    let signal = tokio::signal::ctrl_c().await;
    info!("Shutting down");
    agent.shutdown().await;
    signal.context("Failed to listen for Ctrl-C")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_standalone_agent_starts_and_stops() {
        let temp = TempDir::new().unwrap();
        let paths = EdgePaths::new(temp.path());
        paths.create_dirs().unwrap();

        let agent = Agent::start(&paths, &EdgeConfig::default()).await.unwrap();
        assert!(agent.control.is_none());
        assert!(agent.probe.is_some());
        assert!(agent.manager().pipelines().unwrap().is_empty());
        let id = std::fs::read_to_string(paths.agent_id_file()).unwrap();
        assert_eq!(id, agent.agent_id);
        agent.shutdown().await;

        let again = Agent::start(&paths, &EdgeConfig::default()).await.unwrap();
        assert_eq!(again.agent_id, id);
        again.shutdown().await;
    }

    #[tokio::test]
    async fn test_unreachable_control_plane_fails_startup() {
        let temp = TempDir::new().unwrap();
        let paths = EdgePaths::new(temp.path());
        paths.create_dirs().unwrap();
        let mut config = EdgeConfig::default();
        config.process_metrics.enabled = false;
        config.control_plane.enabled = true;
        config.control_plane.base_url = "http://127.0.0.1:1".into();
        config.control_plane.request_timeout_millis = 2_000;

        let err = Agent::start(&paths, &config).await.err().unwrap();
        assert!(format!("{:#}", err).contains("control plane"));
    }
}
