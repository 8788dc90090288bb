//! Control-plane client for the edge agent.
//!
//! [`connect`] performs the startup calls (credential exchange when
//! configured, then registration) and spawns the [`EventLoop`], which pushes
//! status to the control plane and applies the commands it sends back.

pub mod config;
pub mod dispatch;
pub mod event_loop;
pub mod registration;
pub mod transport;

pub use config::{ControlPlaneConfig, ControlPlaneCredentials};
pub use dispatch::{Dispatcher, Outcome};
pub use event_loop::{collect_statuses, EventLoop, EventLoopHandle};
pub use registration::{exchange_credentials, register, AgentInfo};
pub use transport::{HttpTransport, Response, Transport};

use anyhow::{Context, Result};
use edge_manager::PipelineManager;
use edge_runtime::ProcessMetricsProbe;
use std::sync::Arc;
use tracing::info;

/// Startup calls followed by the spawned event loop.
pub async fn connect(
    config: &ControlPlaneConfig,
    transport: Arc<dyn Transport>,
    manager: Arc<PipelineManager>,
    agent: AgentInfo,
    probe: Option<Arc<ProcessMetricsProbe>>,
) -> Result<EventLoopHandle> {
    let auth_token = match &config.credentials {
        Some(credentials) => {
            exchange_credentials(transport.as_ref(), credentials, &agent.component_id)
                .await
                .context("Credential exchange failed")?
        }
        None => config.app_auth_token.clone(),
    };
    if config.register {
        register(transport.as_ref(), &auth_token, &agent)
            .await
            .context("Registration failed")?;
    }

    let mut event_loop = EventLoop::new(
        transport,
        manager,
        agent,
        &auth_token,
        config.ping_frequency(),
        config.status_events_interval(),
    );
    if let Some(probe) = probe {
        event_loop = event_loop.with_process_metrics(probe);
    }
    info!(url = %config.base_url, "Control plane connected");
    Ok(event_loop.spawn())
}
