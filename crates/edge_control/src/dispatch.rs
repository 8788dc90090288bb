//! Server commands applied to the pipeline manager.
//!
//! Every command ends in an [`AckEvent`]: SUCCESS when the manager accepted
//! it, ERROR with the cause when it did not (including undecodable payloads),
//! IGNORE for commands this agent does not act on. Manager calls block, so
//! the event loop runs [`Dispatcher::dispatch`] on the blocking pool.

use anyhow::{bail, Context, Result};
use edge_manager::PipelineManager;
use edge_protocol::{
    AckEvent, EventType, PingFrequencyAdjustmentEvent, PipelineBaseEvent, PipelineConfiguration,
    PipelineSaveEvent, PipelineStartEvent, PipelineStatus, ServerEvent,
};
use edge_runtime::PreviewStatus;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Result of one command.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub ack: AckEvent,
    /// New tick interval requested by the server.
    pub ping_frequency: Option<Duration>,
}

impl Outcome {
    fn ack(ack: AckEvent) -> Self {
        Self {
            ack,
            ping_frequency: None,
        }
    }

    fn success() -> Self {
        Self::ack(AckEvent::success())
    }
}

pub struct Dispatcher {
    manager: Arc<PipelineManager>,
}

impl Dispatcher {
    pub fn new(manager: Arc<PipelineManager>) -> Self {
        Self { manager }
    }

    pub fn dispatch(&self, event: &ServerEvent) -> Outcome {
        let event_type = match event.event_type() {
            Ok(event_type) => event_type,
            Err(err) => {
                warn!(event = %event.event_id, error = %err, "Ignoring server event");
                return Outcome::ack(AckEvent::ignore(err.to_string()));
            }
        };
        info!(event = %event.event_id, event_type = %event_type, "Server command");

        let result = match event_type {
            EventType::SavePipeline => self.save(event),
            EventType::StartPipeline => self.start(event),
            EventType::StopPipeline => self.stop(event),
            EventType::DeletePipeline => self.delete(event),
            EventType::StopDeletePipeline => self.stop_and_delete(event),
            EventType::ValidatePipeline => self.validate(event),
            EventType::ResetOffsetPipeline => self.reset_offset(event),
            EventType::DeleteHistoryPipeline => self.delete_history(event),
            EventType::PingFrequencyAdjustment => ping_frequency(event),
            EventType::SaveRulesPipeline => Ok(Outcome::ack(AckEvent::ignore(
                "metric rules are not supported",
            ))),
            EventType::SsoDisconnectedModeCredentials => Ok(Outcome::ack(AckEvent::ignore(
                "disconnected-mode credentials are not used",
            ))),
            EventType::SyncAcl => Ok(Outcome::ack(AckEvent::ignore(
                "pipeline access control is not enforced",
            ))),
            other => Ok(Outcome::ack(AckEvent::ignore(format!(
                "{} is not a server command",
                other
            )))),
        };

        result.unwrap_or_else(|err| {
            let message = format!("{:#}", err);
            warn!(event = %event.event_id, event_type = %event_type, error = %message, "Server command failed");
            Outcome::ack(AckEvent::error(message))
        })
    }

    /// Creates the pipeline when needed, stores the server's configuration
    /// over it and marks it remote.
    fn save(&self, event: &ServerEvent) -> Result<Outcome> {
        let payload: PipelineSaveEvent = event.decode_payload().context("invalid save payload")?;
        let mut config: PipelineConfiguration = serde_json::from_str(
            &payload.pipeline_configuration_and_rules.pipeline_config,
        )
        .context("invalid pipeline configuration")?;

        let current = if self.manager.exists(&payload.name) {
            self.manager.pipeline(&payload.name)?
        } else {
            let title = if config.title.is_empty() {
                payload.name.clone()
            } else {
                config.title.clone()
            };
            self.manager
                .create_pipeline(&payload.name, &title, &payload.description, &payload.user)?
        };
        config.pipeline_id = payload.name.clone();
        config.uuid = current.uuid;
        config.info = current.info;
        if config.title.is_empty() {
            config.title = current.title;
        }
        if !payload.description.is_empty() {
            config.description = payload.description.clone();
        }
        self.manager.save_pipeline(&payload.user, config)?;
        self.manager.runner(&payload.name)?.set_remote(true)?;
        Ok(Outcome::success())
    }

    fn start(&self, event: &ServerEvent) -> Result<Outcome> {
        let payload: PipelineStartEvent = event.decode_payload().context("invalid start payload")?;
        let state = self
            .manager
            .start(&payload.name, &payload.user, payload.runtime_parameters)?;
        if state.status == PipelineStatus::StartError {
            bail!(
                "pipeline '{}' failed to start: {}",
                payload.name,
                state.message.unwrap_or_default()
            );
        }
        Ok(Outcome::success())
    }

    fn stop(&self, event: &ServerEvent) -> Result<Outcome> {
        let payload = base_payload(event)?;
        self.manager.stop(&payload.name)?;
        Ok(Outcome::success())
    }

    fn delete(&self, event: &ServerEvent) -> Result<Outcome> {
        let payload = base_payload(event)?;
        self.manager.delete(&payload.name)?;
        Ok(Outcome::success())
    }

    fn stop_and_delete(&self, event: &ServerEvent) -> Result<Outcome> {
        let payload = base_payload(event)?;
        self.manager.stop_and_delete(&payload.name)?;
        Ok(Outcome::success())
    }

    fn validate(&self, event: &ServerEvent) -> Result<Outcome> {
        let payload = base_payload(event)?;
        let output = self.manager.validate(&payload.name)?;
        if output.status != PreviewStatus::Valid {
            bail!(
                "pipeline '{}' is {}: {}",
                payload.name,
                output.status,
                output.message.unwrap_or_default()
            );
        }
        Ok(Outcome::success())
    }

    fn reset_offset(&self, event: &ServerEvent) -> Result<Outcome> {
        let payload = base_payload(event)?;
        self.manager.runner(&payload.name)?.reset_offset()?;
        Ok(Outcome::success())
    }

    fn delete_history(&self, event: &ServerEvent) -> Result<Outcome> {
        let payload = base_payload(event)?;
        self.manager.runner(&payload.name)?.delete_history()?;
        Ok(Outcome::success())
    }
}

fn base_payload(event: &ServerEvent) -> Result<PipelineBaseEvent> {
    event.decode_payload().context("invalid pipeline payload")
}

fn ping_frequency(event: &ServerEvent) -> Result<Outcome> {
    let payload: PingFrequencyAdjustmentEvent =
        event.decode_payload().context("invalid ping frequency payload")?;
    if payload.ping_frequency == 0 {
        bail!("ping frequency must be positive");
    }
    Ok(Outcome {
        ack: AckEvent::success(),
        ping_frequency: Some(Duration::from_millis(payload.ping_frequency)),
    })
}
