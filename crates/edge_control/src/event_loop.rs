//! The control-plane event loop.
//!
//! Design principles:
//! - run() consumes self; the loop owns the queue of pending acks
//! - Each tick is one POST: pending acks, the agent info on the first
//!   successful exchange, and status plus process metrics when due
//! - Acks leave the queue only after a POST answered with HTTP 200
//! - Transport failures, rejections and undecodable responses are logged
//!   and the loop carries on
//! - Shutdown is observed between ticks; an in-flight POST completes first

use crate::dispatch::{Dispatcher, Outcome};
use crate::registration::AgentInfo;
use crate::transport::{app_headers, Headers, Transport};
use anyhow::{Context, Result};
use edge_manager::PipelineManager;
use edge_protocol::defaults::{EVENTS_PATH, JOB_RUNNER_APP};
use edge_protocol::{
    AckEvent, ClientEvent, EventType, PipelineStatus, PipelineStatusEvent, PipelineStatusEvents,
    ProcessMetricsEvent, SdcInfoEvent, ServerEvent,
};
use edge_runtime::ProcessMetricsProbe;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Revision reported for every pipeline; the agent keeps a single one.
const PIPELINE_REVISION: &str = "0";

/// Handle for stopping a spawned loop.
pub struct EventLoopHandle {
    shutdown_tx: mpsc::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl EventLoopHandle {
    /// Signals the loop and waits for it to leave.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(()).await;
        self.join_handle
            .await
            .context("Control-plane loop task failed")
    }
}

pub struct EventLoop {
    transport: Arc<dyn Transport>,
    manager: Arc<PipelineManager>,
    dispatcher: Arc<Dispatcher>,
    agent: AgentInfo,
    headers: Headers,
    probe: Option<Arc<ProcessMetricsProbe>>,
    pending_acks: Vec<ClientEvent>,
    ping_frequency: Duration,
    status_interval: Duration,
    info_sent: bool,
    next_status: Option<Instant>,
}

impl EventLoop {
    pub fn new(
        transport: Arc<dyn Transport>,
        manager: Arc<PipelineManager>,
        agent: AgentInfo,
        auth_token: &str,
        ping_frequency: Duration,
        status_interval: Duration,
    ) -> Self {
        Self {
            headers: app_headers(auth_token, &agent.component_id),
            dispatcher: Arc::new(Dispatcher::new(manager.clone())),
            transport,
            manager,
            agent,
            probe: None,
            pending_acks: Vec::new(),
            ping_frequency,
            status_interval,
            info_sent: false,
            next_status: None,
        }
    }

    /// Attaches process metrics to status ticks.
    pub fn with_process_metrics(mut self, probe: Arc<ProcessMetricsProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn pending_acks(&self) -> &[ClientEvent] {
        &self.pending_acks
    }

    pub fn ping_frequency(&self) -> Duration {
        self.ping_frequency
    }

    pub fn spawn(self) -> EventLoopHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let join_handle = tokio::spawn(self.run(shutdown_rx));
        EventLoopHandle {
            shutdown_tx,
            join_handle,
        }
    }

    /// Ticks until a shutdown signal arrives or every sender is gone.
    pub async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            ping_ms = self.ping_frequency.as_millis() as u64,
            "Control-plane loop started"
        );
        loop {
            self.tick().await;
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(self.ping_frequency) => {}
            }
        }
        info!(pending_acks = self.pending_acks.len(), "Control-plane loop stopped");
    }

    /// One exchange with the control plane.
    pub async fn tick(&mut self) {
        let mut events = self.pending_acks.clone();
        if !self.info_sent {
            match self.info_event() {
                Ok(event) => events.push(event),
                Err(err) => warn!(error = %format!("{:#}", err), "Cannot build agent info event"),
            }
        }
        let now = Instant::now();
        if self.next_status.map_or(true, |due| now >= due) {
            match self.status_events().await {
                Ok(mut status) => events.append(&mut status),
                Err(err) => warn!(error = %format!("{:#}", err), "Cannot build status events"),
            }
            self.next_status = Some(now + self.status_interval);
        }

        let body = match serde_json::to_value(&events) {
            Ok(body) => body,
            Err(err) => {
                error!(error = %err, "Cannot serialize client events");
                return;
            }
        };
        let response = match self.transport.post(EVENTS_PATH, &self.headers, &body).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %format!("{:#}", err), "Control-plane request failed");
                return;
            }
        };
        if !response.is_ok() {
            warn!(status = response.status, body = %response.body, "Control plane rejected events");
            return;
        }
        self.pending_acks.clear();
        self.info_sent = true;
        debug!(sent = events.len(), "Events delivered");

        if response.body.trim().is_empty() {
            return;
        }
        let server_events: Vec<ServerEvent> = match serde_json::from_str(&response.body) {
            Ok(server_events) => server_events,
            Err(err) => {
                warn!(error = %err, "Cannot decode server events");
                return;
            }
        };
        for event in server_events {
            self.handle(event).await;
        }
    }

    async fn handle(&mut self, event: ServerEvent) {
        if event.is_ack_event {
            debug!(event = %event.event_id, "Server ack");
            return;
        }
        let dispatcher = self.dispatcher.clone();
        let command = event.clone();
        let outcome = match tokio::task::spawn_blocking(move || dispatcher.dispatch(&command)).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(event = %event.event_id, error = %err, "Server command panicked");
                Outcome {
                    ack: AckEvent::error("command failed unexpectedly"),
                    ping_frequency: None,
                }
            }
        };
        if let Some(frequency) = outcome.ping_frequency {
            info!(ping_ms = frequency.as_millis() as u64, "Ping frequency adjusted");
            self.ping_frequency = frequency;
        }
        if event.requires_ack {
            match ClientEvent::ack(&event, &outcome.ack) {
                Ok(ack) => self.pending_acks.push(ack),
                Err(err) => error!(event = %event.event_id, error = %err, "Cannot build ack"),
            }
        }
    }

    fn info_event(&self) -> Result<ClientEvent> {
        let total_memory = self
            .probe
            .as_ref()
            .map_or(0, |probe| probe.latest().total_memory);
        let mut attributes = BTreeMap::new();
        attributes.insert("os".to_string(), AgentInfo::os().to_string());
        attributes.insert("arch".to_string(), AgentInfo::arch().to_string());
        let info = SdcInfoEvent {
            sdc_id: self.agent.agent_id.clone(),
            http_url: self.agent.http_url.clone(),
            runtime_version: self.agent.build.version.clone(),
            sdc_build_info: self.agent.build.clone(),
            labels: self.agent.labels.clone(),
            edge: true,
            total_memory,
            attributes,
        };
        Ok(ClientEvent::new(EventType::SdcInfoEvent, destinations(), &info)?)
    }

    /// The multi-pipeline status event, plus process metrics when a probe
    /// is attached.
    async fn status_events(&self) -> Result<Vec<ClientEvent>> {
        let manager = self.manager.clone();
        let statuses = tokio::task::spawn_blocking(move || collect_statuses(&manager))
            .await
            .context("Status collection panicked")??;
        let mut events = vec![ClientEvent::new(
            EventType::StatusMultiplePipelines,
            destinations(),
            &statuses,
        )?];
        if let Some(probe) = &self.probe {
            let metrics = ProcessMetricsEvent::from(probe.latest());
            events.push(ClientEvent::new(
                EventType::SdcProcessMetricsEvent,
                destinations(),
                &metrics,
            )?);
        }
        Ok(events)
    }
}

fn destinations() -> Vec<String> {
    vec![JOB_RUNNER_APP.to_string()]
}

/// Status of every pipeline that has left EDITED. Reads stored state and
/// offsets; no runner is created for a pipeline nobody started.
pub fn collect_statuses(manager: &PipelineManager) -> Result<PipelineStatusEvents> {
    let mut list = Vec::new();
    for (info, state) in manager.states()? {
        if state.status == PipelineStatus::Edited {
            continue;
        }
        let offset = match manager.offset(&info.pipeline_id) {
            Ok(offset) => serde_json::to_string(&offset).ok(),
            Err(err) => {
                warn!(pipeline = %info.pipeline_id, error = %err, "Cannot read offset");
                None
            }
        };
        let is_remote = state.is_remote();
        list.push(PipelineStatusEvent {
            name: info.pipeline_id.clone(),
            title: info.title.clone(),
            rev: PIPELINE_REVISION.to_string(),
            time_stamp: state.time_stamp,
            is_remote,
            pipeline_status: state.status.to_string(),
            message: state.message.clone(),
            offset,
            offset_persisted: true,
            is_cluster_mode: false,
            runner_count: 1,
            metrics: if is_remote {
                manager
                    .existing_runner(&info.pipeline_id)
                    .and_then(|runner| runner.published_metrics())
            } else {
                None
            },
        });
    }
    Ok(PipelineStatusEvents {
        pipeline_status_event_list: list,
    })
}
