//! Control-plane settings, read from the `[control_plane]` table of
//! `etc/edge.conf`.

use edge_protocol::defaults::{
    DEFAULT_PING_FREQUENCY_MILLIS, DEFAULT_STATUS_EVENTS_INTERVAL_MILLIS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub enabled: bool,
    /// Base URL every endpoint path is appended to.
    pub base_url: String,
    pub app_auth_token: String,
    /// Announced component id. Empty means the agent id.
    pub component_id: String,
    /// Register the component before the event loop starts.
    pub register: bool,
    pub ping_frequency_millis: u64,
    pub status_events_interval_millis: u64,
    pub request_timeout_millis: u64,
    pub labels: Vec<String>,
    /// When set, exchanged for a component auth token at startup.
    pub credentials: Option<ControlPlaneCredentials>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            app_auth_token: String::new(),
            component_id: String::new(),
            register: true,
            ping_frequency_millis: DEFAULT_PING_FREQUENCY_MILLIS,
            status_events_interval_millis: DEFAULT_STATUS_EVENTS_INTERVAL_MILLIS,
            request_timeout_millis: 30_000,
            labels: Vec::new(),
            credentials: None,
        }
    }
}

impl ControlPlaneConfig {
    pub fn ping_frequency(&self) -> Duration {
        Duration::from_millis(self.ping_frequency_millis.max(1))
    }

    pub fn status_events_interval(&self) -> Duration {
        Duration::from_millis(self.status_events_interval_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_millis)
    }

    pub fn component_id<'a>(&'a self, agent_id: &'a str) -> &'a str {
        if self.component_id.is_empty() {
            agent_id
        } else {
            &self.component_id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlaneCredentials {
    pub user: String,
    pub password: String,
}
