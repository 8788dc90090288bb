//! Canonical default values shared by the runtime, manager and control plane.

/// Maximum records an origin may produce per batch unless configured.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Current pipeline configuration schema version.
pub const PIPELINE_SCHEMA_VERSION: i32 = 5;

/// Pipeline state history kept on disk.
pub const STATE_HISTORY_LIMIT: usize = 100;

pub const DEFAULT_SHOULD_RETRY: bool = true;
/// Negative means unbounded.
pub const DEFAULT_RETRY_ATTEMPTS: i64 = -1;
pub const DEFAULT_RETRY_BASE_DELAY_MILLIS: u64 = 1_000;
pub const MAX_RETRY_DELAY_MILLIS: u64 = 300_000;

/// Error records and messages retained per stage for inspection.
pub const DEFAULT_ERROR_HISTORY_SIZE: usize = 100;

pub const DEFAULT_PREVIEW_BATCHES: usize = 1;
pub const DEFAULT_PREVIEW_BATCH_SIZE: usize = 10;
pub const DEFAULT_PREVIEW_TIMEOUT_MILLIS: u64 = 120_000;
/// How long a finished preview stays readable before it is reaped.
pub const DEFAULT_PREVIEW_RETENTION_MILLIS: u64 = 300_000;

pub const DEFAULT_PING_FREQUENCY_MILLIS: u64 = 5_000;
pub const DEFAULT_STATUS_EVENTS_INTERVAL_MILLIS: u64 = 60_000;
pub const DEFAULT_METRICS_PUBLISH_INTERVAL_MILLIS: u64 = 60_000;
pub const DEFAULT_PROCESS_METRICS_INTERVAL_MILLIS: u64 = 5_000;

/// Destination app for client events sent to the control plane.
pub const JOB_RUNNER_APP: &str = "jobrunner-app";

pub const REGISTRATION_PATH: &str = "security/public-rest/v1/components/registration";
pub const EVENTS_PATH: &str = "messaging/rest/v1/events";
pub const LOGIN_PATH: &str = "security/public-rest/v1/authentication/login";
pub const COMPONENT_TOKEN_PATH: &str = "security/rest/v1/authentication/token";

pub const AGENT_RESTARTED_MESSAGE: &str = "agent restarted";
