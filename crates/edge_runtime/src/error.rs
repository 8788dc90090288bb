use crate::el::ElError;
use edge_protocol::{Issue, ProtocolError};
use edge_record::RecordError;
use thiserror::Error;

/// Failure raised by a stage while executing a batch.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage '{stage}' stopped the pipeline: {message}")]
    StopPipeline { stage: String, message: String },

    #[error("{0}")]
    Execution(String),

    #[error("unknown output lane '{0}'")]
    UnknownLane(String),

    #[error("stage '{0}' has no output lanes")]
    NoOutputLanes(String),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Expression(#[from] ElError),
}

impl StageError {
    pub fn execution(message: impl Into<String>) -> Self {
        StageError::Execution(message.into())
    }
}

/// Problem with a `{name, value}` configuration list.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("missing required configuration '{0}'")]
    Missing(String),

    #[error("configuration '{name}' expects {expected}, got {value}")]
    InvalidType {
        name: String,
        expected: &'static str,
        value: String,
    },

    #[error("configuration '{name}' is invalid: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("unknown configuration option(s): {}", .0.join(", "))]
    Unknown(Vec<String>),
}

impl ConfigError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Name of the offending option, when there is exactly one.
    pub fn config_name(&self) -> Option<&str> {
        match self {
            ConfigError::Missing(name)
            | ConfigError::InvalidType { name, .. }
            | ConfigError::InvalidValue { name, .. } => Some(name),
            ConfigError::Unknown(names) if names.len() == 1 => Some(&names[0]),
            ConfigError::Unknown(_) => None,
        }
    }

    /// Issue raised against a stage, or against the pipeline when `instance`
    /// is `None`.
    pub fn to_issue(&self, instance: Option<&str>) -> Issue {
        let issue = match instance {
            Some(instance) => Issue::stage(instance, self.to_string()),
            None => Issue::pipeline(self.to_string()),
        };
        match self.config_name() {
            Some(name) => issue.with_config(name),
            None => issue,
        }
    }
}

/// Failure building or running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Wiring(#[from] ProtocolError),

    #[error("stage '{stage}' uses unknown stage definition '{definition}'")]
    UnknownStage { stage: String, definition: String },

    #[error("pipeline has no origin stage")]
    MissingOrigin,

    #[error("pipeline has more than one origin: {}", .0.join(", "))]
    MultipleOrigins(Vec<String>),

    #[error("stage '{stage}' is misconfigured: {reason}")]
    InvalidLanes { stage: String, reason: String },

    #[error("error stage '{0}' must be a target")]
    ErrorStageNotTarget(String),

    #[error("stage '{0}' is not part of the pipeline")]
    UnknownStageInstance(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: StageError,
    },

    #[error("offset store: {0}")]
    Offset(#[from] OffsetStoreError),

    #[error("pipeline was not initialized")]
    NotInitialized,
}

impl PipelineError {
    pub fn stage(stage: impl Into<String>, source: StageError) -> Self {
        PipelineError::Stage {
            stage: stage.into(),
            source,
        }
    }
}

/// Failure starting or driving a preview.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("preview '{0}' is already running")]
    AlreadyRunning(String),

    #[error("failed to start preview thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Failure reported by an [`crate::offset::OffsetStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct OffsetStoreError(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use edge_protocol::IssueLevel;

    #[test]
    fn test_config_error_issue() {
        let issue = ConfigError::Missing("batchSize".into()).to_issue(Some("gen"));
        assert_eq!(issue.level, IssueLevel::Stage);
        assert_eq!(issue.config_name.as_deref(), Some("batchSize"));
        assert_eq!(
            issue.to_string(),
            "gen: [batchSize] missing required configuration 'batchSize'"
        );

        let issue = ConfigError::Unknown(vec!["a".into(), "b".into()]).to_issue(None);
        assert_eq!(issue.level, IssueLevel::Pipeline);
        assert_eq!(issue.message, "unknown configuration option(s): a, b");
    }
}
