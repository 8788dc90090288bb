use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("duplicate stage instance name '{0}'")]
    DuplicateStage(String),

    #[error("lane '{lane}' is produced by both '{first}' and '{second}'")]
    DuplicateLaneProducer {
        lane: String,
        first: String,
        second: String,
    },

    #[error("stage '{stage}' reads lane '{lane}' that no earlier stage produces")]
    UnknownInputLane { stage: String, lane: String },

    #[error("stage '{stage}' references undefined fragment '{fragment}'")]
    MissingFragment { stage: String, fragment: String },

    #[error("unknown event type id {0}")]
    UnknownEventType(i32),

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}
