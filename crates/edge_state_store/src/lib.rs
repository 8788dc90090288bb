//! File-backed persistence for the edge agent.
//!
//! Three stores share the on-disk layout described in
//! [`edge_protocol::paths`]: pipeline configurations, pipeline state with its
//! history, and committed source offsets. All writes go through a temp file
//! and a rename, and writes for one pipeline id are serialized.

mod error;
mod files;
pub mod offset_store;
pub mod pipeline_store;
pub mod state_store;

pub use error::{Result, StoreError};
pub use offset_store::FileOffsetStore;
pub use pipeline_store::PipelineStore;
pub use state_store::StateStore;
