//! Versioned source offset as stored in `offset.json`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entity key used by single-entity (pull) sources.
pub const POLL_SOURCE_OFFSET_KEY: &str = "$edge.pollsource.offset$";
pub const CURRENT_OFFSET_VERSION: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOffset {
    pub version: i32,
    #[serde(default)]
    pub offsets: BTreeMap<String, String>,
}

impl Default for SourceOffset {
    fn default() -> Self {
        Self {
            version: CURRENT_OFFSET_VERSION,
            offsets: BTreeMap::new(),
        }
    }
}

impl SourceOffset {
    pub fn from_poll_offset(offset: Option<&str>) -> Self {
        let mut source_offset = Self::default();
        if let Some(offset) = offset {
            source_offset
                .offsets
                .insert(POLL_SOURCE_OFFSET_KEY.to_string(), offset.to_string());
        }
        source_offset
    }

    pub fn poll_offset(&self) -> Option<&str> {
        self.offsets.get(POLL_SOURCE_OFFSET_KEY).map(String::as_str)
    }

    pub fn set_poll_offset(&mut self, offset: Option<&str>) {
        match offset {
            Some(offset) => {
                self.offsets
                    .insert(POLL_SOURCE_OFFSET_KEY.to_string(), offset.to_string());
            }
            None => {
                self.offsets.remove(POLL_SOURCE_OFFSET_KEY);
            }
        }
    }

    /// A pull source is finished once its committed offset is the empty string.
    pub fn is_finished(&self) -> bool {
        self.poll_offset() == Some("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let offset = SourceOffset::from_poll_offset(Some("42"));
        let json = serde_json::to_value(&offset).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"version": 2, "offsets": {"$edge.pollsource.offset$": "42"}})
        );
        assert!(!offset.is_finished());
    }

    #[test]
    fn test_finished_compares_by_value() {
        let finished = String::new();
        let offset = SourceOffset::from_poll_offset(Some(finished.as_str()));
        assert!(offset.is_finished());
        assert!(!SourceOffset::default().is_finished());
    }
}
