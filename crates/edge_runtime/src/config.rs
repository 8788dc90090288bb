//! Explicit readers for `{name, value}` configuration lists.
//!
//! Each config bean has one parse function that pulls its options out of a
//! [`ConfigReader`] and finishes with [`ConfigReader::finish`], which rejects
//! any option nobody asked for.

use crate::error::ConfigError;
use crate::params::Parameters;
use edge_protocol::defaults::{
    DEFAULT_MAX_BATCH_SIZE, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY_MILLIS,
    DEFAULT_SHOULD_RETRY, MAX_RETRY_DELAY_MILLIS,
};
use edge_protocol::Config;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Reader
// ============================================================================

pub struct ConfigReader<'a> {
    values: Vec<(&'a str, &'a JsonValue)>,
    consumed: HashSet<&'a str>,
}

impl<'a> ConfigReader<'a> {
    pub fn new(configs: &'a [Config]) -> Self {
        Self {
            values: configs.iter().map(|c| (c.name.as_str(), &c.value)).collect(),
            consumed: HashSet::new(),
        }
    }

    /// Reader over the entries of a JSON object (one element of a bean list).
    pub fn from_object(object: &'a JsonMap<String, JsonValue>) -> Self {
        Self {
            values: object.iter().map(|(k, v)| (k.as_str(), v)).collect(),
            consumed: HashSet::new(),
        }
    }

    /// Marks options handled elsewhere so `finish` does not reject them.
    pub fn ignoring(mut self, names: &[&str]) -> Self {
        for (name, _) in &self.values {
            if names.contains(name) {
                self.consumed.insert(*name);
            }
        }
        self
    }

    /// Value of `name`; an explicit JSON null counts as absent.
    pub fn optional(&mut self, name: &str) -> Option<&'a JsonValue> {
        let (key, value) = self.values.iter().find(|(k, _)| *k == name).copied()?;
        self.consumed.insert(key);
        (!value.is_null()).then_some(value)
    }

    pub fn required(&mut self, name: &str) -> Result<&'a JsonValue, ConfigError> {
        self.optional(name)
            .ok_or_else(|| ConfigError::Missing(name.to_string()))
    }

    pub fn string(&mut self, name: &str) -> Result<String, ConfigError> {
        let value = self.required(name)?;
        as_string(name, value)
    }

    pub fn string_or(&mut self, name: &str, default: &str) -> Result<String, ConfigError> {
        match self.optional(name) {
            Some(value) => as_string(name, value),
            None => Ok(default.to_string()),
        }
    }

    pub fn bool_or(&mut self, name: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(name) {
            None => Ok(default),
            Some(JsonValue::Bool(b)) => Ok(*b),
            Some(JsonValue::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
            Some(JsonValue::String(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
            Some(other) => Err(invalid_type(name, "a boolean", other)),
        }
    }

    pub fn i64_or(&mut self, name: &str, default: i64) -> Result<i64, ConfigError> {
        match self.optional(name) {
            None => Ok(default),
            Some(value) => as_i64(name, value),
        }
    }

    pub fn u64_or(&mut self, name: &str, default: u64) -> Result<u64, ConfigError> {
        match self.optional(name) {
            None => Ok(default),
            Some(value) => u64::try_from(as_i64(name, value)?)
                .map_err(|_| invalid_type(name, "a non-negative integer", value)),
        }
    }

    pub fn f64_or(&mut self, name: &str, default: f64) -> Result<f64, ConfigError> {
        match self.optional(name) {
            None => Ok(default),
            Some(JsonValue::Number(n)) => n
                .as_f64()
                .ok_or_else(|| invalid_type(name, "a number", &JsonValue::Number(n.clone()))),
            Some(JsonValue::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| invalid_type(name, "a number", &JsonValue::String(s.clone()))),
            Some(other) => Err(invalid_type(name, "a number", other)),
        }
    }

    /// Enumerated option parsed through `FromStr`.
    pub fn parse_or<T>(&mut self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(name) {
            None => Ok(default),
            Some(value) => as_string(name, value)?
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(name, e.to_string())),
        }
    }

    /// List of strings; absent means empty.
    pub fn string_list(&mut self, name: &str) -> Result<Vec<String>, ConfigError> {
        match self.optional(name) {
            None => Ok(Vec::new()),
            Some(JsonValue::Array(items)) => items.iter().map(|item| as_string(name, item)).collect(),
            Some(other) => Err(invalid_type(name, "a list of strings", other)),
        }
    }

    /// List of nested beans, each parsed by `parse` from its own reader.
    pub fn bean_list<T, F>(&mut self, name: &str, mut parse: F) -> Result<Vec<T>, ConfigError>
    where
        F: FnMut(&mut ConfigReader<'a>) -> Result<T, ConfigError>,
    {
        let items = match self.optional(name) {
            None => return Ok(Vec::new()),
            Some(JsonValue::Array(items)) => items,
            Some(other) => return Err(invalid_type(name, "a list of objects", other)),
        };
        let mut beans = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            let object = item
                .as_object()
                .ok_or_else(|| invalid_type(name, "a list of objects", item))?;
            let mut reader = ConfigReader::from_object(object);
            let bean = parse(&mut reader)
                .and_then(|bean| reader.finish().map(|_| bean))
                .map_err(|e| ConfigError::invalid(format!("{}[{}]", name, idx), e.to_string()))?;
            beans.push(bean);
        }
        Ok(beans)
    }

    /// Key/value map given either as an object or as `[{key, value}]`.
    pub fn value_map(&mut self, name: &str) -> Result<Parameters, ConfigError> {
        match self.optional(name) {
            None => Ok(Parameters::new()),
            Some(JsonValue::Object(map)) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            Some(JsonValue::Array(items)) => items
                .iter()
                .map(|item| {
                    let key = item.get("key").and_then(JsonValue::as_str);
                    match key {
                        Some(key) => Ok((
                            key.to_string(),
                            item.get("value").cloned().unwrap_or(JsonValue::Null),
                        )),
                        None => Err(invalid_type(name, "a list of {key, value}", item)),
                    }
                })
                .collect(),
            Some(other) => Err(invalid_type(name, "a map", other)),
        }
    }

    /// Fails with every option that was present but never read.
    pub fn finish(self) -> Result<(), ConfigError> {
        let unknown: Vec<String> = self
            .values
            .iter()
            .filter(|(name, _)| !self.consumed.contains(name))
            .map(|(name, _)| name.to_string())
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Unknown(unknown))
        }
    }
}

fn invalid_type(name: &str, expected: &'static str, value: &JsonValue) -> ConfigError {
    ConfigError::InvalidType {
        name: name.to_string(),
        expected,
        value: value.to_string(),
    }
}

fn as_string(name: &str, value: &JsonValue) -> Result<String, ConfigError> {
    match value {
        JsonValue::String(s) => Ok(s.clone()),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        other => Err(invalid_type(name, "a string", other)),
    }
}

fn as_i64(name: &str, value: &JsonValue) -> Result<i64, ConfigError> {
    match value {
        JsonValue::Number(n) => n.as_i64().ok_or_else(|| invalid_type(name, "an integer", value)),
        JsonValue::String(s) => s
            .trim()
            .parse()
            .map_err(|_| invalid_type(name, "an integer", value)),
        other => Err(invalid_type(name, "an integer", other)),
    }
}

// ============================================================================
// Enumerated options
// ============================================================================

/// Enum with a SCREAMING_SNAKE_CASE wire form, `as_str`, Display and FromStr.
macro_rules! config_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? } default $default:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::ALL
                    .iter()
                    .find(|v| v.as_str() == s)
                    .copied()
                    .ok_or_else(|| format!("unknown value '{}'", s))
            }
        }
    };
}

config_enum!(
    /// What a stage does with a record it cannot process.
    OnRecordError {
        Discard => "DISCARD",
        ToError => "TO_ERROR",
        StopPipeline => "STOP_PIPELINE",
    } default ToError
);

config_enum!(
    /// Which version of a failed record reaches the error stage.
    ErrorRecordPolicy {
        OriginalRecord => "ORIGINAL_RECORD",
        StageRecord => "STAGE_RECORD",
    } default StageRecord
);

config_enum!(
    ExecutionMode {
        Standalone => "STANDALONE",
        Edge => "EDGE",
    } default Edge
);

config_enum!(
    /// When the offset is committed relative to the rest of the graph.
    DeliveryGuarantee {
        AtLeastOnce => "AT_LEAST_ONCE",
        AtMostOnce => "AT_MOST_ONCE",
    } default AtLeastOnce
);

// ============================================================================
// Pipeline bean
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfigBean {
    pub execution_mode: ExecutionMode,
    pub delivery_guarantee: DeliveryGuarantee,
    pub constants: Parameters,
    pub should_retry: bool,
    /// Negative means unbounded.
    pub retry_attempts: i64,
    pub retry_base_delay_millis: u64,
    pub error_record_policy: ErrorRecordPolicy,
    /// Records per second; zero disables throttling.
    pub rate_limit: u64,
    pub max_runners: u32,
    pub max_batch_size: usize,
}

impl Default for PipelineConfigBean {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::default(),
            delivery_guarantee: DeliveryGuarantee::default(),
            constants: Parameters::new(),
            should_retry: DEFAULT_SHOULD_RETRY,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay_millis: DEFAULT_RETRY_BASE_DELAY_MILLIS,
            error_record_policy: ErrorRecordPolicy::default(),
            rate_limit: 0,
            max_runners: 1,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl PipelineConfigBean {
    pub fn parse(configs: &[Config]) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut reader = ConfigReader::new(configs);
        let bean = Self {
            execution_mode: reader.parse_or("executionMode", defaults.execution_mode)?,
            delivery_guarantee: reader.parse_or("deliveryGuarantee", defaults.delivery_guarantee)?,
            constants: reader.value_map("constants")?,
            should_retry: reader.bool_or("shouldRetry", defaults.should_retry)?,
            retry_attempts: reader.i64_or("retryAttempts", defaults.retry_attempts)?,
            retry_base_delay_millis: reader
                .u64_or("retryBaseDelayMillis", defaults.retry_base_delay_millis)?,
            error_record_policy: reader
                .parse_or("errorRecordPolicy", defaults.error_record_policy)?,
            rate_limit: reader.u64_or("rateLimit", defaults.rate_limit)?,
            max_runners: u32::try_from(reader.u64_or("maxRunners", u64::from(defaults.max_runners))?)
                .map_err(|_| ConfigError::invalid("maxRunners", "too large"))?,
            max_batch_size: usize::try_from(
                reader.u64_or("maxBatchSize", defaults.max_batch_size as u64)?,
            )
            .map_err(|_| ConfigError::invalid("maxBatchSize", "too large"))?,
        };
        reader.finish()?;
        if bean.max_batch_size == 0 {
            return Err(ConfigError::invalid("maxBatchSize", "must be at least 1"));
        }
        Ok(bean)
    }

    /// Back-off before retry `attempt` (1-based):
    /// `min(retryBaseDelayMillis * 2^(attempt-1), 300 s)`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let millis = self
            .retry_base_delay_millis
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY_MILLIS);
        Duration::from_millis(millis)
    }

    /// Whether another retry may follow `attempts_made` earlier ones.
    pub fn can_retry(&self, attempts_made: u32) -> bool {
        self.should_retry && (self.retry_attempts < 0 || i64::from(attempts_made) < self.retry_attempts)
    }
}

// ============================================================================
// Options every stage accepts
// ============================================================================

pub const ON_RECORD_ERROR_CONFIG: &str = "stageOnRecordError";
pub const REQUIRED_FIELDS_CONFIG: &str = "stageRequiredFields";
pub const PRECONDITIONS_CONFIG: &str = "stageRecordPreconditions";
pub const COMMON_STAGE_OPTIONS: &[&str] = &[
    ON_RECORD_ERROR_CONFIG,
    REQUIRED_FIELDS_CONFIG,
    PRECONDITIONS_CONFIG,
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommonStageConfig {
    pub on_record_error: OnRecordError,
    pub required_fields: Vec<String>,
    pub preconditions: Vec<String>,
}

impl CommonStageConfig {
    pub fn parse(configs: &[Config]) -> Result<Self, ConfigError> {
        let mut reader = ConfigReader::new(configs);
        Ok(Self {
            on_record_error: reader.parse_or(ON_RECORD_ERROR_CONFIG, OnRecordError::default())?,
            required_fields: reader.string_list(REQUIRED_FIELDS_CONFIG)?,
            preconditions: reader.string_list(PRECONDITIONS_CONFIG)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reader_typed_getters() {
        let configs = vec![
            Config::new("batchSize", "12"),
            Config::new("delay", 5),
            Config::new("enabled", "true"),
            Config::new("fields", json!(["/a", "/b"])),
            Config::new("nothing", JsonValue::Null),
        ];
        let mut reader = ConfigReader::new(&configs);
        assert_eq!(reader.i64_or("batchSize", 1).unwrap(), 12);
        assert_eq!(reader.u64_or("delay", 0).unwrap(), 5);
        assert!(reader.bool_or("enabled", false).unwrap());
        assert_eq!(reader.string_list("fields").unwrap(), vec!["/a", "/b"]);
        assert_eq!(reader.string_or("nothing", "x").unwrap(), "x");
        assert_eq!(reader.i64_or("absent", 7).unwrap(), 7);
        reader.finish().unwrap();
    }

    #[test]
    fn test_reader_rejects_unknown_and_bad_types() {
        let configs = vec![Config::new("batchSize", "many"), Config::new("typo", 1)];
        let mut reader = ConfigReader::new(&configs);
        assert!(matches!(
            reader.i64_or("batchSize", 1),
            Err(ConfigError::InvalidType { expected: "an integer", .. })
        ));
        assert_eq!(
            reader.finish().unwrap_err(),
            ConfigError::Unknown(vec!["typo".to_string()])
        );
    }

    #[test]
    fn test_bean_list() {
        let configs = vec![Config::new(
            "expressions",
            json!([
                {"fieldToSet": "/x", "expression": "${1}"},
                {"fieldToSet": "/y", "expression": "${2}", "extra": true}
            ]),
        )];
        let mut reader = ConfigReader::new(&configs);
        let err = reader
            .bean_list("expressions", |bean| {
                Ok((bean.string("fieldToSet")?, bean.string("expression")?))
            })
            .unwrap_err();
        assert_eq!(err.config_name(), Some("expressions[1]"));
    }

    #[test]
    fn test_pipeline_bean() {
        let configs = vec![
            Config::new("executionMode", "EDGE"),
            Config::new("deliveryGuarantee", "AT_MOST_ONCE"),
            Config::new("constants", json!([{"key": "HOST", "value": "h1"}])),
            Config::new("retryAttempts", 3),
            Config::new("maxBatchSize", 4),
        ];
        let bean = PipelineConfigBean::parse(&configs).unwrap();
        assert_eq!(bean.delivery_guarantee, DeliveryGuarantee::AtMostOnce);
        assert_eq!(bean.constants["HOST"], json!("h1"));
        assert_eq!(bean.max_batch_size, 4);
        assert_eq!(bean.error_record_policy, ErrorRecordPolicy::StageRecord);

        let err = PipelineConfigBean::parse(&[Config::new("executionMode", "CLUSTER")]).unwrap_err();
        assert_eq!(err.config_name(), Some("executionMode"));
    }

    #[test]
    fn test_retry_policy() {
        let bean = PipelineConfigBean {
            retry_attempts: 3,
            retry_base_delay_millis: 1000,
            ..Default::default()
        };
        assert_eq!(bean.retry_delay(1), Duration::from_secs(1));
        assert_eq!(bean.retry_delay(3), Duration::from_secs(4));
        assert_eq!(bean.retry_delay(20), Duration::from_secs(300));
        assert!(bean.can_retry(2));
        assert!(!bean.can_retry(3));

        let unbounded = PipelineConfigBean::default();
        assert!(unbounded.can_retry(1_000));
        let disabled = PipelineConfigBean {
            should_retry: false,
            ..Default::default()
        };
        assert!(!disabled.can_retry(0));
    }

    #[test]
    fn test_common_stage_config() {
        let configs = vec![
            Config::new(ON_RECORD_ERROR_CONFIG, "STOP_PIPELINE"),
            Config::new(REQUIRED_FIELDS_CONFIG, json!(["/id"])),
            Config::new("batchSize", 3),
        ];
        let common = CommonStageConfig::parse(&configs).unwrap();
        assert_eq!(common.on_record_error, OnRecordError::StopPipeline);
        assert_eq!(common.required_fields, vec!["/id"]);

        let mut reader = ConfigReader::new(&configs).ignoring(COMMON_STAGE_OPTIONS);
        reader.i64_or("batchSize", 1).unwrap();
        reader.finish().unwrap();
    }
}
