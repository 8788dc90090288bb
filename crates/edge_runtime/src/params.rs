//! Runtime parameter resolution for configuration values.

use crate::el::{EvalContext, Expression};
use edge_protocol::Config;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;
use tracing::debug;

/// Parameter name → value. Pipeline constants overlaid by runtime parameters.
pub type Parameters = HashMap<String, JsonValue>;

/// Pipeline constants with the runtime parameters of a start request on top.
pub fn build_parameters(
    constants: &Parameters,
    runtime: Option<&JsonMap<String, JsonValue>>,
) -> Parameters {
    let mut parameters = constants.clone();
    if let Some(runtime) = runtime {
        for (name, value) in runtime {
            parameters.insert(name.clone(), value.clone());
        }
    }
    parameters
}

pub fn resolve_configs(configs: &[Config], parameters: &Parameters) -> Vec<Config> {
    configs
        .iter()
        .map(|c| Config {
            name: c.name.clone(),
            value: resolve_value(&c.value, parameters),
        })
        .collect()
}

/// Resolves `${name}` references in `value`, descending into lists and maps.
///
/// A string that is exactly `${name}` for a known parameter becomes that
/// parameter's value, with numeric-looking strings coerced to integers. Other
/// strings containing `${...}` are evaluated as templates when they do not
/// reference a record; record-bound expressions are left for the stage.
pub fn resolve_value(value: &JsonValue, parameters: &Parameters) -> JsonValue {
    match value {
        JsonValue::String(s) => resolve_string(s, parameters),
        JsonValue::Array(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| resolve_value(item, parameters))
                .collect(),
        ),
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, parameters)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(s: &str, parameters: &Parameters) -> JsonValue {
    if !s.contains("${") {
        return JsonValue::String(s.to_string());
    }
    if let Some(value) = parameter_name(s).and_then(|name| parameters.get(name)) {
        return coerce_numeric(value);
    }

    let expression = match Expression::parse(s) {
        Ok(expression) if !expression.references_record() => expression,
        Ok(_) => return JsonValue::String(s.to_string()),
        Err(err) => {
            debug!(value = %s, error = %err, "Leaving unparseable expression unresolved");
            return JsonValue::String(s.to_string());
        }
    };
    match expression.evaluate(&EvalContext::new(parameters)) {
        Ok(value) => value.to_json(),
        Err(err) => {
            debug!(value = %s, error = %err, "Leaving expression unresolved");
            JsonValue::String(s.to_string())
        }
    }
}

/// `name` when `s` is exactly `${name}` (surrounding blanks allowed inside).
fn parameter_name(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?.trim();
    let mut chars = inner.chars();
    let first = chars.next()?;
    let valid = (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    valid.then_some(inner)
}

fn coerce_numeric(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => match s.trim().parse::<i64>() {
            Ok(n) => JsonValue::from(n),
            Err(_) => value.clone(),
        },
        other => other.clone(),
    }
}
