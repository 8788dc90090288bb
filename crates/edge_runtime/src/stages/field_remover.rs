//! Processor removing fields, or keeping only the listed ones.

use super::{configured, init_config};
use crate::batch::{Batch, BatchMaker};
use crate::context::StageContext;
use crate::error::{ConfigError, StageError};
use edge_protocol::Issue;
use edge_record::{parse_field_path, Field, PathElement, Record};
use indexmap::IndexMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Action {
    #[default]
    Remove,
    Keep,
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REMOVE" => Ok(Action::Remove),
            "KEEP" => Ok(Action::Keep),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RemoverConfig {
    fields: Vec<String>,
    action: Action,
}

fn parse(ctx: &StageContext) -> Result<RemoverConfig, ConfigError> {
    let mut reader = ctx.config_reader();
    let config = RemoverConfig {
        fields: reader.string_list("fields")?,
        action: reader.parse_or("action", Action::default())?,
    };
    reader.finish()?;
    for field in &config.fields {
        let elements = parse_field_path(field)
            .map_err(|err| ConfigError::invalid("fields", err.to_string()))?;
        if elements.iter().any(PathElement::is_wildcard) {
            return Err(ConfigError::invalid(
                "fields",
                format!("wildcards are not supported: '{}'", field),
            ));
        }
    }
    Ok(config)
}

#[derive(Debug, Default)]
pub struct FieldRemover {
    config: Option<RemoverConfig>,
}

impl crate::stage::Stage for FieldRemover {
    fn init(&mut self, ctx: &StageContext) -> Vec<Issue> {
        init_config(ctx, parse(ctx), &mut self.config)
    }

    fn execute(
        &mut self,
        ctx: &StageContext,
        batch: Batch,
        maker: &mut BatchMaker,
    ) -> Result<Option<String>, StageError> {
        let config = configured(&mut self.config, ctx)?;
        for mut record in batch {
            match config.action {
                Action::Remove => {
                    for field in &config.fields {
                        record.delete(field)?;
                    }
                }
                Action::Keep => record = keep_only(record, &config.fields)?,
            }
            maker.add_record(record)?;
        }
        Ok(None)
    }
}

/// Rebuilds the record from the listed fields that exist in it.
fn keep_only(record: Record, fields: &[String]) -> Result<Record, StageError> {
    let mut kept = Record::new(record.header().clone(), Field::list_map(IndexMap::new()));
    for field in fields {
        if let Some(value) = record.get(field)? {
            kept.set_creating(field, value.clone())?;
        }
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::context;
    use crate::stage::{Stage, StageKind};
    use edge_protocol::Config;
    use serde_json::json;

    fn run(configs: Vec<Config>) -> Record {
        let ctx = context("rm", StageKind::Processor, configs, &["out"]);
        let mut stage = FieldRemover::default();
        assert!(stage.init(&ctx).is_empty());

        let mut record = ctx.create_record("r");
        record.set_root(Field::from_json(&json!({"a": 1, "b": {"c": 2, "d": 3}, "e": 4})));
        let mut maker = BatchMaker::new("rm", &["out".to_string()]);
        stage.execute(&ctx, Batch::new(None, vec![record]), &mut maker).unwrap();
        maker.lane_records("out")[0].clone()
    }

    #[test]
    fn test_remove() {
        let record = run(vec![Config::new("fields", json!(["/a", "/b/c", "/missing"]))]);
        assert_eq!(record.root().to_json(), json!({"b": {"d": 3}, "e": 4}));
    }

    #[test]
    fn test_keep() {
        let record = run(vec![
            Config::new("fields", json!(["/b/d", "/e"])),
            Config::new("action", "KEEP"),
        ]);
        assert_eq!(record.root().to_json(), json!({"b": {"d": 3}, "e": 4}));
    }

    #[test]
    fn test_rejects_wildcards() {
        let ctx = context(
            "rm",
            StageKind::Processor,
            vec![Config::new("fields", json!(["/b/*"]))],
            &["out"],
        );
        assert_eq!(FieldRemover::default().init(&ctx).len(), 1);
    }
}
