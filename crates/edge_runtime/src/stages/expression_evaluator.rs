//! Processor setting fields and header attributes from expressions.

use super::{configured, init_config};
use crate::batch::{Batch, BatchMaker};
use crate::context::StageContext;
use crate::el::Expression;
use crate::error::{ConfigError, StageError};
use edge_protocol::Issue;
use edge_record::parse_field_path;

#[derive(Debug, Clone)]
struct FieldExpression {
    field: String,
    expression: Expression,
}

#[derive(Debug, Clone)]
struct AttributeExpression {
    attribute: String,
    expression: Expression,
}

#[derive(Debug, Clone, Default)]
struct EvaluatorConfig {
    fields: Vec<FieldExpression>,
    attributes: Vec<AttributeExpression>,
}

fn expression(source: &str) -> Result<Expression, ConfigError> {
    Expression::parse(source).map_err(|err| ConfigError::invalid("expression", err.to_string()))
}

fn parse(ctx: &StageContext) -> Result<EvaluatorConfig, ConfigError> {
    let mut reader = ctx.config_reader();
    let fields = reader.bean_list("expressions", |item| {
        let field = item.string("fieldToSet")?;
        parse_field_path(&field).map_err(|err| ConfigError::invalid("fieldToSet", err.to_string()))?;
        Ok(FieldExpression {
            field,
            expression: expression(&item.string("expression")?)?,
        })
    })?;
    let attributes = reader.bean_list("headerAttributeExpressions", |item| {
        Ok(AttributeExpression {
            attribute: item.string("attributeToSet")?,
            expression: expression(&item.string("headerAttributeExpression")?)?,
        })
    })?;
    reader.finish()?;
    Ok(EvaluatorConfig { fields, attributes })
}

/// Expressions run in order, so later ones see fields set by earlier ones.
#[derive(Debug, Default)]
pub struct ExpressionEvaluator {
    config: Option<EvaluatorConfig>,
}

impl crate::stage::Stage for ExpressionEvaluator {
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
        'records: for mut record in batch {
            for field in &config.fields {
                match ctx.evaluate(&field.expression, Some(&record)) {
                    Ok(value) => {
                        record.set_creating(&field.field, value.to_field())?;
                    }
                    Err(err) => {
                        let message = format!("failed to evaluate '{}': {}", field.expression.source(), err);
                        ctx.to_error(record, message)?;
                        continue 'records;
                    }
                }
            }
            for attribute in &config.attributes {
                match ctx.evaluate(&attribute.expression, Some(&record)) {
                    Ok(value) => record
                        .header_mut()
                        .set_attribute(attribute.attribute.clone(), value.render()),
                    Err(err) => {
                        let message = format!("failed to evaluate '{}': {}", attribute.expression.source(), err);
                        ctx.to_error(record, message)?;
                        continue 'records;
                    }
                }
            }
            maker.add_record(record)?;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::context;
    use crate::stage::{Stage, StageKind};
    use edge_protocol::Config;
    use edge_record::{Field, Record};
    use serde_json::json;

    fn evaluate(configs: Vec<Config>, record: impl FnOnce(&StageContext) -> Record) -> (StageContext, BatchMaker) {
        let ctx = context("ev", StageKind::Processor, configs, &["out"]);
        let mut stage = ExpressionEvaluator::default();
        assert!(stage.init(&ctx).is_empty());
        let record = record(&ctx);
        let mut maker = BatchMaker::new("ev", &["out".to_string()]);
        stage.execute(&ctx, Batch::new(None, vec![record]), &mut maker).unwrap();
        (ctx, maker)
    }

    #[test]
    fn test_sets_fields_and_attributes() {
        let (_, maker) = evaluate(
            vec![
                Config::new(
                    "expressions",
                    json!([
                        {"fieldToSet": "/hot", "expression": "${record:value('/t') > 30}"},
                        {"fieldToSet": "/tags/site", "expression": "plant-${record:value('/site')}"},
                    ]),
                ),
                Config::new(
                    "headerAttributeExpressions",
                    json!([{"attributeToSet": "kind", "headerAttributeExpression": "${record:type('/t')}"}]),
                ),
            ],
            |ctx| {
                let mut record = ctx.create_record("r");
                record.set("/t", Field::long(35)).unwrap();
                record.set("/site", Field::long(7)).unwrap();
                record
            },
        );
        let record = &maker.lane_records("out")[0];
        assert_eq!(record.get("/hot").unwrap(), Some(&Field::boolean(true)));
        assert_eq!(record.get("/tags/site").unwrap(), Some(&Field::string("plant-7")));
        assert_eq!(record.header().attribute("kind"), Some("LONG"));
    }

    #[test]
    fn test_evaluation_failure_goes_to_error() {
        let (ctx, maker) = evaluate(
            vec![Config::new(
                "expressions",
                json!([{"fieldToSet": "/x", "expression": "${UNDEFINED_PARAM}"}]),
            )],
            |ctx| ctx.create_record("r"),
        );
        assert_eq!(maker.size(), 0);
        assert_eq!(ctx.shared().error_sink().total_records(), 1);
    }
}
