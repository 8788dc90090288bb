//! Processor routing each record to the first lane whose predicate holds.

use super::{configured, init_config};
use crate::batch::{Batch, BatchMaker};
use crate::context::StageContext;
use crate::el::Expression;
use crate::error::{ConfigError, StageError};
use edge_protocol::Issue;

const LANE_PREDICATES_CONFIG: &str = "lanePredicates";

#[derive(Debug, Clone)]
struct LanePredicate {
    lane: String,
    predicate: Expression,
}

/// The last predicate must be `default`, which catches every record no
/// other predicate matched.
#[derive(Debug, Default)]
pub struct Selector {
    predicates: Option<Vec<LanePredicate>>,
}

fn parse(ctx: &StageContext) -> Result<Vec<LanePredicate>, ConfigError> {
    let mut reader = ctx.config_reader();
    let predicates = reader.bean_list(LANE_PREDICATES_CONFIG, |item| {
        let lane = item.string("outputLane")?;
        let source = item.string("predicate")?;
        let predicate = Expression::parse(&source)
            .map_err(|err| ConfigError::invalid("predicate", err.to_string()))?;
        Ok(LanePredicate { lane, predicate })
    })?;
    reader.finish()?;

    let invalid = |reason: &str| ConfigError::invalid(LANE_PREDICATES_CONFIG, reason);
    match predicates.last() {
        None => return Err(ConfigError::Missing(LANE_PREDICATES_CONFIG.to_string())),
        Some(last) if !last.predicate.is_default() => {
            return Err(invalid("the last predicate must be 'default'"))
        }
        _ => {}
    }
    if predicates[..predicates.len() - 1]
        .iter()
        .any(|p| p.predicate.is_default())
    {
        return Err(invalid("only the last predicate may be 'default'"));
    }
    let outputs = ctx.output_lanes();
    if predicates.len() != outputs.len() || !predicates.iter().all(|p| outputs.contains(&p.lane)) {
        return Err(invalid("there must be exactly one predicate per output lane"));
    }
    Ok(predicates)
}

impl crate::stage::Stage for Selector {
    fn init(&mut self, ctx: &StageContext) -> Vec<Issue> {
        init_config(ctx, parse(ctx), &mut self.predicates)
    }

    fn execute(
        &mut self,
        ctx: &StageContext,
        batch: Batch,
        maker: &mut BatchMaker,
    ) -> Result<Option<String>, StageError> {
        let predicates = configured(&mut self.predicates, ctx)?;
        'records: for record in batch {
            for lane in predicates.iter() {
                if lane.predicate.is_default() {
                    maker.add_record_to(record, &[lane.lane.as_str()])?;
                    continue 'records;
                }
                match ctx.evaluate_bool(&lane.predicate, &record) {
                    Ok(true) => {
                        maker.add_record_to(record, &[lane.lane.as_str()])?;
                        continue 'records;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        let message = format!(
                            "failed to evaluate predicate '{}': {}",
                            lane.predicate.source(),
                            err
                        );
                        ctx.to_error(record, message)?;
                        continue 'records;
                    }
                }
            }
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
    use edge_record::Field;
    use serde_json::json;

    fn selector_context(predicates: serde_json::Value) -> StageContext {
        context(
            "sel",
            StageKind::Processor,
            vec![Config::new(LANE_PREDICATES_CONFIG, predicates)],
            &["hot", "rest"],
        )
    }

    #[test]
    fn test_routes_by_first_match() {
        let ctx = selector_context(json!([
            {"outputLane": "hot", "predicate": "${record:value('/t') > 30}"},
            {"outputLane": "rest", "predicate": "default"},
        ]));
        let mut stage = Selector::default();
        assert!(stage.init(&ctx).is_empty());

        let records = [10, 40, 31]
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut record = ctx.create_record(i.to_string());
                record.set("/t", Field::long(*t)).unwrap();
                record
            })
            .collect();
        let mut maker = BatchMaker::new("sel", &["hot".to_string(), "rest".to_string()]);
        stage.execute(&ctx, Batch::new(None, records), &mut maker).unwrap();
        assert_eq!(maker.lane_records("hot").len(), 2);
        assert_eq!(maker.lane_records("rest").len(), 1);
    }

    #[test]
    fn test_default_must_be_last() {
        let ctx = selector_context(json!([
            {"outputLane": "rest", "predicate": "default"},
            {"outputLane": "hot", "predicate": "${true}"},
        ]));
        let issues = Selector::default().init(&ctx);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].config_name.as_deref(), Some(LANE_PREDICATES_CONFIG));
    }

    #[test]
    fn test_predicates_must_cover_lanes() {
        let ctx = selector_context(json!([{"outputLane": "rest", "predicate": "default"}]));
        assert_eq!(Selector::default().init(&ctx).len(), 1);
    }
}
