//! Origin producing random records for development pipelines.

use super::{configured, init_config};
use crate::batch::{Batch, BatchMaker};
use crate::config::ConfigReader;
use crate::context::StageContext;
use crate::error::{ConfigError, StageError};
use edge_protocol::Issue;
use edge_record::{Field, FieldType};
use indexmap::IndexMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::time::Duration;

const GENERATED_TYPES: &[FieldType] = &[
    FieldType::String,
    FieldType::Integer,
    FieldType::Long,
    FieldType::Double,
    FieldType::Boolean,
    FieldType::Date,
    FieldType::Datetime,
];

#[derive(Debug, Clone, PartialEq)]
struct FieldSpec {
    field: String,
    field_type: FieldType,
}

#[derive(Debug, Clone, PartialEq)]
struct GeneratorConfig {
    fields: Vec<FieldSpec>,
    batch_size: usize,
    delay: Duration,
    /// Zero means unbounded.
    number_of_records: u64,
}

impl GeneratorConfig {
    fn parse(mut reader: ConfigReader<'_>) -> Result<Self, ConfigError> {
        let fields = reader.bean_list("dataGenConfigs", |item| {
            let field = item.string("field")?;
            let type_name = item.string_or("type", "STRING")?;
            let field_type = GENERATED_TYPES
                .iter()
                .find(|t| t.as_str() == type_name)
                .copied()
                .ok_or_else(|| ConfigError::invalid("type", format!("unsupported type '{}'", type_name)))?;
            Ok(FieldSpec { field, field_type })
        })?;
        let batch_size = reader.u64_or("batchSize", 1000)?;
        if batch_size == 0 {
            return Err(ConfigError::invalid("batchSize", "must be at least 1"));
        }
        let config = Self {
            fields,
            batch_size: batch_size as usize,
            delay: Duration::from_millis(reader.u64_or("delay", 0)?),
            number_of_records: reader.u64_or("numberOfRecords", 0)?,
        };
        reader.finish()?;
        Ok(config)
    }
}

/// Offsets count the records produced so far.
#[derive(Debug, Default)]
pub struct DevDataGenerator {
    config: Option<GeneratorConfig>,
}

impl crate::stage::Stage for DevDataGenerator {
    fn init(&mut self, ctx: &StageContext) -> Vec<Issue> {
        init_config(ctx, GeneratorConfig::parse(ctx.config_reader()), &mut self.config)
    }

    fn execute(
        &mut self,
        ctx: &StageContext,
        batch: Batch,
        maker: &mut BatchMaker,
    ) -> Result<Option<String>, StageError> {
        let config = configured(&mut self.config, ctx)?;
        let mut produced: u64 = batch
            .source_offset()
            .and_then(|offset| offset.parse().ok())
            .unwrap_or(0);

        if !config.delay.is_zero() && !ctx.stop_token().sleep(config.delay) {
            return Ok(Some(produced.to_string()));
        }

        let mut count = config.batch_size.min(batch.max_batch_size()) as u64;
        if config.number_of_records > 0 {
            count = count.min(config.number_of_records.saturating_sub(produced));
        }

        let mut rng = rand::thread_rng();
        for _ in 0..count {
            let mut fields = IndexMap::with_capacity(config.fields.len());
            for generated in &config.fields {
                fields.insert(generated.field.clone(), random_field(&mut rng, generated.field_type));
            }
            let mut record = ctx.create_record(format!("{}::{}", ctx.instance_name(), produced));
            record.set_root(Field::list_map(fields));
            maker.add_record(record)?;
            produced += 1;
        }

        if config.number_of_records > 0 && produced >= config.number_of_records {
            return Ok(None);
        }
        Ok(Some(produced.to_string()))
    }
}

fn random_field<R: Rng>(rng: &mut R, field_type: FieldType) -> Field {
    match field_type {
        FieldType::Integer => Field::integer(rng.gen()),
        FieldType::Long => Field::long(rng.gen()),
        FieldType::Double => Field::double(rng.gen()),
        FieldType::Boolean => Field::boolean(rng.gen()),
        FieldType::Date => {
            let days = rng.gen_range(0..3650);
            let date = chrono::Utc::now().date_naive() - chrono::Duration::days(days);
            Field::date(date)
        }
        FieldType::Datetime => {
            let now = edge_protocol::now_millis();
            Field::datetime(now - rng.gen_range(0..86_400_000))
        }
        _ => Field::string(
            (0..10)
                .map(|_| char::from(rng.sample(Alphanumeric)))
                .collect::<String>(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::context;
    use crate::stage::{Stage, StageKind};
    use edge_protocol::Config;
    use serde_json::json;

    fn generator(configs: Vec<Config>) -> (DevDataGenerator, StageContext) {
        let ctx = context("gen", StageKind::Origin, configs, &["out"]);
        let mut stage = DevDataGenerator::default();
        assert!(stage.init(&ctx).is_empty());
        (stage, ctx)
    }

    #[test]
    fn test_generates_typed_fields_and_stops_at_limit() {
        let (mut stage, ctx) = generator(vec![
            Config::new("dataGenConfigs", json!([{"field": "id", "type": "LONG"}, {"field": "name"}])),
            Config::new("batchSize", 4),
            Config::new("numberOfRecords", 6),
        ]);

        let mut maker = BatchMaker::new("gen", &["out".to_string()]);
        let offset = stage.execute(&ctx, Batch::for_origin(None, 10), &mut maker).unwrap();
        assert_eq!(offset.as_deref(), Some("4"));
        let record = &maker.lane_records("out")[0];
        assert_eq!(record.get("/id").unwrap().unwrap().field_type(), FieldType::Long);
        assert_eq!(record.get("/name").unwrap().unwrap().field_type(), FieldType::String);

        let mut maker = BatchMaker::new("gen", &["out".to_string()]);
        let offset = stage
            .execute(&ctx, Batch::for_origin(Some("4".into()), 10), &mut maker)
            .unwrap();
        assert_eq!(offset, None);
        assert_eq!(maker.size(), 2);
    }

    #[test]
    fn test_max_batch_size_caps_output() {
        let (mut stage, ctx) = generator(vec![Config::new("batchSize", 50)]);
        let mut maker = BatchMaker::new("gen", &["out".to_string()]);
        stage.execute(&ctx, Batch::for_origin(None, 5), &mut maker).unwrap();
        assert_eq!(maker.size(), 5);
    }

    #[test]
    fn test_rejects_bad_config() {
        let ctx = context(
            "gen",
            StageKind::Origin,
            vec![Config::new("dataGenConfigs", json!([{"field": "x", "type": "MAP"}]))],
            &["out"],
        );
        let issues = DevDataGenerator::default().init(&ctx);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].config_name.as_deref(), Some("dataGenConfigs[0]"));
    }
}
