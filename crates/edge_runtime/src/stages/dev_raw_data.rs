//! Origin replaying a fixed block of JSON lines.

use super::{configured, init_config};
use crate::batch::{Batch, BatchMaker};
use crate::config::ConfigReader;
use crate::context::StageContext;
use crate::error::{ConfigError, StageError};
use edge_protocol::Issue;
use edge_record::Field;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq)]
struct RawDataConfig {
    raw_data: String,
    stop_after_first_batch: bool,
}

impl RawDataConfig {
    fn parse(mut reader: ConfigReader<'_>) -> Result<Self, ConfigError> {
        let config = Self {
            raw_data: reader.string_or("rawData", "")?,
            stop_after_first_batch: reader.bool_or("stopAfterFirstBatch", false)?,
        };
        reader.finish()?;
        Ok(config)
    }
}

/// Every batch emits all lines again; the offset counts batches. Lines that
/// are not JSON go to the error path with the raw text under `/text`.
#[derive(Debug, Default)]
pub struct DevRawData {
    config: Option<RawDataConfig>,
}

impl crate::stage::Stage for DevRawData {
    fn init(&mut self, ctx: &StageContext) -> Vec<Issue> {
        init_config(ctx, RawDataConfig::parse(ctx.config_reader()), &mut self.config)
    }

    fn execute(
        &mut self,
        ctx: &StageContext,
        batch: Batch,
        maker: &mut BatchMaker,
    ) -> Result<Option<String>, StageError> {
        let config = configured(&mut self.config, ctx)?;
        let batches: u64 = batch
            .source_offset()
            .and_then(|offset| offset.parse().ok())
            .unwrap_or(0);

        let lines = config
            .raw_data
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty());
        for (index, line) in lines.enumerate() {
            let mut record = ctx.create_record(format!("{}::{}::{}", ctx.instance_name(), batches, index));
            match serde_json::from_str::<JsonValue>(line) {
                Ok(json) => {
                    record.set_root(Field::from_json(&json));
                    maker.add_record(record)?;
                }
                Err(err) => {
                    record.set_creating("/text", Field::string(line))?;
                    ctx.to_error(record, format!("cannot parse line {}: {}", index + 1, err))?;
                }
            }
        }

        if config.stop_after_first_batch {
            return Ok(None);
        }
        Ok(Some((batches + 1).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::context;
    use crate::stage::{Stage, StageKind};
    use edge_protocol::Config;

    #[test]
    fn test_lines_become_records() {
        let ctx = context(
            "raw",
            StageKind::Origin,
            vec![
                Config::new("rawData", "{\"a\": 1}\n\nnot json\n{\"a\": 2, \"b\": [true]}"),
                Config::new("stopAfterFirstBatch", true),
            ],
            &["out"],
        );
        let mut stage = DevRawData::default();
        assert!(stage.init(&ctx).is_empty());

        let mut maker = BatchMaker::new("raw", &["out".to_string()]);
        let offset = stage.execute(&ctx, Batch::for_origin(None, 10), &mut maker).unwrap();
        assert_eq!(offset, None);

        let records = maker.lane_records("out");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("/b[0]").unwrap(), Some(&Field::boolean(true)));
        assert_eq!(ctx.shared().error_sink().total_records(), 1);
    }

    #[test]
    fn test_offset_counts_batches() {
        let ctx = context("raw", StageKind::Origin, vec![Config::new("rawData", "{}")], &["out"]);
        let mut stage = DevRawData::default();
        assert!(stage.init(&ctx).is_empty());
        let mut maker = BatchMaker::new("raw", &["out".to_string()]);
        let offset = stage
            .execute(&ctx, Batch::for_origin(Some("2".into()), 10), &mut maker)
            .unwrap();
        assert_eq!(offset.as_deref(), Some("3"));
    }
}
