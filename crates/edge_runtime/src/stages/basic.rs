//! Pass-through processor and the simple targets.

use crate::batch::{Batch, BatchMaker};
use crate::context::StageContext;
use crate::error::StageError;
use crate::stage::Stage;
use edge_protocol::Issue;
use tracing::info;

#[derive(Debug, Default)]
pub struct IdentityProcessor;

impl Stage for IdentityProcessor {
    fn init(&mut self, ctx: &StageContext) -> Vec<Issue> {
        finish_empty(ctx)
    }

    fn execute(
        &mut self,
        _ctx: &StageContext,
        batch: Batch,
        maker: &mut BatchMaker,
    ) -> Result<Option<String>, StageError> {
        for record in batch {
            maker.add_record(record)?;
        }
        Ok(None)
    }
}

#[derive(Debug, Default)]
pub struct TrashTarget;

impl Stage for TrashTarget {
    fn init(&mut self, ctx: &StageContext) -> Vec<Issue> {
        finish_empty(ctx)
    }

    fn execute(
        &mut self,
        _ctx: &StageContext,
        _batch: Batch,
        _maker: &mut BatchMaker,
    ) -> Result<Option<String>, StageError> {
        Ok(None)
    }
}

/// Sends every record to the error path, whatever the stage's
/// on-record-error setting.
#[derive(Debug, Default)]
pub struct ToErrorTarget;

impl Stage for ToErrorTarget {
    fn init(&mut self, ctx: &StageContext) -> Vec<Issue> {
        finish_empty(ctx)
    }

    fn execute(
        &mut self,
        ctx: &StageContext,
        batch: Batch,
        _maker: &mut BatchMaker,
    ) -> Result<Option<String>, StageError> {
        for record in batch {
            ctx.push_error_record(record, "sent to error by stage".to_string());
        }
        Ok(None)
    }
}

/// Writes every record to the agent log as JSON.
#[derive(Debug, Default)]
pub struct LogTarget;

impl Stage for LogTarget {
    fn init(&mut self, ctx: &StageContext) -> Vec<Issue> {
        finish_empty(ctx)
    }

    fn execute(
        &mut self,
        ctx: &StageContext,
        batch: Batch,
        _maker: &mut BatchMaker,
    ) -> Result<Option<String>, StageError> {
        for record in batch {
            info!(
                pipeline = %ctx.pipeline_id(),
                stage = %ctx.instance_name(),
                tracking_id = %record.header().tracking_id(),
                record = %record.root().to_json(),
                "Record"
            );
        }
        Ok(None)
    }
}

/// Stages without options still reject unknown ones.
fn finish_empty(ctx: &StageContext) -> Vec<Issue> {
    match ctx.config_reader().finish() {
        Ok(()) => Vec::new(),
        Err(err) => vec![err.to_issue(Some(ctx.instance_name()))],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::context;
    use crate::stage::StageKind;
    use edge_protocol::Config;

    #[test]
    fn test_to_error_ignores_discard_setting() {
        let ctx = context(
            "te",
            StageKind::Target,
            vec![Config::new("stageOnRecordError", "DISCARD")],
            &[],
        );
        let mut stage = ToErrorTarget;
        assert!(stage.init(&ctx).is_empty());
        let records = vec![ctx.create_record("a"), ctx.create_record("b")];
        stage
            .execute(&ctx, Batch::new(None, records), &mut BatchMaker::new("te", &[]))
            .unwrap();
        assert_eq!(ctx.shared().error_sink().records("te").len(), 2);
    }

    #[test]
    fn test_unknown_options_are_issues() {
        let ctx = context("t", StageKind::Target, vec![Config::new("bogus", 1)], &[]);
        let issues = TrashTarget.init(&ctx);
        assert_eq!(issues[0].config_name.as_deref(), Some("bogus"));
    }

    #[test]
    fn test_identity_passes_records() {
        let ctx = context("id", StageKind::Processor, vec![], &["out"]);
        let mut maker = BatchMaker::new("id", &["out".to_string()]);
        IdentityProcessor
            .execute(&ctx, Batch::new(None, vec![ctx.create_record("a")]), &mut maker)
            .unwrap();
        assert_eq!(maker.lane_records("out")[0].header().stages_path(), "id");
    }
}
