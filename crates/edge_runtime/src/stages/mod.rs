//! Built-in `basic` stage library.

mod basic;
mod dev_data_generator;
mod dev_raw_data;
mod expression_evaluator;
mod field_remover;
mod selector;

pub use basic::{IdentityProcessor, LogTarget, ToErrorTarget, TrashTarget};
pub use dev_data_generator::DevDataGenerator;
pub use dev_raw_data::DevRawData;
pub use expression_evaluator::ExpressionEvaluator;
pub use field_remover::FieldRemover;
pub use selector::Selector;

use crate::context::StageContext;
use crate::error::{ConfigError, StageError};
use crate::registry::{StageDefinition, StageRegistry};
use crate::stage::StageKind;
use edge_protocol::Issue;

pub const BASIC_LIBRARY: &str = "basic";

pub(crate) fn register(registry: &mut StageRegistry) {
    let definitions = [
        StageDefinition::new(
            BASIC_LIBRARY,
            "dev_data_generator",
            StageKind::Origin,
            "Dev Data Generator",
            DevDataGenerator::default,
        ),
        StageDefinition::new(
            BASIC_LIBRARY,
            "dev_raw_data",
            StageKind::Origin,
            "Dev Raw Data Source",
            DevRawData::default,
        ),
        StageDefinition::new(
            BASIC_LIBRARY,
            "selector",
            StageKind::Processor,
            "Stream Selector",
            Selector::default,
        ),
        StageDefinition::new(
            BASIC_LIBRARY,
            "field_remover",
            StageKind::Processor,
            "Field Remover",
            FieldRemover::default,
        ),
        StageDefinition::new(
            BASIC_LIBRARY,
            "expression_evaluator",
            StageKind::Processor,
            "Expression Evaluator",
            ExpressionEvaluator::default,
        ),
        StageDefinition::new(
            BASIC_LIBRARY,
            "identity",
            StageKind::Processor,
            "Identity",
            IdentityProcessor::default,
        ),
        StageDefinition::new(
            BASIC_LIBRARY,
            "trash",
            StageKind::Target,
            "Trash",
            TrashTarget::default,
        ),
        StageDefinition::new(
            BASIC_LIBRARY,
            "to_error",
            StageKind::Target,
            "To Error",
            ToErrorTarget::default,
        ),
        StageDefinition::new(
            BASIC_LIBRARY,
            "log",
            StageKind::Target,
            "Log",
            LogTarget::default,
        ),
    ];
    for definition in definitions {
        registry.register(definition);
    }
}

/// Keeps a parsed configuration, or turns the parse failure into an issue.
fn init_config<T>(ctx: &StageContext, parsed: Result<T, ConfigError>, slot: &mut Option<T>) -> Vec<Issue> {
    match parsed {
        Ok(config) => {
            *slot = Some(config);
            Vec::new()
        }
        Err(err) => vec![err.to_issue(Some(ctx.instance_name()))],
    }
}

fn configured<'s, T>(slot: &'s mut Option<T>, ctx: &StageContext) -> Result<&'s mut T, StageError> {
    slot.as_mut()
        .ok_or_else(|| StageError::execution(format!("stage '{}' was not initialized", ctx.instance_name())))
}
