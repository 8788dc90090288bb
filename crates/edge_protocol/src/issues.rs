//! Configuration issues reported while a pipeline starts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueLevel {
    Pipeline,
    Stage,
    Service,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub level: IssueLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_name: Option<String>,
    pub message: String,
    #[serde(default = "one")]
    pub count: u32,
}

fn one() -> u32 {
    1
}

impl Issue {
    pub fn pipeline(message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Pipeline,
            instance_name: None,
            service_name: None,
            config_name: None,
            message: message.into(),
            count: 1,
        }
    }

    pub fn stage(instance: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Stage,
            instance_name: Some(instance.into()),
            ..Self::pipeline(message)
        }
    }

    pub fn service(
        instance: impl Into<String>,
        service: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level: IssueLevel::Service,
            instance_name: Some(instance.into()),
            service_name: Some(service.into()),
            ..Self::pipeline(message)
        }
    }

    pub fn with_config(mut self, config_name: impl Into<String>) -> Self {
        self.config_name = Some(config_name.into());
        self
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(instance) = &self.instance_name {
            write!(f, "{}: ", instance)?;
        }
        if let Some(config) = &self.config_name {
            write!(f, "[{}] ", config)?;
        }
        f.write_str(&self.message)
    }
}

/// Issues grouped by level, as stored in the `issues` state attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issues {
    pub pipeline_issues: Vec<Issue>,
    pub stage_issues: BTreeMap<String, Vec<Issue>>,
    pub issue_count: usize,
}

impl Issues {
    pub fn from_list(issues: Vec<Issue>) -> Self {
        let mut grouped = Issues {
            issue_count: issues.len(),
            ..Default::default()
        };
        for issue in issues {
            match issue.instance_name.clone() {
                Some(instance) if issue.level != IssueLevel::Pipeline => {
                    grouped.stage_issues.entry(instance).or_default().push(issue)
                }
                _ => grouped.pipeline_issues.push(issue),
            }
        }
        grouped
    }

    pub fn is_empty(&self) -> bool {
        self.issue_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouping() {
        let issues = Issues::from_list(vec![
            Issue::pipeline("bad constant"),
            Issue::stage("origin", "missing option").with_config("batchSize"),
            Issue::service("origin", "parser", "unknown format"),
        ]);
        assert_eq!(issues.issue_count, 3);
        assert_eq!(issues.pipeline_issues.len(), 1);
        assert_eq!(issues.stage_issues["origin"].len(), 2);
        assert_eq!(
            issues.stage_issues["origin"][0].to_string(),
            "origin: [batchSize] missing option"
        );
    }
}
