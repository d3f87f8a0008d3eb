//! Outcomes of a run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A step of provisioning one app that can fail, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStep {
    SyncRepository,
    LoadManifest,
    CreateApp,
    InstallAddons,
    AddBuildpacks,
    SetEnvVars,
    Deploy,
    Postdeploy,
    SetupDynos,
    AddToPipeline,
}

impl ProvisionStep {
    pub fn name(&self) -> &'static str {
        match self {
            ProvisionStep::SyncRepository => "sync_repository",
            ProvisionStep::LoadManifest => "load_manifest",
            ProvisionStep::CreateApp => "create_app",
            ProvisionStep::InstallAddons => "install_addons",
            ProvisionStep::AddBuildpacks => "add_buildpacks",
            ProvisionStep::SetEnvVars => "set_env_vars",
            ProvisionStep::Deploy => "deploy",
            ProvisionStep::Postdeploy => "postdeploy",
            ProvisionStep::SetupDynos => "setup_dynos",
            ProvisionStep::AddToPipeline => "add_to_pipeline",
        }
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which partition a job ran in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionGroup {
    Parallel,
    Sequential,
}

/// Result of one job. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    Failed {
        /// Step that failed, `None` if the job task itself died.
        step: Option<ProvisionStep>,
        message: String,
    },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub project: String,
    pub app_name: String,
    pub group: ExecutionGroup,
    pub outcome: ExecutionOutcome,
    pub duration_ms: u64,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub pr_number: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Pre-existing apps deleted during the conflict check.
    pub deleted_apps: Vec<String>,
    /// Parallel outcomes in completion order, then sequential outcomes.
    pub outcomes: Vec<JobOutcome>,
}

impl RunReport {
    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.outcome.is_success()).count()
    }

    pub fn outcome_for(&self, project: &str) -> Option<&JobOutcome> {
        self.outcomes.iter().find(|o| o.project == project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(project: &str, outcome: ExecutionOutcome) -> JobOutcome {
        JobOutcome {
            project: project.to_string(),
            app_name: format!("{project}-1"),
            group: ExecutionGroup::Parallel,
            outcome,
            duration_ms: 10,
        }
    }

    #[test]
    fn test_report_counts() {
        let report = RunReport {
            run_id: "run-1".to_string(),
            pr_number: 1,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            deleted_apps: vec![],
            outcomes: vec![
                outcome("api", ExecutionOutcome::Succeeded),
                outcome(
                    "web",
                    ExecutionOutcome::Failed {
                        step: Some(ProvisionStep::Deploy),
                        message: "rejected".to_string(),
                    },
                ),
            ],
        };

        assert_eq!(report.succeeded_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert!(!report.outcome_for("web").unwrap().outcome.is_success());
        assert!(report.outcome_for("worker").is_none());
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(ExecutionOutcome::Failed {
            step: Some(ProvisionStep::CreateApp),
            message: "Name is already taken".to_string(),
        })
        .unwrap();

        assert_eq!(json["status"], "failed");
        assert_eq!(json["step"], "create_app");
    }

    #[test]
    fn test_step_names_match_serialized_form() {
        assert_eq!(ProvisionStep::SetEnvVars.to_string(), "set_env_vars");
        assert_eq!(
            serde_json::to_value(ProvisionStep::AddToPipeline).unwrap(),
            "add_to_pipeline"
        );
    }
}
