//! Run orchestration.
//!
//! A run moves through [`RunPhase`]s:
//!
//! ```text
//! Validating -> ConflictCheck -> Executing -> Reporting -> Done
//! ```
//!
//! Everything that can abort the run happens before `Executing`. From there
//! on, failures belong to individual jobs and are reported, not propagated.

use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ReinaConfig;
use crate::error::{ReinaError, Result};
use crate::job::{Job, JobContext, ProvisionJob};
use crate::manifest::ManifestReader;
use crate::naming::NamingPolicy;
use crate::platform::Platform;
use crate::report::{ExecutionGroup, ExecutionOutcome, JobOutcome, RunReport};
use crate::scm::Scm;

/// Asks the operator before pre-existing apps are deleted.
#[async_trait]
pub trait Confirm: Send + Sync {
    /// `true` only if the operator explicitly agreed to delete `apps`.
    async fn confirm_deletion(&self, apps: &[String]) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Validating,
    ConflictCheck,
    Executing,
    Reporting,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Validating => "validating",
            RunPhase::ConflictCheck => "conflict_check",
            RunPhase::Executing => "executing",
            RunPhase::Reporting => "reporting",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Validate a PR number given on the command line.
pub fn parse_pr_number(pr_number: i64) -> Result<u64> {
    if pr_number <= 0 {
        return Err(ReinaError::InvalidPrNumber(pr_number));
    }
    Ok(pr_number as u64)
}

/// Parse `project#branch` arguments. An empty branch means "use the default".
pub fn parse_branch_overrides<S: AsRef<str>>(args: &[S]) -> Result<BTreeMap<String, String>> {
    let mut overrides = BTreeMap::new();
    for arg in args {
        let arg = arg.as_ref();
        let (project, branch) = arg.split_once('#').ok_or_else(|| {
            ReinaError::Config(format!("branch override {arg} must look like project#branch"))
        })?;
        if branch.is_empty() {
            continue;
        }
        overrides.insert(project.to_string(), branch.to_string());
    }
    Ok(overrides)
}

pub struct Orchestrator {
    ctx: JobContext,
    confirm: Arc<dyn Confirm>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<ReinaConfig>,
        platform: Arc<dyn Platform>,
        scm: Arc<dyn Scm>,
        manifests: Arc<dyn ManifestReader>,
        confirm: Arc<dyn Confirm>,
    ) -> Self {
        let naming = Arc::new(NamingPolicy::from_config(&config));
        Self {
            ctx: JobContext {
                config,
                naming,
                platform,
                scm,
                manifests,
            },
            confirm,
        }
    }

    pub fn naming(&self) -> &NamingPolicy {
        &self.ctx.naming
    }

    /// Execute a whole run for `pr_number`.
    ///
    /// Returns `Err` only for precondition failures, all of which happen
    /// before anything is provisioned. Job failures are part of the report.
    #[instrument(skip(self, overrides), fields(run_id = tracing::field::Empty))]
    pub async fn run(
        &self,
        pr_number: i64,
        overrides: &BTreeMap<String, String>,
    ) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("run_id", run_id.as_str());
        let started_at = Utc::now();

        enter(RunPhase::Validating);
        let pr_number = parse_pr_number(pr_number)?;
        let jobs = self.build_jobs(pr_number, overrides)?;

        enter(RunPhase::ConflictCheck);
        let deleted_apps = self.resolve_conflicts(&jobs).await?;

        enter(RunPhase::Executing);
        let outcomes = self.execute(jobs).await;

        enter(RunPhase::Reporting);
        report(&outcomes);

        enter(RunPhase::Done);
        info!("Done.");

        Ok(RunReport {
            run_id,
            pr_number,
            started_at,
            finished_at: Utc::now(),
            deleted_apps,
            outcomes,
        })
    }

    /// Build one job per project and enforce naming invariants.
    pub fn build_jobs(
        &self,
        pr_number: u64,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Vec<Job>> {
        let config = &self.ctx.config;

        for key in overrides.keys() {
            if config.project(key).is_none() {
                warn!(project = %key, "branch override for unknown project ignored");
            }
        }

        let jobs: Vec<Job> = config
            .projects
            .iter()
            .map(|project| {
                let branch = overrides
                    .get(&project.key)
                    .map(String::as_str)
                    .unwrap_or(&config.default_branch);
                Job::new(Arc::new(project.clone()), pr_number, branch, &self.ctx.naming)
            })
            .collect();

        let mut seen = HashSet::new();
        for job in &jobs {
            self.ctx.naming.validate(&job.app_name)?;
            if !seen.insert(job.app_name.as_str()) {
                return Err(ReinaError::DuplicateAppName(job.app_name.clone()));
            }
        }

        Ok(jobs)
    }

    /// Delete pre-existing apps that collide with this run's names, after
    /// the operator confirms. Returns the deleted names.
    pub async fn resolve_conflicts(&self, jobs: &[Job]) -> Result<Vec<String>> {
        let existing: HashSet<String> = self.ctx.platform.list_apps().await?.into_iter().collect();
        let conflicting: Vec<String> = jobs
            .iter()
            .filter(|job| existing.contains(&job.app_name))
            .map(|job| job.app_name.clone())
            .collect();

        if conflicting.is_empty() {
            return Ok(conflicting);
        }

        warn!(apps = ?conflicting, "apps already exist on the platform");
        if !self.confirm.confirm_deletion(&conflicting).await {
            return Err(ReinaError::ConfirmationDeclined);
        }

        for app in &conflicting {
            info!("Deleting {app}");
            self.ctx.platform.delete_app(app).await?;
        }
        Ok(conflicting)
    }

    /// Run the parallel group on a bounded pool, then the sequential group
    /// one job at a time in declaration order.
    pub async fn execute(&self, jobs: Vec<Job>) -> Vec<JobOutcome> {
        let (parallel, sequential): (Vec<Job>, Vec<Job>) = jobs
            .into_iter()
            .partition(|job| job.group() == ExecutionGroup::Parallel);

        let limit = self.ctx.config.concurrency.max(1);
        info!(
            parallel = parallel.len(),
            sequential = sequential.len(),
            concurrency = limit,
            "executing jobs"
        );

        let mut outcomes = Vec::with_capacity(parallel.len() + sequential.len());

        let sem = Arc::new(Semaphore::new(limit));
        let mut join_set = JoinSet::new();
        let mut pending = BTreeMap::new();
        for job in parallel {
            pending.insert(job.app_name.clone(), (job.project.key.clone(), job.group()));
            let ctx = self.ctx.clone();
            let sem = Arc::clone(&sem);
            join_set.spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                run_isolated(job, ctx).await
            });
        }
        outcomes.extend(collect(join_set, pending).await);

        for job in sequential {
            outcomes.push(run_isolated(job, self.ctx.clone()).await);
        }

        outcomes
    }
}

fn enter(phase: RunPhase) {
    info!(phase = %phase, "entering phase");
}

/// Drain the pool. `pending` maps app name to project key and group for every
/// spawned job; a job whose task never delivered an outcome is reported as
/// failed.
async fn collect(
    mut join_set: JoinSet<JobOutcome>,
    mut pending: BTreeMap<String, (String, ExecutionGroup)>,
) -> Vec<JobOutcome> {
    let mut outcomes = Vec::with_capacity(pending.len());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(outcome) => {
                pending.remove(&outcome.app_name);
                outcomes.push(outcome);
            }
            Err(e) => error!(error = %e, "job task did not complete"),
        }
    }

    for (app_name, (project, group)) in pending {
        error!("{project}: job task did not complete");
        outcomes.push(task_failure(
            project,
            app_name,
            group,
            "job task did not complete".to_string(),
        ));
    }
    outcomes
}

/// Run a job, turning a panic into a failed outcome.
async fn run_isolated(job: Job, ctx: JobContext) -> JobOutcome {
    let project = job.project.key.clone();
    let app_name = job.app_name.clone();
    let group = job.group();

    match AssertUnwindSafe(ProvisionJob::new(job, ctx).run())
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("{project}: {message}");
            task_failure(project, app_name, group, message)
        }
    }
}

/// Outcome of a job that died outside its own steps.
fn task_failure(
    project: String,
    app_name: String,
    group: ExecutionGroup,
    message: String,
) -> JobOutcome {
    JobOutcome {
        project,
        app_name,
        group,
        outcome: ExecutionOutcome::Failed {
            step: None,
            message,
        },
        duration_ms: 0,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}

fn report(outcomes: &[JobOutcome]) {
    for outcome in outcomes {
        match &outcome.outcome {
            ExecutionOutcome::Succeeded => {
                info!("{}: {} provisioned", outcome.project, outcome.app_name);
            }
            ExecutionOutcome::Failed { message, .. } => {
                error!("{}: {}", outcome.project, message);
            }
        }
    }
    let failed = outcomes.iter().filter(|o| !o.outcome.is_success()).count();
    info!(
        succeeded = outcomes.len() - failed,
        failed, "run finished"
    );
}
