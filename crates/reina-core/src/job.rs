//! Provisioning of one project's app.
//!
//! A [`ProvisionJob`] runs its steps strictly in order. The first failing
//! step ends the job; the error is folded into the returned [`JobOutcome`]
//! instead of being propagated, so a job can never take its siblings down
//! with it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, instrument};

use crate::config::{Project, ReinaConfig};
use crate::env::{EnvResolver, ResolvedEnvironment, Target};
use crate::error::{JobError, JobResult};
use crate::manifest::{AddonSpec, FormationSpec, Manifest, ManifestReader, Scripts};
use crate::naming::NamingPolicy;
use crate::platform::Platform;
use crate::report::{ExecutionGroup, ExecutionOutcome, JobOutcome, ProvisionStep};
use crate::scm::Scm;

/// Remote the project repository is cloned from.
const ORIGIN: &str = "origin";

static EMPTY_MANIFEST: Manifest = Manifest {
    addons: Vec::new(),
    buildpacks: Vec::new(),
    env: BTreeMap::new(),
    scripts: Scripts { postdeploy: None },
    formation: BTreeMap::new(),
};

/// One project's provisioning task for a PR.
///
/// Derived fields are fixed at construction. Only `manifest` and
/// `environment` are attached later, while the job runs.
#[derive(Debug, Clone)]
pub struct Job {
    pub project: Arc<Project>,
    pub pr_number: u64,
    pub branch: String,
    pub app_name: String,
    pub domain: String,
    pub remote: String,
    pub manifest: Option<Manifest>,
    pub environment: Option<ResolvedEnvironment>,
}

impl Job {
    pub fn new(
        project: Arc<Project>,
        pr_number: u64,
        branch: &str,
        naming: &NamingPolicy,
    ) -> Self {
        let app_name = naming.app_name(&project.key, pr_number);
        let domain = naming.domain_name(&app_name);
        let remote = naming.remote_id(&app_name);
        Self {
            project,
            pr_number,
            branch: branch.to_string(),
            app_name,
            domain,
            remote,
            manifest: None,
            environment: None,
        }
    }

    pub fn group(&self) -> ExecutionGroup {
        if self.project.parallel {
            ExecutionGroup::Parallel
        } else {
            ExecutionGroup::Sequential
        }
    }

    pub fn url(&self) -> String {
        format!("https://{}", self.domain)
    }
}

/// Collaborators shared by every job of a run.
#[derive(Clone)]
pub struct JobContext {
    pub config: Arc<ReinaConfig>,
    pub naming: Arc<NamingPolicy>,
    pub platform: Arc<dyn Platform>,
    pub scm: Arc<dyn Scm>,
    pub manifests: Arc<dyn ManifestReader>,
}

impl JobContext {
    pub fn repo_dir(&self, project: &Project) -> PathBuf {
        self.config.workdir.join(&project.key)
    }
}

struct StepFailure {
    step: ProvisionStep,
    error: JobError,
}

fn at(step: ProvisionStep) -> impl FnOnce(JobError) -> StepFailure {
    move |error| StepFailure { step, error }
}

pub struct ProvisionJob {
    job: Job,
    ctx: JobContext,
}

impl ProvisionJob {
    pub fn new(job: Job, ctx: JobContext) -> Self {
        Self { job, ctx }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Run every step and report the outcome.
    #[instrument(skip(self), fields(project = %self.job.project.key, app = %self.job.app_name))]
    pub async fn run(mut self) -> JobOutcome {
        let start = Instant::now();
        let outcome = match self.execute().await {
            Ok(()) => {
                info!("{}: Provisioned {}", self.job.project.key, self.job.url());
                ExecutionOutcome::Succeeded
            }
            Err(StepFailure { step, error }) => {
                error!(step = %step, "{}: {}", self.job.project.key, error);
                ExecutionOutcome::Failed {
                    step: Some(step),
                    message: error.to_string(),
                }
            }
        };

        JobOutcome {
            project: self.job.project.key.clone(),
            app_name: self.job.app_name.clone(),
            group: self.job.group(),
            outcome,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn execute(&mut self) -> Result<(), StepFailure> {
        let key = self.job.project.key.clone();

        info!("{key}: Fetching from {}...", self.job.project.github);
        self.sync_repository()
            .await
            .map_err(at(ProvisionStep::SyncRepository))?;
        self.load_manifest().map_err(at(ProvisionStep::LoadManifest))?;

        info!("{key}: Provisioning {}...", self.job.app_name);
        self.create_app().await.map_err(at(ProvisionStep::CreateApp))?;
        self.install_addons()
            .await
            .map_err(at(ProvisionStep::InstallAddons))?;
        self.add_buildpacks()
            .await
            .map_err(at(ProvisionStep::AddBuildpacks))?;
        self.set_env_vars()
            .await
            .map_err(at(ProvisionStep::SetEnvVars))?;

        info!("{key}: Deploying to {}...", self.job.url());
        self.deploy().await.map_err(at(ProvisionStep::Deploy))?;

        info!("{key}: Cooldown...");
        let cooldown = self.ctx.config.cooldown();
        if !cooldown.is_zero() {
            tokio::time::sleep(cooldown).await;
        }

        info!("{key}: Executing postdeploy scripts...");
        self.execute_postdeploy()
            .await
            .map_err(at(ProvisionStep::Postdeploy))?;

        info!("{key}: Setting up dynos...");
        self.setup_dynos()
            .await
            .map_err(at(ProvisionStep::SetupDynos))?;

        info!("{key}: Adding to pipeline...");
        self.add_to_pipeline()
            .await
            .map_err(at(ProvisionStep::AddToPipeline))?;

        Ok(())
    }

    fn manifest(&self) -> &Manifest {
        self.job.manifest.as_ref().unwrap_or(&EMPTY_MANIFEST)
    }

    async fn sync_repository(&self) -> JobResult<()> {
        let scm = &self.ctx.scm;
        let dir = self.ctx.repo_dir(&self.job.project);

        if dir.exists() {
            scm.pull(&dir, ORIGIN, &self.job.branch).await?;
        } else {
            scm.clone_repo(&self.job.project.github_url(), &dir).await?;
        }
        scm.checkout(&dir, &self.job.branch).await?;

        let remotes = scm.remotes(&dir).await?;
        if !remotes.iter().any(|r| r == &self.job.remote) {
            let url = self.ctx.naming.remote_url(&self.job.app_name);
            scm.add_remote(&dir, &self.job.remote, &url).await?;
        }
        Ok(())
    }

    fn load_manifest(&mut self) -> JobResult<()> {
        let dir = self.ctx.repo_dir(&self.job.project);
        self.job.manifest = Some(self.ctx.manifests.read(&dir)?);
        Ok(())
    }

    async fn create_app(&self) -> JobResult<()> {
        let region = self
            .job
            .project
            .region
            .as_deref()
            .unwrap_or(&self.ctx.config.default_region);
        self.ctx
            .platform
            .create_app(&self.job.app_name, region)
            .await?;
        Ok(())
    }

    async fn install_addons(&self) -> JobResult<()> {
        let addons: Vec<&AddonSpec> = self
            .job
            .project
            .addons
            .iter()
            .chain(self.manifest().addons.iter())
            .collect();

        for addon in addons {
            self.ctx
                .platform
                .create_addon(&self.job.app_name, addon)
                .await?;
        }
        Ok(())
    }

    async fn add_buildpacks(&self) -> JobResult<()> {
        let mut buildpacks: Vec<String> = Vec::new();
        let declared = self
            .job
            .project
            .buildpacks
            .iter()
            .chain(self.manifest().buildpacks.iter().map(|b| &b.url));
        for buildpack in declared {
            if !buildpacks.contains(buildpack) {
                buildpacks.push(buildpack.clone());
            }
        }

        if buildpacks.is_empty() {
            return Ok(());
        }
        self.ctx
            .platform
            .update_buildpacks(&self.job.app_name, &buildpacks)
            .await?;
        Ok(())
    }

    async fn set_env_vars(&mut self) -> JobResult<()> {
        let resolver = EnvResolver::new(&self.ctx.naming, self.ctx.platform.as_ref());
        let environment = resolver
            .resolve(
                Target {
                    app_name: &self.job.app_name,
                    domain: &self.job.domain,
                    pr_number: self.job.pr_number,
                },
                &self.job.project.config_vars,
                &self.manifest().env,
            )
            .await?;

        self.ctx
            .platform
            .update_config_vars(&self.job.app_name, environment.as_map())
            .await?;
        self.job.environment = Some(environment);
        Ok(())
    }

    async fn deploy(&self) -> JobResult<()> {
        let dir = self.ctx.repo_dir(&self.job.project);
        let refspec = format!("HEAD:refs/heads/{}", self.ctx.config.default_branch);
        self.ctx.scm.push(&dir, &self.job.remote, &refspec).await?;
        Ok(())
    }

    async fn execute_postdeploy(&self) -> JobResult<()> {
        let Some(script) = self.manifest().postdeploy() else {
            return Ok(());
        };
        self.ctx
            .platform
            .run_command(&self.job.app_name, script)
            .await?;
        Ok(())
    }

    async fn setup_dynos(&self) -> JobResult<()> {
        for (process_type, declared) in &self.manifest().formation {
            let formation = FormationSpec {
                quantity: declared.quantity,
                size: Some(self.ctx.config.dyno_size.clone()),
            };
            self.ctx
                .platform
                .update_formation(&self.job.app_name, process_type, &formation)
                .await?;
        }
        Ok(())
    }

    async fn add_to_pipeline(&self) -> JobResult<()> {
        let Some(pipeline) = self
            .job
            .project
            .pipeline
            .as_deref()
            .filter(|p| !p.trim().is_empty())
        else {
            return Ok(());
        };

        let platform = &self.ctx.platform;
        let pipeline_id = platform.pipeline_id(pipeline).await?;
        platform
            .couple_pipeline(
                &self.job.app_name,
                &pipeline_id,
                &self.ctx.config.pipeline_stage,
            )
            .await?;
        Ok(())
    }
}
