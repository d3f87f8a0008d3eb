//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `MemoryPlatform`, `MemoryScm`, `StaticManifests` and
//! `ScriptedConfirm` that satisfy the trait contracts without network access,
//! a git binary or a terminal.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{JobResult, PlatformError, ScmError};
use crate::manifest::{AddonSpec, FormationSpec, Manifest, ManifestReader};
use crate::orchestrator::Confirm;
use crate::platform::{ConfigVars, Platform, PlatformResult};
use crate::scm::{Scm, ScmResult};

fn not_found(what: &str) -> PlatformError {
    PlatformError::Api {
        status: 404,
        body: format!(r#"{{"id":"not_found","message":"Couldn't find that {what}."}}"#),
    }
}

fn repo_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// MemoryPlatform
// ---------------------------------------------------------------------------

/// A platform call as observed by [`MemoryPlatform`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    ListApps,
    CreateApp { name: String, region: String },
    DeleteApp { name: String },
    CreateAddon { app: String, plan: String },
    UpdateBuildpacks { app: String, buildpacks: Vec<String> },
    ConfigVars { app: String },
    UpdateConfigVars { app: String },
    UpdateFormation { app: String, process_type: String, formation: FormationSpec },
    PipelineId { pipeline: String },
    CouplePipeline { app: String, pipeline_id: String, stage: String },
    RunCommand { app: String, command: String },
}

impl PlatformCall {
    pub fn kind(&self) -> &'static str {
        match self {
            PlatformCall::ListApps => "list_apps",
            PlatformCall::CreateApp { .. } => "create_app",
            PlatformCall::DeleteApp { .. } => "delete_app",
            PlatformCall::CreateAddon { .. } => "create_addon",
            PlatformCall::UpdateBuildpacks { .. } => "update_buildpacks",
            PlatformCall::ConfigVars { .. } => "config_vars",
            PlatformCall::UpdateConfigVars { .. } => "update_config_vars",
            PlatformCall::UpdateFormation { .. } => "update_formation",
            PlatformCall::PipelineId { .. } => "pipeline_id",
            PlatformCall::CouplePipeline { .. } => "couple_pipeline",
            PlatformCall::RunCommand { .. } => "run_command",
        }
    }

    /// App the call targets, if any.
    pub fn app(&self) -> Option<&str> {
        match self {
            PlatformCall::ListApps | PlatformCall::PipelineId { .. } => None,
            PlatformCall::CreateApp { name, .. } | PlatformCall::DeleteApp { name } => Some(name),
            PlatformCall::CreateAddon { app, .. }
            | PlatformCall::UpdateBuildpacks { app, .. }
            | PlatformCall::ConfigVars { app }
            | PlatformCall::UpdateConfigVars { app }
            | PlatformCall::UpdateFormation { app, .. }
            | PlatformCall::CouplePipeline { app, .. }
            | PlatformCall::RunCommand { app, .. } => Some(app),
        }
    }
}

/// In-memory platform: apps, their config vars and pipelines.
#[derive(Debug, Default)]
pub struct MemoryPlatform {
    apps: Mutex<BTreeSet<String>>,
    vars: Mutex<HashMap<String, ConfigVars>>,
    pipelines: Mutex<HashMap<String, String>>,
    fetches: Mutex<HashMap<String, usize>>,
    create_failures: Mutex<HashMap<String, PlatformError>>,
    calls: Mutex<Vec<PlatformCall>>,
    create_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an app that already exists before the run.
    pub fn add_app(&self, name: &str) {
        self.apps.lock().unwrap().insert(name.to_string());
    }

    /// Set the config vars of an app, creating the app if needed.
    pub fn set_config_vars<'a>(
        &self,
        app: &str,
        vars: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) {
        self.add_app(app);
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.vars.lock().unwrap().insert(app.to_string(), vars);
    }

    pub fn set_pipeline(&self, name: &str, id: &str) {
        self.pipelines
            .lock()
            .unwrap()
            .insert(name.to_string(), id.to_string());
    }

    /// Make the next `create_app` for `app` fail with `error`.
    pub fn fail_create_app(&self, app: &str, error: PlatformError) {
        self.create_failures
            .lock()
            .unwrap()
            .insert(app.to_string(), error);
    }

    /// Hold every `create_app` call for `delay`.
    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = Some(delay);
    }

    pub fn apps(&self) -> Vec<String> {
        self.apps.lock().unwrap().iter().cloned().collect()
    }

    pub fn config_vars_of(&self, app: &str) -> Option<ConfigVars> {
        self.vars.lock().unwrap().get(app).cloned()
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than the conflict-check listing.
    pub fn mutating_calls(&self) -> Vec<PlatformCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, PlatformCall::ListApps | PlatformCall::ConfigVars { .. }))
            .collect()
    }

    pub fn config_var_fetches(&self) -> usize {
        self.fetches.lock().unwrap().values().sum()
    }

    pub fn fetches_for(&self, app: &str) -> usize {
        self.fetches.lock().unwrap().get(app).copied().unwrap_or(0)
    }

    /// Highest number of `create_app` calls observed in flight at once.
    pub fn max_concurrent_creates(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: PlatformCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn ensure_app(&self, app: &str) -> PlatformResult<()> {
        if self.apps.lock().unwrap().contains(app) {
            Ok(())
        } else {
            Err(not_found("app"))
        }
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    async fn list_apps(&self) -> PlatformResult<Vec<String>> {
        self.record(PlatformCall::ListApps);
        Ok(self.apps())
    }

    async fn create_app(&self, name: &str, region: &str) -> PlatformResult<()> {
        self.record(PlatformCall::CreateApp {
            name: name.to_string(),
            region: region.to_string(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.create_failures.lock().unwrap().remove(name) {
            return Err(error);
        }
        if !self.apps.lock().unwrap().insert(name.to_string()) {
            return Err(PlatformError::Api {
                status: 422,
                body: r#"{"id":"invalid_params","message":"Name is already taken"}"#.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_app(&self, name: &str) -> PlatformResult<()> {
        self.record(PlatformCall::DeleteApp {
            name: name.to_string(),
        });
        if !self.apps.lock().unwrap().remove(name) {
            return Err(not_found("app"));
        }
        self.vars.lock().unwrap().remove(name);
        Ok(())
    }

    async fn create_addon(&self, app: &str, addon: &AddonSpec) -> PlatformResult<()> {
        self.record(PlatformCall::CreateAddon {
            app: app.to_string(),
            plan: addon.plan().to_string(),
        });
        self.ensure_app(app)
    }

    async fn update_buildpacks(&self, app: &str, buildpacks: &[String]) -> PlatformResult<()> {
        self.record(PlatformCall::UpdateBuildpacks {
            app: app.to_string(),
            buildpacks: buildpacks.to_vec(),
        });
        self.ensure_app(app)
    }

    async fn config_vars(&self, app: &str) -> PlatformResult<ConfigVars> {
        self.record(PlatformCall::ConfigVars {
            app: app.to_string(),
        });
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(app.to_string())
            .or_default() += 1;
        self.ensure_app(app)?;
        Ok(self
            .vars
            .lock()
            .unwrap()
            .get(app)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_config_vars(&self, app: &str, vars: &ConfigVars) -> PlatformResult<()> {
        self.record(PlatformCall::UpdateConfigVars {
            app: app.to_string(),
        });
        self.ensure_app(app)?;
        let mut all = self.vars.lock().unwrap();
        let current = all.entry(app.to_string()).or_default();
        current.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn update_formation(
        &self,
        app: &str,
        process_type: &str,
        formation: &FormationSpec,
    ) -> PlatformResult<()> {
        self.record(PlatformCall::UpdateFormation {
            app: app.to_string(),
            process_type: process_type.to_string(),
            formation: formation.clone(),
        });
        self.ensure_app(app)
    }

    async fn pipeline_id(&self, pipeline: &str) -> PlatformResult<String> {
        self.record(PlatformCall::PipelineId {
            pipeline: pipeline.to_string(),
        });
        self.pipelines
            .lock()
            .unwrap()
            .get(pipeline)
            .cloned()
            .ok_or_else(|| not_found("pipeline"))
    }

    async fn couple_pipeline(
        &self,
        app: &str,
        pipeline_id: &str,
        stage: &str,
    ) -> PlatformResult<()> {
        self.record(PlatformCall::CouplePipeline {
            app: app.to_string(),
            pipeline_id: pipeline_id.to_string(),
            stage: stage.to_string(),
        });
        self.ensure_app(app)
    }

    async fn run_command(&self, app: &str, command: &str) -> PlatformResult<()> {
        self.record(PlatformCall::RunCommand {
            app: app.to_string(),
            command: command.to_string(),
        });
        self.ensure_app(app)
    }
}

// ---------------------------------------------------------------------------
// MemoryScm
// ---------------------------------------------------------------------------

/// An SCM call as observed by [`MemoryScm`]. `repo` is the checkout's
/// directory name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScmCall {
    Clone { repo: String, url: String },
    Pull { repo: String, remote: String, branch: String },
    Checkout { repo: String, branch: String },
    Remotes { repo: String },
    AddRemote { repo: String, name: String, url: String },
    Push { repo: String, remote: String, refspec: String },
}

impl ScmCall {
    pub fn repo(&self) -> &str {
        match self {
            ScmCall::Clone { repo, .. }
            | ScmCall::Pull { repo, .. }
            | ScmCall::Checkout { repo, .. }
            | ScmCall::Remotes { repo }
            | ScmCall::AddRemote { repo, .. }
            | ScmCall::Push { repo, .. } => repo,
        }
    }
}

/// Records SCM calls; every repository starts with an `origin` remote.
#[derive(Debug, Default)]
pub struct MemoryScm {
    calls: Mutex<Vec<ScmCall>>,
    remotes: Mutex<HashMap<String, Vec<String>>>,
    clone_failures: Mutex<HashMap<String, ScmError>>,
}

impl MemoryScm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_existing_remote(&self, repo: &str, name: &str) {
        self.remotes
            .lock()
            .unwrap()
            .entry(repo.to_string())
            .or_insert_with(|| vec!["origin".to_string()])
            .push(name.to_string());
    }

    /// Make the next clone into `repo` fail with `error`.
    pub fn fail_clone(&self, repo: &str, error: ScmError) {
        self.clone_failures
            .lock()
            .unwrap()
            .insert(repo.to_string(), error);
    }

    pub fn calls(&self) -> Vec<ScmCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, repo: &str) -> Vec<ScmCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.repo() == repo)
            .collect()
    }

    fn record(&self, call: ScmCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Scm for MemoryScm {
    async fn clone_repo(&self, url: &str, dir: &Path) -> ScmResult<()> {
        let repo = repo_name(dir);
        self.record(ScmCall::Clone {
            repo: repo.clone(),
            url: url.to_string(),
        });
        match self.clone_failures.lock().unwrap().remove(&repo) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn pull(&self, dir: &Path, remote: &str, branch: &str) -> ScmResult<()> {
        self.record(ScmCall::Pull {
            repo: repo_name(dir),
            remote: remote.to_string(),
            branch: branch.to_string(),
        });
        Ok(())
    }

    async fn checkout(&self, dir: &Path, branch: &str) -> ScmResult<()> {
        self.record(ScmCall::Checkout {
            repo: repo_name(dir),
            branch: branch.to_string(),
        });
        Ok(())
    }

    async fn remotes(&self, dir: &Path) -> ScmResult<Vec<String>> {
        let repo = repo_name(dir);
        self.record(ScmCall::Remotes { repo: repo.clone() });
        Ok(self
            .remotes
            .lock()
            .unwrap()
            .get(&repo)
            .cloned()
            .unwrap_or_else(|| vec!["origin".to_string()]))
    }

    async fn add_remote(&self, dir: &Path, name: &str, url: &str) -> ScmResult<()> {
        let repo = repo_name(dir);
        self.record(ScmCall::AddRemote {
            repo: repo.clone(),
            name: name.to_string(),
            url: url.to_string(),
        });
        self.remotes
            .lock()
            .unwrap()
            .entry(repo)
            .or_insert_with(|| vec!["origin".to_string()])
            .push(name.to_string());
        Ok(())
    }

    async fn push(&self, dir: &Path, remote: &str, refspec: &str) -> ScmResult<()> {
        self.record(ScmCall::Push {
            repo: repo_name(dir),
            remote: remote.to_string(),
            refspec: refspec.to_string(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticManifests
// ---------------------------------------------------------------------------

/// Manifests keyed by checkout directory name; unknown repos are empty.
#[derive(Debug, Default)]
pub struct StaticManifests {
    manifests: Mutex<HashMap<String, Manifest>>,
}

impl StaticManifests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, repo: &str, manifest: Manifest) {
        self.manifests
            .lock()
            .unwrap()
            .insert(repo.to_string(), manifest);
    }
}

impl ManifestReader for StaticManifests {
    fn read(&self, repo_dir: &Path) -> JobResult<Manifest> {
        Ok(self
            .manifests
            .lock()
            .unwrap()
            .get(&repo_name(repo_dir))
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// ScriptedConfirm
// ---------------------------------------------------------------------------

/// Answers every confirmation with a fixed response and records the prompts.
#[derive(Debug)]
pub struct ScriptedConfirm {
    answer: bool,
    prompts: Mutex<Vec<Vec<String>>>,
}

impl ScriptedConfirm {
    pub fn accepting() -> Self {
        Self {
            answer: true,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn declining() -> Self {
        Self {
            answer: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<Vec<String>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Confirm for ScriptedConfirm {
    async fn confirm_deletion(&self, apps: &[String]) -> bool {
        self.prompts.lock().unwrap().push(apps.to_vec());
        self.answer
    }
}
