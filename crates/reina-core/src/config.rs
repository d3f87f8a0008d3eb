//! Run configuration.
//!
//! Loaded once at process start from a TOML file and shared read-only
//! (behind an `Arc`) by every job of the run.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReinaError, Result};
use crate::manifest::AddonSpec;

/// Environment variables consulted for the platform credential, in order.
pub const CREDENTIAL_ENV_VARS: [&str; 2] = ["PLATFORM_API", "HEROKU_API_KEY"];

pub const DEFAULT_REGION: &str = "eu";
pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_STAGE: &str = "staging";
pub const DEFAULT_DOMAIN_SUFFIX: &str = "herokuapp.com";
pub const DEFAULT_COOLDOWN_SECS: u64 = 7;
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_DYNO_SIZE: &str = "free";

/// Top-level configuration for a Reina run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinaConfig {
    /// Prepended to every derived app name.
    #[serde(default)]
    pub app_name_prefix: String,

    #[serde(default = "default_domain_suffix")]
    pub domain_suffix: String,

    #[serde(default = "default_region")]
    pub default_region: String,

    /// Branch used when no `key#branch` override is given. Also the branch
    /// deployed to on the platform remote.
    #[serde(default = "default_branch")]
    pub default_branch: String,

    #[serde(default = "default_stage")]
    pub pipeline_stage: String,

    /// Pause after deploy before running post-deploy scripts.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Size forced onto every process type declared in a manifest formation.
    #[serde(default = "default_dyno_size")]
    pub dyno_size: String,

    /// Upper bound on concurrently provisioned parallel jobs.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Directory repositories are cloned into.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    /// Platform token. Environment variables take precedence.
    #[serde(default, skip_serializing)]
    pub platform_api_token: Option<String>,

    /// Projects in declaration order. Sequential jobs run in this order.
    #[serde(default)]
    pub projects: Vec<Project>,
}

fn default_domain_suffix() -> String {
    DEFAULT_DOMAIN_SUFFIX.to_string()
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_stage() -> String {
    DEFAULT_STAGE.to_string()
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

fn default_dyno_size() -> String {
    DEFAULT_DYNO_SIZE.to_string()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

fn default_parallel() -> bool {
    true
}

impl Default for ReinaConfig {
    fn default() -> Self {
        Self {
            app_name_prefix: String::new(),
            domain_suffix: default_domain_suffix(),
            default_region: default_region(),
            default_branch: default_branch(),
            pipeline_stage: default_stage(),
            cooldown_secs: default_cooldown_secs(),
            dyno_size: default_dyno_size(),
            concurrency: default_concurrency(),
            workdir: default_workdir(),
            platform_api_token: None,
            projects: Vec::new(),
        }
    }
}

impl ReinaConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: ReinaConfig =
            toml::from_str(raw).map_err(|e| ReinaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ReinaError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.projects.is_empty() {
            return Err(ReinaError::Config("no projects configured".to_string()));
        }
        if self.concurrency == 0 {
            return Err(ReinaError::Config("concurrency must be at least 1".to_string()));
        }

        let mut seen = HashSet::new();
        for project in &self.projects {
            if project.key.trim().is_empty() {
                return Err(ReinaError::Config("project key must not be empty".to_string()));
            }
            if !seen.insert(project.key.as_str()) {
                return Err(ReinaError::Config(format!(
                    "project {} is declared more than once",
                    project.key
                )));
            }
        }
        Ok(())
    }

    /// Resolve the platform credential from the environment or the file.
    pub fn platform_token(&self) -> Result<String> {
        CREDENTIAL_ENV_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .chain(self.platform_api_token.clone())
            .find(|token| !token.trim().is_empty())
            .ok_or_else(|| ReinaError::MissingCredential(CREDENTIAL_ENV_VARS.join(" or ")))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn project(&self, key: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.key == key)
    }
}

/// One repository provisioned as one app per PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub key: String,

    /// GitHub `owner/repo` slug.
    pub github: String,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub addons: Vec<AddonSpec>,

    #[serde(default)]
    pub buildpacks: Vec<String>,

    #[serde(default)]
    pub pipeline: Option<String>,

    #[serde(default)]
    pub config_vars: ConfigVarDirectives,

    /// `false` moves the project to the sequential group.
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

impl Project {
    pub fn new(key: &str, github: &str) -> Self {
        Self {
            key: key.to_string(),
            github: github.to_string(),
            region: None,
            addons: Vec::new(),
            buildpacks: Vec::new(),
            pipeline: None,
            config_vars: ConfigVarDirectives::default(),
            parallel: true,
        }
    }

    pub fn github_url(&self) -> String {
        format!("https://github.com/{}", self.github)
    }
}

/// How a project's environment variables are derived.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigVarDirectives {
    /// Existing app whose variables seed the mapping.
    #[serde(default)]
    pub from: Option<String>,

    #[serde(default)]
    pub copy: Vec<CopyDirective>,

    /// Keys removed before identity variables are injected.
    #[serde(default)]
    pub except: Vec<String>,

    /// Static mapping, used when `from` is not set.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

/// Derive one destination variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyDirective {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub append: Option<String>,
}

/// Where a [`CopyDirective`] reads its value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopySource<'a> {
    /// A key of the starting mapping.
    Local(&'a str),
    /// `project#url`: the public URL of another project's app.
    AppUrl(&'a str),
    /// `project#KEY`: a variable of another project's app.
    AppField { project: &'a str, key: &'a str },
}

impl CopyDirective {
    pub fn source(&self) -> CopySource<'_> {
        match self.from.split_once('#') {
            None => CopySource::Local(&self.from),
            Some((project, "url")) => CopySource::AppUrl(project),
            Some((project, key)) => CopySource::AppField { project, key },
        }
    }
}
