//! Environment variable resolution.
//!
//! Builds the final config vars of one app from, in order:
//! 1. the project's static mapping, or the vars of the `from` app;
//! 2. copy directives (local keys, other projects' vars, other projects' URLs);
//! 3. the `except` filter;
//! 4. identity variables (`APP_NAME`, `HEROKU_APP_NAME`, `DOMAIN_NAME`);
//! 5. the manifest's `env` overlay.
//!
//! Reads of other apps are not synchronized with their provisioning. A job
//! in the parallel group may observe a sibling app that does not exist yet;
//! that surfaces as [`JobError::MissingVariable`] or a platform error.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::config::{ConfigVarDirectives, CopySource};
use crate::error::{JobError, JobResult};
use crate::manifest::EnvEntry;
use crate::naming::NamingPolicy;
use crate::platform::{ConfigVars, Platform};

pub const APP_NAME: &str = "APP_NAME";
pub const HEROKU_APP_NAME: &str = "HEROKU_APP_NAME";
pub const DOMAIN_NAME: &str = "DOMAIN_NAME";

/// Keys always set to the job's own identity.
pub const IDENTITY_KEYS: [&str; 3] = [APP_NAME, HEROKU_APP_NAME, DOMAIN_NAME];

/// Final variable mapping for one app.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedEnvironment(ConfigVars);

impl ResolvedEnvironment {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn as_map(&self) -> &ConfigVars {
        &self.0
    }
}

/// Identity of the app being resolved.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub app_name: &'a str,
    pub domain: &'a str,
    pub pr_number: u64,
}

/// Resolves config vars against live platform state.
pub struct EnvResolver<'a> {
    naming: &'a NamingPolicy,
    platform: &'a dyn Platform,
}

impl<'a> EnvResolver<'a> {
    pub fn new(naming: &'a NamingPolicy, platform: &'a dyn Platform) -> Self {
        Self { naming, platform }
    }

    pub async fn resolve(
        &self,
        target: Target<'_>,
        directives: &ConfigVarDirectives,
        manifest_env: &BTreeMap<String, EnvEntry>,
    ) -> JobResult<ResolvedEnvironment> {
        // One fetch per distinct app for the lifetime of this resolution.
        let mut fetched: HashMap<String, ConfigVars> = HashMap::new();

        let (source_app, mut vars) = match &directives.from {
            Some(from) => {
                let remote = self.platform.config_vars(from).await?;
                fetched.insert(from.clone(), remote.clone());
                (from.as_str(), remote)
            }
            None => (target.app_name, directives.vars.clone()),
        };

        for directive in &directives.copy {
            let value = match directive.source() {
                CopySource::Local(key) => {
                    let mut value = vars.get(key).cloned().ok_or_else(|| {
                        JobError::MissingVariable {
                            app: source_app.to_string(),
                            key: key.to_string(),
                        }
                    })?;
                    if let Some(append) = directive.append.as_deref() {
                        value.push_str(append);
                    }
                    value
                }
                CopySource::AppUrl(project) => {
                    let app = self.naming.app_name(project, target.pr_number);
                    self.naming.url(&app)
                }
                CopySource::AppField { project, key } => {
                    let app = self.naming.app_name(project, target.pr_number);
                    if !fetched.contains_key(&app) {
                        debug!(app = %app, "fetching config vars for copy");
                        let remote = self.platform.config_vars(&app).await?;
                        fetched.insert(app.clone(), remote);
                    }
                    fetched
                        .get(&app)
                        .and_then(|remote| remote.get(key))
                        .cloned()
                        .ok_or_else(|| JobError::MissingVariable {
                            app: app.clone(),
                            key: key.to_string(),
                        })?
                }
            };
            vars.insert(directive.to.clone(), value);
        }

        for key in &directives.except {
            vars.remove(key);
        }

        vars.insert(APP_NAME.to_string(), target.app_name.to_string());
        vars.insert(HEROKU_APP_NAME.to_string(), target.app_name.to_string());
        vars.insert(DOMAIN_NAME.to_string(), target.domain.to_string());

        for (key, entry) in manifest_env {
            let Some(value) = entry.value() else {
                continue;
            };
            if IDENTITY_KEYS.contains(&key.as_str()) {
                warn!(
                    app = %target.app_name,
                    key = %key,
                    "manifest may not override identity variable"
                );
                continue;
            }
            vars.insert(key.clone(), value.to_string());
        }

        Ok(ResolvedEnvironment(vars))
    }
}
