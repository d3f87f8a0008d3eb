//! App naming.
//!
//! Every name Reina derives is a pure function of the project key and the PR
//! number, so two runs for the same PR always target the same apps.

use crate::config::ReinaConfig;
use crate::error::{ReinaError, Result};

/// Platform limit: app names must be shorter than this.
pub const MAX_APP_NAME_LEN: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingPolicy {
    prefix: String,
    domain_suffix: String,
}

impl NamingPolicy {
    pub fn new(prefix: &str, domain_suffix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            domain_suffix: domain_suffix.trim_start_matches('.').to_string(),
        }
    }

    pub fn from_config(config: &ReinaConfig) -> Self {
        Self::new(&config.app_name_prefix, &config.domain_suffix)
    }

    /// `{prefix}{project_key}-{pr_number}`
    pub fn app_name(&self, project_key: &str, pr_number: u64) -> String {
        format!("{}{}-{}", self.prefix, project_key, pr_number)
    }

    pub fn domain_name(&self, app_name: &str) -> String {
        format!("{}.{}", app_name, self.domain_suffix)
    }

    /// Public URL of an app.
    pub fn url(&self, app_name: &str) -> String {
        format!("https://{}", self.domain_name(app_name))
    }

    /// Name of the git remote pointing at the app.
    pub fn remote_id(&self, app_name: &str) -> String {
        format!("heroku-{app_name}")
    }

    pub fn remote_url(&self, app_name: &str) -> String {
        format!("https://git.heroku.com/{app_name}.git")
    }

    pub fn validate(&self, app_name: &str) -> Result<()> {
        let len = app_name.chars().count();
        if len >= MAX_APP_NAME_LEN {
            return Err(ReinaError::AppNameTooLong {
                app_name: app_name.to_string(),
                len,
                limit: MAX_APP_NAME_LEN,
            });
        }
        Ok(())
    }
}
