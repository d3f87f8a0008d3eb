//! Hosting platform seam.
//!
//! Inject the HTTP client from `heroku-platform` in production, or
//! [`crate::fakes::MemoryPlatform`] in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::PlatformError;
use crate::manifest::{AddonSpec, FormationSpec};

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Config vars of one app.
pub type ConfigVars = BTreeMap<String, String>;

#[async_trait]
pub trait Platform: Send + Sync {
    /// Names of every app visible to the credential.
    async fn list_apps(&self) -> PlatformResult<Vec<String>>;

    async fn create_app(&self, name: &str, region: &str) -> PlatformResult<()>;

    async fn delete_app(&self, name: &str) -> PlatformResult<()>;

    async fn create_addon(&self, app: &str, addon: &AddonSpec) -> PlatformResult<()>;

    /// Replace the app's buildpacks with `buildpacks`, in order.
    async fn update_buildpacks(&self, app: &str, buildpacks: &[String]) -> PlatformResult<()>;

    /// Currently configured variables of an app.
    async fn config_vars(&self, app: &str) -> PlatformResult<ConfigVars>;

    async fn update_config_vars(&self, app: &str, vars: &ConfigVars) -> PlatformResult<()>;

    async fn update_formation(
        &self,
        app: &str,
        process_type: &str,
        formation: &FormationSpec,
    ) -> PlatformResult<()>;

    async fn pipeline_id(&self, pipeline: &str) -> PlatformResult<String>;

    async fn couple_pipeline(&self, app: &str, pipeline_id: &str, stage: &str)
        -> PlatformResult<()>;

    /// Start a detached one-off dyno running `command`.
    async fn run_command(&self, app: &str, command: &str) -> PlatformResult<()>;
}
