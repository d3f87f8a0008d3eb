//! Reina Core Library
//!
//! Provisions one review app per project for a pull request:
//! - [`naming`]: deterministic app, domain and remote names
//! - [`env`]: config var resolution across projects
//! - [`job`]: the fixed provisioning sequence for one app
//! - [`orchestrator`]: validation, conflict check and bounded execution
//!
//! The hosting platform, git and the operator prompt are injected through the
//! [`Platform`], [`Scm`] and [`Confirm`] traits.

pub mod config;
pub mod env;
pub mod error;
pub mod fakes;
pub mod job;
pub mod manifest;
pub mod naming;
pub mod orchestrator;
pub mod platform;
pub mod report;
pub mod scm;
pub mod telemetry;

pub use config::{ConfigVarDirectives, CopyDirective, CopySource, Project, ReinaConfig};
pub use env::{EnvResolver, ResolvedEnvironment, Target, IDENTITY_KEYS};
pub use error::{JobError, JobResult, PlatformError, ReinaError, Result, ScmError};
pub use job::{Job, JobContext, ProvisionJob};
pub use manifest::{
    AddonSpec, BuildpackEntry, EnvEntry, FormationSpec, FsManifestReader, Manifest,
    ManifestReader,
};
pub use naming::{NamingPolicy, MAX_APP_NAME_LEN};
pub use orchestrator::{parse_branch_overrides, parse_pr_number, Confirm, Orchestrator, RunPhase};
pub use platform::{ConfigVars, Platform, PlatformResult};
pub use report::{ExecutionGroup, ExecutionOutcome, JobOutcome, ProvisionStep, RunReport};
pub use scm::{GitCli, Scm, ScmResult};
pub use telemetry::init_tracing;
