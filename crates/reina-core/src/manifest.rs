//! Per-repository `app.json` manifest.
//!
//! The manifest is optional. A repository without one yields
//! [`Manifest::default`], which turns every manifest-driven provisioning step
//! into a no-op.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{JobError, JobResult};

/// File name looked up at the repository root.
pub const MANIFEST_FILE: &str = "app.json";

/// An add-on to install, decided once at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawAddon", into = "RawAddon")]
pub enum AddonSpec {
    /// `"heroku-postgresql:mini"`
    Plain(String),
    /// `{ "plan": "...", "options": { ... } }`
    Configured {
        plan: String,
        config: Map<String, Value>,
    },
}

impl AddonSpec {
    pub fn plan(&self) -> &str {
        match self {
            AddonSpec::Plain(plan) => plan,
            AddonSpec::Configured { plan, .. } => plan,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawAddon {
    Plain(String),
    Object {
        plan: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<Map<String, Value>>,
    },
}

impl From<RawAddon> for AddonSpec {
    fn from(raw: RawAddon) -> Self {
        match raw {
            RawAddon::Plain(plan) => AddonSpec::Plain(plan),
            RawAddon::Object {
                plan,
                options: Some(config),
            } => AddonSpec::Configured { plan, config },
            RawAddon::Object {
                plan,
                options: None,
            } => AddonSpec::Plain(plan),
        }
    }
}

impl From<AddonSpec> for RawAddon {
    fn from(spec: AddonSpec) -> Self {
        match spec {
            AddonSpec::Plain(plan) => RawAddon::Plain(plan),
            AddonSpec::Configured { plan, config } => RawAddon::Object {
                plan,
                options: Some(config),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildpackEntry {
    pub url: String,
}

/// An `env` entry: either a bare string or an object carrying `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvEntry {
    Value(String),
    Described {
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        required: Option<bool>,
    },
}

impl EnvEntry {
    /// The declared value, `None` when absent or empty.
    pub fn value(&self) -> Option<&str> {
        let value = match self {
            EnvEntry::Value(v) => Some(v.as_str()),
            EnvEntry::Described { value, .. } => value.as_deref(),
        };
        value.filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scripts {
    #[serde(default)]
    pub postdeploy: Option<String>,
}

/// Sizing for one process type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// Parsed `app.json`. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub addons: Vec<AddonSpec>,
    #[serde(default)]
    pub buildpacks: Vec<BuildpackEntry>,
    #[serde(default)]
    pub env: BTreeMap<String, EnvEntry>,
    #[serde(default)]
    pub scripts: Scripts,
    #[serde(default)]
    pub formation: BTreeMap<String, FormationSpec>,
}

impl Manifest {
    pub fn from_json(raw: &str) -> JobResult<Self> {
        serde_json::from_str(raw).map_err(|e| JobError::Manifest(e.to_string()))
    }

    /// Post-deploy command, if one is declared and non-blank.
    pub fn postdeploy(&self) -> Option<&str> {
        self.scripts
            .postdeploy
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Loads the manifest of a checked-out repository.
pub trait ManifestReader: Send + Sync {
    fn read(&self, repo_dir: &Path) -> JobResult<Manifest>;
}

/// Reads `app.json` from the repository root on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsManifestReader;

impl ManifestReader for FsManifestReader {
    fn read(&self, repo_dir: &Path) -> JobResult<Manifest> {
        let path = repo_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(Manifest::default());
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| JobError::Manifest(format!("{}: {e}", path.display())))?;
        Manifest::from_json(&raw)
    }
}
