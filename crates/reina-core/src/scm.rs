//! Source-control seam and the git CLI backend.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::ScmError;

pub type ScmResult<T> = std::result::Result<T, ScmError>;

#[async_trait]
pub trait Scm: Send + Sync {
    async fn clone_repo(&self, url: &str, dir: &Path) -> ScmResult<()>;

    async fn pull(&self, dir: &Path, remote: &str, branch: &str) -> ScmResult<()>;

    async fn checkout(&self, dir: &Path, branch: &str) -> ScmResult<()>;

    async fn remotes(&self, dir: &Path) -> ScmResult<Vec<String>>;

    async fn add_remote(&self, dir: &Path, name: &str, url: &str) -> ScmResult<()>;

    /// `git push <remote> <refspec>`
    async fn push(&self, dir: &Path, remote: &str, refspec: &str) -> ScmResult<()>;
}

/// Shells out to the `git` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitCli;

impl GitCli {
    async fn git(&self, dir: Option<&Path>, args: &[&str]) -> ScmResult<String> {
        let mut cmd = Command::new("git");
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        debug!(args = ?args, "running git");
        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("git {} exited with {}", args.join(" "), output.status)
            } else {
                stderr
            };
            return Err(ScmError::Command {
                command: format!("git {}", args.join(" ")),
                message,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl Scm for GitCli {
    async fn clone_repo(&self, url: &str, dir: &Path) -> ScmResult<()> {
        let dir = dir.to_string_lossy();
        self.git(None, &["clone", url, &dir]).await.map(|_| ())
    }

    async fn pull(&self, dir: &Path, remote: &str, branch: &str) -> ScmResult<()> {
        self.git(Some(dir), &["pull", remote, branch]).await.map(|_| ())
    }

    async fn checkout(&self, dir: &Path, branch: &str) -> ScmResult<()> {
        self.git(Some(dir), &["checkout", branch]).await.map(|_| ())
    }

    async fn remotes(&self, dir: &Path) -> ScmResult<Vec<String>> {
        let out = self.git(Some(dir), &["remote"]).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn add_remote(&self, dir: &Path, name: &str, url: &str) -> ScmResult<()> {
        self.git(Some(dir), &["remote", "add", name, url])
            .await
            .map(|_| ())
    }

    async fn push(&self, dir: &Path, remote: &str, refspec: &str) -> ScmResult<()> {
        self.git(Some(dir), &["push", remote, refspec]).await.map(|_| ())
    }
}
