//! Working-tree change detection through git.
//!
//! The baseline is a digest of HEAD, the porcelain status, staged and
//! unstaged diffs, and the contents of untracked files. Any commit, edit, or
//! new file changes the digest.

use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::ports::ChangeDetector;

/// Git-backed change detector holding the last seen tree digest.
#[derive(Debug, Default)]
pub struct GitChangeDetector {
    baseline: Mutex<Option<String>>,
    pathspec: Vec<String>,
}

impl GitChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore project-relative `paths`, such as the queue and state directories
    /// the orchestrator itself rewrites.
    pub fn excluding<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Self {
        let excludes: Vec<String> = paths
            .into_iter()
            .filter(|p| p.as_ref().is_relative())
            .map(|p| format!(":(exclude){}", p.as_ref().display()))
            .collect();
        let pathspec = if excludes.is_empty() {
            Vec::new()
        } else {
            ["--".to_string(), ".".to_string()].into_iter().chain(excludes).collect()
        };
        Self {
            baseline: Mutex::default(),
            pathspec,
        }
    }

    async fn fingerprint(&self, project_dir: &Path) -> Result<String> {
        let inside = git(project_dir, &["rev-parse", "--is-inside-work-tree"]).await?;
        if inside.trim() != "true" {
            bail!("{} is not a git working tree", project_dir.display());
        }

        // A repository without commits has no HEAD; treat it as empty.
        let head = git(project_dir, &["rev-parse", "HEAD"]).await.unwrap_or_default();
        let status = self.scoped(project_dir, &["status", "--porcelain=v1", "--untracked-files=all"]).await?;
        let unstaged = self.scoped(project_dir, &["diff"]).await?;
        let staged = self.scoped(project_dir, &["diff", "--cached"]).await?;
        let untracked = self
            .scoped(project_dir, &["ls-files", "--others", "--exclude-standard", "-z"])
            .await?;

        let mut hasher = Sha256::new();
        for part in [&head, &status, &unstaged, &staged] {
            hasher.update(part.as_bytes());
            hasher.update([0]);
        }
        for name in untracked.split('\0').filter(|n| !n.is_empty()) {
            hasher.update(name.as_bytes());
            // Unreadable files still count by name.
            if let Ok(bytes) = tokio::fs::read(project_dir.join(name)).await {
                hasher.update(&bytes);
            }
            hasher.update([0]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    async fn scoped(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let mut full: Vec<&str> = args.to_vec();
        full.extend(self.pathspec.iter().map(String::as_str));
        git(dir, &full).await
    }
}

async fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("Failed to run git {}", args.join(" ")))?;

    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[async_trait]
impl ChangeDetector for GitChangeDetector {
    async fn capture_baseline(&self, project_dir: &Path) -> Result<()> {
        let digest = self.fingerprint(project_dir).await?;
        *self.baseline.lock().await = Some(digest);
        Ok(())
    }

    async fn has_changed(&self, project_dir: &Path) -> Result<bool> {
        let current = self.fingerprint(project_dir).await?;
        let mut baseline = self.baseline.lock().await;
        let changed = baseline.as_deref() != Some(current.as_str());
        debug!(changed, "working tree compared with baseline");
        *baseline = Some(current);
        Ok(changed)
    }
}
