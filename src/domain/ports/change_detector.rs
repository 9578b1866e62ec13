use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

/// Reports whether tracked files differ from the last known baseline.
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    /// Record the current tree as the baseline without reporting a change.
    async fn capture_baseline(&self, project_dir: &Path) -> Result<()>;

    /// Compare the tree against the baseline, then move the baseline forward.
    async fn has_changed(&self, project_dir: &Path) -> Result<bool>;
}
