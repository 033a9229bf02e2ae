//! Version-control status collaborator.
//!
//! The supervisor only asks one question of the repository: how many
//! files changed since the last checkpoint? The answer is the
//! progress metric the circuit breaker lives on, so it comes from git
//! itself rather than from anything the agent claims.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{LoopguardError, Result};

/// Abstraction over repository status.
pub trait VcsStatus: Send + Sync {
    /// Files modified since the last checkpoint.
    ///
    /// Counts both uncommitted working-tree changes and files touched
    /// by commits made since the checkpoint, so an agent that commits
    /// its work still registers progress.
    ///
    /// # Errors
    ///
    /// Returns an error if repository status cannot be obtained.
    fn modified_file_count(&self) -> Result<u32>;

    /// Mark the current repository state as the new baseline.
    ///
    /// # Errors
    ///
    /// Returns an error if repository status cannot be obtained.
    fn checkpoint(&self) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
struct GitSnapshot {
    head: Option<String>,
    working_tree: BTreeSet<String>,
}

/// Real git-backed status, shelling out to the `git` CLI.
pub struct GitStatus {
    project_dir: PathBuf,
    snapshot: Mutex<GitSnapshot>,
}

impl GitStatus {
    /// Create a git status collaborator for the given repository,
    /// checkpointing the current state as the baseline.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is not a usable git repository.
    pub fn new<P: Into<PathBuf>>(project_dir: P) -> Result<Self> {
        let status = Self {
            project_dir: project_dir.into(),
            snapshot: Mutex::new(GitSnapshot::default()),
        };
        status.checkpoint()?;
        Ok(status)
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.project_dir)
            .output()
            .map_err(|e| LoopguardError::git(args.join(" "), e.to_string()))?;

        if !output.status.success() {
            return Err(LoopguardError::git(
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn working_tree_files(&self) -> Result<BTreeSet<String>> {
        let output = self.git(&["status", "--porcelain"])?;
        Ok(output
            .lines()
            .filter(|line| line.len() > 3)
            .map(|line| line[3..].to_string())
            .collect())
    }

    fn head_hash(&self) -> Option<String> {
        // No HEAD yet (empty repository) is not an error
        self.git(&["rev-parse", "HEAD"])
            .ok()
            .map(|h| h.trim().to_string())
    }

    fn committed_files_since(&self, old_head: &str) -> Result<BTreeSet<String>> {
        let range = format!("{}..HEAD", old_head);
        let output = self.git(&["diff", "--name-only", &range])?;
        Ok(output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }
}

impl VcsStatus for GitStatus {
    fn modified_file_count(&self) -> Result<u32> {
        let snapshot = self
            .snapshot
            .lock()
            .map_err(|_| LoopguardError::git("status", "poisoned lock"))?
            .clone();

        let current_tree = self.working_tree_files()?;
        let mut changed: BTreeSet<String> = current_tree
            .symmetric_difference(&snapshot.working_tree)
            .cloned()
            .collect();

        if let Some(old_head) = &snapshot.head {
            let current_head = self.head_hash();
            if current_head.as_deref() != Some(old_head.as_str()) {
                changed.extend(self.committed_files_since(old_head)?);
            }
        }

        debug!(count = changed.len(), "Modified files since checkpoint");
        Ok(changed.len() as u32)
    }

    fn checkpoint(&self) -> Result<()> {
        let fresh = GitSnapshot {
            head: self.head_hash(),
            working_tree: self.working_tree_files()?,
        };
        let mut snapshot = self
            .snapshot
            .lock()
            .map_err(|_| LoopguardError::git("checkpoint", "poisoned lock"))?;
        *snapshot = fresh;
        Ok(())
    }
}

/// Scripted status double for tests: pops one count per query.
#[derive(Debug, Default)]
pub struct MockVcs {
    counts: Mutex<Vec<u32>>,
}

impl MockVcs {
    /// Create a mock that replays the given counts in order, then
    /// reports zero.
    #[must_use]
    pub fn with_counts(counts: Vec<u32>) -> Self {
        Self {
            counts: Mutex::new(counts),
        }
    }
}

impl VcsStatus for MockVcs {
    fn modified_file_count(&self) -> Result<u32> {
        let mut counts = self
            .counts
            .lock()
            .map_err(|_| LoopguardError::git("mock", "poisoned lock"))?;
        if counts.is_empty() {
            Ok(0)
        } else {
            Ok(counts.remove(0))
        }
    }

    fn checkpoint(&self) -> Result<()> {
        Ok(())
    }
}
