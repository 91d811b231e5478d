use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Version used for every intermediate step of a `git rebase -x` test run,
/// so each step skips the `git describe` query.
pub const SYNTHETIC_VERSION: &str = "test-build-patch-series";

/// Progress of a `git rebase -x edk2-build ...` sequence this process is part of.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebaseState {
    /// `[ <step> / <steps> - <branch> ]`, absent outside of a rebase.
    pub label: Option<String>,
    /// Set on every step but the last one.
    pub pin_version: bool,
}

impl RebaseState {
    /// Prefix for status lines, including the separating space.
    pub fn prefix(&self) -> String {
        self.label
            .as_deref()
            .map(|l| format!("{l} "))
            .unwrap_or_default()
    }
}

/// Look for `rebase-merge` progress files in the git dir of `repo`.
pub fn detect_rebase_state(repo: &Path) -> Result<RebaseState> {
    let git_dir = resolve_git_dir(repo)?;
    let progress = git_dir.join("rebase-merge");
    if !progress.join("msgnum").exists() {
        return Ok(RebaseState::default());
    }

    let msgnum = read_counter(&progress.join("msgnum"))?;
    let end = read_counter(&progress.join("end"))?;
    let head_name = read_trimmed(&progress.join("head-name"))?;
    let branch = head_name.rsplit('/').next().unwrap_or(&head_name);

    // git counts two progress units per picked commit.
    let label = format!("[ {} / {} - {} ]", msgnum / 2, end / 2, branch);
    tracing::debug!(%label, msgnum, end, "rebase in progress");
    Ok(RebaseState {
        label: Some(label),
        pin_version: msgnum != end,
    })
}

// Worktrees and submodules have a `.git` file pointing at the real git dir.
fn resolve_git_dir(repo: &Path) -> Result<PathBuf> {
    let dot_git = repo.join(".git");
    if !dot_git.is_file() {
        return Ok(dot_git);
    }
    let data = read_trimmed(&dot_git)?;
    let target = data
        .strip_prefix("gitdir:")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Error::msg(format!(
                "unexpected content in {} (expected 'gitdir: <path>')",
                dot_git.display()
            ))
        })?;
    let target = PathBuf::from(target);
    Ok(if target.is_absolute() {
        target
    } else {
        repo.join(target)
    })
}

fn read_trimmed(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))
}

fn read_counter(path: &Path) -> Result<u64> {
    let raw = read_trimmed(path)?;
    raw.parse()
        .map_err(|_| Error::msg(format!("invalid counter '{raw}' in {}", path.display())))
}
