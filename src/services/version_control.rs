use std::path::Path;

use async_trait::async_trait;

use crate::error::AppResult;

/// Repository operations the workflows need, phrased in terms of the
/// `trac` remote.
#[async_trait]
pub trait VersionControlService: Send + Sync {
    /// Fails with `InvalidBranchState` on a detached HEAD.
    async fn current_branch(&self) -> AppResult<String>;
    async fn has_local_branch(&self, branch: &str) -> AppResult<bool>;
    async fn checkout(&self, branch: &str) -> AppResult<()>;
    async fn checkout_detached(&self, rev: &str) -> AppResult<()>;

    /// Fetch `remote_branch` from the trac remote into `FETCH_HEAD`.
    async fn fetch(&self, remote_branch: &str) -> AppResult<()>;
    async fn branch_from_fetch_head(&self, local_branch: &str) -> AppResult<()>;
    async fn merge_fetch_head(&self) -> AppResult<()>;
    async fn push(&self, remote_branch: &str, force: bool) -> AppResult<()>;
    /// Make the current branch track `remote_branch` on the trac remote.
    async fn set_upstream(&self, remote_branch: &str) -> AppResult<()>;
    async fn diff_to_fetch_head(&self) -> AppResult<String>;

    /// Adds the trac remote when missing; returns whether it was added.
    async fn ensure_remote(&self, url: &str) -> AppResult<bool>;
    async fn config_get(&self, key: &str) -> AppResult<Option<String>>;
    async fn config_set(&self, key: &str, value: &str) -> AppResult<()>;

    async fn merge_fetch_head_no_commit(&self) -> AppResult<()>;
    async fn status(&self) -> AppResult<String>;
    async fn conflicted_files(&self) -> AppResult<Vec<String>>;
    async fn abort_merge(&self) -> AppResult<()>;
    async fn commit_from_file(&self, message_file: &Path, author: &str, allow_empty: bool)
    -> AppResult<()>;
    /// First-parent `--oneline` log of commits by `author` in `head ^exclude`.
    async fn first_parent_log(
        &self,
        head: &str,
        exclude: Option<&str>,
        author: &str,
    ) -> AppResult<String>;
    /// Commits on the current branch since the fetched develop head.
    async fn history_since_fetch_head(&self) -> AppResult<String>;
    async fn parents(&self, commit: &str) -> AppResult<Vec<String>>;
    async fn tags_at_head(&self) -> AppResult<Vec<String>>;
    /// Tags on the first-parent history of `HEAD`, newest first.
    async fn first_parent_tags(&self) -> AppResult<Vec<String>>;
    async fn push_tags(&self, branch: &str) -> AppResult<()>;

    /// NUL separated `hash, author, subject` records of the commits between
    /// `commit` and `HEAD` on the ancestry path, oldest first.
    async fn ancestry_log(&self, commit: &str) -> AppResult<String>;
    /// Log of the ticket commits a release merge brought in.
    async fn merged_branch_log(&self, merge_commit: &str, oneline: bool) -> AppResult<String>;
    /// Replays the commits after `upstream` onto `onto`, keeping merges.
    async fn rebase_onto(&self, upstream: &str, onto: &str) -> AppResult<()>;
}
