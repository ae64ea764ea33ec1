//! Recording fakes for the service traits.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::{AppConfig, DEFAULT_REMOTE_URL, DEFAULT_SERVER_URL};
use crate::context::AppContext;
use crate::domain::ticket::{Ticket, TicketChanges, TicketNumber};
use crate::error::{AppError, AppResult};
use crate::services::{IssueTrackerService, VersionControlService};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn command_failed(command: &str) -> AppError {
    AppError::CommandFailed {
        exit_code: 1,
        command: command.to_string(),
        stdout: String::new(),
        stderr: "CONFLICT (content): Merge conflict".to_string(),
    }
}

/// In-memory repository; `None` as current branch means detached HEAD.
#[derive(Default)]
pub struct FakeRepository {
    config: Mutex<BTreeMap<String, String>>,
    current_branch: Mutex<Option<String>>,
    local_branches: Mutex<BTreeSet<String>>,
    has_remote: bool,
    status: String,
    conflicts: Vec<String>,
    failing_merge: bool,
    release_log: String,
    parents: BTreeMap<String, Vec<String>>,
    tags: Vec<String>,
    tag_history: Vec<String>,
    ancestry_log: String,
    branch_log: String,
    failing_commit: bool,
    failing_checkout: Option<String>,
    diff: String,
    commit_messages: Mutex<Vec<String>>,
    commit_files: Mutex<Vec<PathBuf>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRepository {
    pub fn with_config(self, key: &str, value: &str) -> Self {
        lock(&self.config).insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_current_branch(self, branch: &str) -> Self {
        *lock(&self.current_branch) = Some(branch.to_string());
        lock(&self.local_branches).insert(branch.to_string());
        self
    }

    pub fn with_local_branch(self, branch: &str) -> Self {
        lock(&self.local_branches).insert(branch.to_string());
        self
    }

    pub fn with_remote(mut self) -> Self {
        self.has_remote = true;
        self
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn with_conflicts(mut self, files: &[&str]) -> Self {
        self.conflicts = files.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Makes `merge FETCH_HEAD` fail.
    pub fn with_failing_merge(mut self) -> Self {
        self.failing_merge = true;
        self
    }

    pub fn with_release_log(mut self, log: &str) -> Self {
        self.release_log = log.to_string();
        self
    }

    pub fn with_parents(mut self, commit: &str, parents: &[&str]) -> Self {
        self.parents.insert(
            commit.to_string(),
            parents.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Tags reachable along the first-parent history, newest first.
    pub fn with_tag_history(mut self, tags: &[&str]) -> Self {
        self.tag_history = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_ancestry_log(mut self, log: &str) -> Self {
        self.ancestry_log = log.to_string();
        self
    }

    pub fn with_branch_log(mut self, log: &str) -> Self {
        self.branch_log = log.to_string();
        self
    }

    /// Makes `commit` fail after the message file was read.
    pub fn with_failing_commit(mut self) -> Self {
        self.failing_commit = true;
        self
    }

    /// Makes checking out `branch` fail.
    pub fn with_failing_checkout(mut self, branch: &str) -> Self {
        self.failing_checkout = Some(branch.to_string());
        self
    }

    pub fn with_diff(mut self, diff: &str) -> Self {
        self.diff = diff.to_string();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn config_value(&self, key: &str) -> Option<String> {
        lock(&self.config).get(key).cloned()
    }

    pub fn head(&self) -> Option<String> {
        lock(&self.current_branch).clone()
    }

    pub fn commit_messages(&self) -> Vec<String> {
        lock(&self.commit_messages).clone()
    }

    pub fn commit_files(&self) -> Vec<PathBuf> {
        lock(&self.commit_files).clone()
    }

    fn record(&self, call: impl Into<String>) {
        lock(&self.calls).push(call.into());
    }
}

#[async_trait]
impl VersionControlService for FakeRepository {
    async fn current_branch(&self) -> AppResult<String> {
        self.head().ok_or_else(|| {
            AppError::InvalidBranchState("unexpectedly, git is in a detached HEAD state".to_string())
        })
    }

    async fn has_local_branch(&self, branch: &str) -> AppResult<bool> {
        Ok(lock(&self.local_branches).contains(branch))
    }

    async fn checkout(&self, branch: &str) -> AppResult<()> {
        self.record(format!("checkout {branch}"));
        if self.failing_checkout.as_deref() == Some(branch) {
            return Err(AppError::CommandFailed {
                exit_code: 1,
                command: format!("git checkout {branch}"),
                stdout: String::new(),
                stderr: "error: Your local changes would be overwritten by checkout".to_string(),
            });
        }
        *lock(&self.current_branch) = Some(branch.to_string());
        Ok(())
    }

    async fn checkout_detached(&self, rev: &str) -> AppResult<()> {
        self.record(format!("checkout --detach {rev}"));
        *lock(&self.current_branch) = None;
        Ok(())
    }

    async fn fetch(&self, remote_branch: &str) -> AppResult<()> {
        self.record(format!("fetch {remote_branch}"));
        Ok(())
    }

    async fn branch_from_fetch_head(&self, local_branch: &str) -> AppResult<()> {
        self.record(format!("branch {local_branch} FETCH_HEAD"));
        lock(&self.local_branches).insert(local_branch.to_string());
        Ok(())
    }

    async fn merge_fetch_head(&self) -> AppResult<()> {
        self.record("merge FETCH_HEAD");
        if self.failing_merge {
            return Err(command_failed("git merge FETCH_HEAD"));
        }
        Ok(())
    }

    async fn push(&self, remote_branch: &str, force: bool) -> AppResult<()> {
        let force = if force { " --force" } else { "" };
        self.record(format!("push{force} HEAD:refs/heads/{remote_branch}"));
        Ok(())
    }

    async fn set_upstream(&self, remote_branch: &str) -> AppResult<()> {
        self.record(format!("upstream {remote_branch}"));
        Ok(())
    }

    async fn diff_to_fetch_head(&self) -> AppResult<String> {
        self.record("diff FETCH_HEAD..HEAD");
        Ok(self.diff.clone())
    }

    async fn ensure_remote(&self, url: &str) -> AppResult<bool> {
        if self.has_remote {
            return Ok(false);
        }
        self.record(format!("remote add trac {url}"));
        Ok(true)
    }

    async fn config_get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.config_value(key))
    }

    async fn config_set(&self, key: &str, value: &str) -> AppResult<()> {
        self.record(format!("config {key}"));
        lock(&self.config).insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn merge_fetch_head_no_commit(&self) -> AppResult<()> {
        self.record("merge --no-ff --no-commit FETCH_HEAD");
        if !self.conflicts.is_empty() {
            return Err(command_failed("git merge --no-ff --no-commit FETCH_HEAD"));
        }
        Ok(())
    }

    async fn status(&self) -> AppResult<String> {
        Ok(self.status.clone())
    }

    async fn conflicted_files(&self) -> AppResult<Vec<String>> {
        Ok(self.conflicts.clone())
    }

    async fn abort_merge(&self) -> AppResult<()> {
        self.record("merge --abort");
        Ok(())
    }

    async fn commit_from_file(
        &self,
        message_file: &Path,
        author: &str,
        allow_empty: bool,
    ) -> AppResult<()> {
        let message = std::fs::read_to_string(message_file)?;
        let empty = if allow_empty { " --allow-empty" } else { "" };
        self.record(format!("commit --author={author}{empty}"));
        lock(&self.commit_files).push(message_file.to_path_buf());
        if self.failing_commit {
            return Err(AppError::CommandFailed {
                exit_code: 1,
                command: "git commit".to_string(),
                stdout: String::new(),
                stderr: "error: unable to write new index file".to_string(),
            });
        }
        lock(&self.commit_messages).push(message);
        Ok(())
    }

    async fn first_parent_log(
        &self,
        head: &str,
        exclude: Option<&str>,
        _author: &str,
    ) -> AppResult<String> {
        self.record(format!("log {head} ^{}", exclude.unwrap_or("")));
        Ok(self.release_log.clone())
    }

    async fn history_since_fetch_head(&self) -> AppResult<String> {
        Ok("abc1234 Trac #1: earlier merge\n".to_string())
    }

    async fn parents(&self, commit: &str) -> AppResult<Vec<String>> {
        Ok(self.parents.get(commit).cloned().unwrap_or_default())
    }

    async fn tags_at_head(&self) -> AppResult<Vec<String>> {
        Ok(self.tags.clone())
    }

    async fn first_parent_tags(&self) -> AppResult<Vec<String>> {
        Ok(self.tag_history.clone())
    }

    async fn push_tags(&self, branch: &str) -> AppResult<()> {
        self.record(format!("push --tags trac {branch}"));
        Ok(())
    }

    async fn ancestry_log(&self, commit: &str) -> AppResult<String> {
        self.record(format!("log --ancestry-path HEAD ^{commit}"));
        Ok(self.ancestry_log.clone())
    }

    async fn merged_branch_log(&self, merge_commit: &str, oneline: bool) -> AppResult<String> {
        let oneline = if oneline { " --oneline" } else { "" };
        self.record(format!("log{oneline} {merge_commit}^1..{merge_commit}^2"));
        Ok(self.branch_log.clone())
    }

    async fn rebase_onto(&self, upstream: &str, onto: &str) -> AppResult<()> {
        self.record(format!("rebase --onto {onto} {upstream}"));
        Ok(())
    }
}

/// In-memory trac with timestamp checking on updates.
#[derive(Default)]
pub struct FakeTracker {
    tickets: Mutex<BTreeMap<TicketNumber, Ticket>>,
    branches: BTreeMap<String, TicketNumber>,
    lookup_failure: Option<fn() -> AppError>,
    query_results: Vec<TicketNumber>,
    queries: Mutex<Vec<String>>,
    created: Mutex<Vec<(String, String)>>,
    updates: Mutex<Vec<(TicketNumber, TicketChanges)>>,
    lookups: Mutex<Vec<String>>,
}

impl FakeTracker {
    pub fn with_ticket(self, ticket: Ticket) -> Self {
        lock(&self.tickets).insert(ticket.number, ticket);
        self
    }

    pub fn with_branch(mut self, branch: &str, number: TicketNumber) -> Self {
        self.branches.insert(branch.to_string(), number);
        self
    }

    /// Every `find_ticket_by_branch` call fails with `failure()`.
    pub fn with_lookup_failure(mut self, failure: fn() -> AppError) -> Self {
        self.lookup_failure = Some(failure);
        self
    }

    pub fn with_query_results(mut self, numbers: &[TicketNumber]) -> Self {
        self.query_results = numbers.to_vec();
        self
    }

    pub fn ticket(&self, number: TicketNumber) -> Option<Ticket> {
        lock(&self.tickets).get(&number).cloned()
    }

    pub fn updates(&self) -> Vec<(TicketNumber, TicketChanges)> {
        lock(&self.updates).clone()
    }

    pub fn created(&self) -> Vec<(String, String)> {
        lock(&self.created).clone()
    }

    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }

    pub fn lookups(&self) -> Vec<String> {
        lock(&self.lookups).clone()
    }
}

#[async_trait]
impl IssueTrackerService for FakeTracker {
    async fn get_ticket(&self, number: TicketNumber) -> AppResult<Ticket> {
        self.ticket(number).ok_or(AppError::TicketNotFound(number))
    }

    async fn find_ticket_by_branch(&self, branch: &str) -> AppResult<Option<TicketNumber>> {
        lock(&self.lookups).push(branch.to_string());
        if let Some(failure) = self.lookup_failure {
            return Err(failure());
        }
        Ok(self.branches.get(branch).copied())
    }

    async fn update_ticket(
        &self,
        number: TicketNumber,
        expected_timestamp: &str,
        changes: TicketChanges,
    ) -> AppResult<()> {
        let mut tickets = lock(&self.tickets);
        let ticket = tickets
            .get_mut(&number)
            .ok_or(AppError::TicketNotFound(number))?;
        if ticket.timestamp != expected_timestamp {
            return Err(AppError::ConcurrentModification(number));
        }
        for (field, value) in &changes.fields {
            match field.as_str() {
                "branch" => ticket.branch = Some(value.clone()),
                "status" => ticket.status = value.clone(),
                "commit" => ticket.commit = value.clone(),
                _ => {}
            }
        }
        let next = ticket.timestamp.parse::<u64>().unwrap_or(0) + 1;
        ticket.timestamp = next.to_string();
        lock(&self.updates).push((number, changes));
        Ok(())
    }

    async fn create_ticket(&self, summary: &str, description: &str) -> AppResult<TicketNumber> {
        let mut created = lock(&self.created);
        created.push((summary.to_string(), description.to_string()));
        let number = 1000 + created.len() as TicketNumber;
        lock(&self.tickets).insert(number, ticket(number, summary));
        Ok(number)
    }

    async fn query_tickets(&self, query: &str) -> AppResult<Vec<TicketNumber>> {
        lock(&self.queries).push(query.to_string());
        Ok(self.query_results.clone())
    }
}

/// A ticket with a title, timestamp `"1"` and the stated branch-less defaults.
pub fn ticket(number: TicketNumber, title: &str) -> Ticket {
    let fields = BTreeMap::from([
        ("summary".to_string(), title.to_string()),
        ("description".to_string(), format!("Description of {title}")),
        ("_ts".to_string(), "1".to_string()),
        ("status".to_string(), "new".to_string()),
    ]);
    Ticket::from_fields(number, None, None, &fields)
}

pub fn config() -> AppConfig {
    AppConfig {
        username: Some("alice".to_string()),
        password: Some("secret".to_string()),
        server_url: DEFAULT_SERVER_URL.to_string(),
        remote_url: DEFAULT_REMOTE_URL.to_string(),
    }
}

pub struct Harness {
    pub ctx: AppContext,
    pub repo: Arc<FakeRepository>,
    pub tracker: Arc<FakeTracker>,
}

pub fn harness(repo: FakeRepository, tracker: FakeTracker) -> Harness {
    let repo = Arc::new(repo);
    let tracker = Arc::new(tracker);
    let ctx = AppContext::new(config(), repo.clone(), tracker.clone());
    Harness { ctx, repo, tracker }
}
