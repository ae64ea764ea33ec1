use std::io::Write;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::{DEVELOP_BRANCH, RELEASE_MANAGER};
use crate::context::AppContext;
use crate::domain::release::{
    ReleaseLogEntry, ReleaseMerge, is_mergeable_milestone, milestone_after, names_look_right,
    parse_release_log,
};
use crate::domain::ticket::{Ticket, TicketChanges, TicketNumber};
use crate::error::{AppError, AppResult, MergeRefusal};
use crate::render::format_commit_message;

const NOTHING_TO_COMMIT: [&str; 2] = ["nothing to commit", "nothing added to commit"];
const MERGE_READY: &str = "All conflicts fixed but you are still merging.";

const UNMERGEABLE_MILESTONES: [&str; 4] = [
    "sage-duplicate/invalid/wontfix",
    "sage-feature",
    "sage-pending",
    "sage-wishlist",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    pub close: bool,
    pub allow_empty: bool,
    pub ignore_dependencies: bool,
    pub ignore_name: bool,
}

#[derive(Debug, Default)]
pub struct MergeSummary {
    pub merged: Vec<TicketNumber>,
    pub failed: Vec<(TicketNumber, AppError)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedTicket {
    pub number: TicketNumber,
    pub previous_status: String,
    pub already_closed: bool,
}

pub async fn print_commit_message(ctx: &AppContext, number: TicketNumber) -> AppResult<String> {
    let ticket = ctx.issue_tracker.get_ticket(number).await?;
    Ok(format_commit_message(&ticket, &ctx.config.server_url))
}

fn refuse(ticket: &Ticket, reason: MergeRefusal) -> AppError {
    AppError::MergeRefused {
        ticket: ticket.number,
        reason,
    }
}

/// Release merges on the first-parent history of `HEAD`, newest first.
async fn release_history(ctx: &AppContext) -> AppResult<Vec<ReleaseLogEntry>> {
    let log = ctx
        .version_control
        .first_parent_log("HEAD", None, RELEASE_MANAGER)
        .await?;
    parse_release_log(&log).map_err(AppError::InvalidBranchState)
}

/// The commit that merged `number` into `HEAD`.
pub async fn find_release_merge_of_ticket(
    ctx: &AppContext,
    number: TicketNumber,
) -> AppResult<ReleaseLogEntry> {
    release_history(ctx)
        .await?
        .into_iter()
        .find(|entry| entry.ticket == number)
        .ok_or(AppError::NotMerged(number))
}

async fn check_mergeable(ctx: &AppContext, ticket: &Ticket, options: MergeOptions) -> AppResult<String> {
    if !options.ignore_dependencies {
        let dependencies = ticket
            .dependency_numbers()
            .map_err(|err| refuse(ticket, MergeRefusal::InvalidDependency(err)))?;
        if !dependencies.is_empty() {
            let merged = release_history(ctx).await?;
            let is_merged = |dep: &TicketNumber| merged.iter().any(|entry| entry.ticket == *dep);
            if let Some(missing) = dependencies.iter().find(|dep| !is_merged(dep)) {
                debug!("ticket not merged: {missing} (dependency of #{})", ticket.number);
                return Err(refuse(
                    ticket,
                    MergeRefusal::DependenciesNotMerged(
                        ticket.dependencies.clone().unwrap_or_default(),
                    ),
                ));
            }
        }
    }
    if !is_mergeable_milestone(&ticket.milestone) {
        return Err(refuse(
            ticket,
            MergeRefusal::InvalidMilestone(ticket.milestone.clone()),
        ));
    }
    let branch = ticket
        .branch
        .clone()
        .ok_or(AppError::MissingBranch(ticket.number))?;
    if !options.ignore_name {
        for names in [&ticket.author, &ticket.reviewer] {
            if !names_look_right(names) {
                return Err(refuse(ticket, MergeRefusal::SuspiciousName(names.clone())));
            }
        }
    }
    Ok(branch)
}

enum MergeState {
    Ready,
    Empty,
    Conflicted(Vec<String>),
}

/// Fetches `branch` and merges it without committing. A conflicted merge is
/// aborted before this returns.
async fn merge_without_commit(ctx: &AppContext, branch: &str) -> AppResult<MergeState> {
    let vc = &ctx.version_control;
    vc.fetch(branch).await?;
    if let Err(err) = vc.merge_fetch_head_no_commit().await {
        // conflicts show up in the status below
        debug!("merge reported: {err}");
    }

    let status = vc.status().await?;
    if NOTHING_TO_COMMIT.iter().any(|marker| status.contains(marker)) {
        return Ok(MergeState::Empty);
    }
    if status.contains(MERGE_READY) {
        return Ok(MergeState::Ready);
    }
    let conflicts = vc.conflicted_files().await?;
    vc.abort_merge().await?;
    Ok(MergeState::Conflicted(conflicts))
}

/// Commits as the release manager. The message lives in a temporary file
/// that is removed when this returns, whichever way it returns.
async fn commit_as_release_manager(ctx: &AppContext, message: &str, allow_empty: bool) -> AppResult<()> {
    let mut file = NamedTempFile::new()?;
    file.write_all(message.as_bytes())?;
    file.flush()?;
    ctx.version_control
        .commit_from_file(file.path(), RELEASE_MANAGER, allow_empty)
        .await
}

/// Creates the release merge commit for one ticket.
pub async fn merge(ctx: &AppContext, number: TicketNumber, options: MergeOptions) -> AppResult<Ticket> {
    let ticket = ctx.issue_tracker.get_ticket(number).await?;
    let branch = check_mergeable(ctx, &ticket, options).await?;
    info!(
        "merging Trac #{number}: {} from {branch} (authors: {}, reviewers: {})",
        ticket.title, ticket.author, ticket.reviewer
    );
    let message = format_commit_message(&ticket, &ctx.config.server_url);

    match merge_without_commit(ctx, &branch).await? {
        MergeState::Ready => commit_as_release_manager(ctx, &message, false).await?,
        MergeState::Empty if options.allow_empty => {
            info!("Trac #{number} is an empty commit");
            commit_as_release_manager(ctx, &message, true).await?;
        }
        MergeState::Empty => return Err(refuse(&ticket, MergeRefusal::AlreadyMerged)),
        MergeState::Conflicted(conflicts) => {
            return Err(refuse(&ticket, MergeRefusal::Conflicts(conflicts)));
        }
    }

    if options.close {
        let changes = TicketChanges::new("")
            .set("status", "closed")
            .set("resolution", "fixed");
        ctx.issue_tracker
            .update_ticket(number, &ticket.timestamp, changes)
            .await?;
    }
    Ok(ticket)
}

/// Merges a ticket for testing with a `TEST Trac #N` commit; no checks on
/// the ticket beyond having a branch.
pub async fn test_merge(ctx: &AppContext, number: TicketNumber) -> AppResult<Ticket> {
    let ticket = ctx.issue_tracker.get_ticket(number).await?;
    let branch = ticket
        .branch
        .clone()
        .ok_or(AppError::MissingBranch(number))?;
    info!("test merging Trac #{number} from {branch}");

    match merge_without_commit(ctx, &branch).await? {
        MergeState::Ready => {
            let message = format!("TEST Trac #{number}: {}", ticket.title);
            commit_as_release_manager(ctx, &message, false).await?;
            Ok(ticket)
        }
        MergeState::Empty => Err(refuse(&ticket, MergeRefusal::AlreadyMerged)),
        MergeState::Conflicted(conflicts) => {
            Err(refuse(&ticket, MergeRefusal::Conflicts(conflicts)))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unmerged {
    pub merge: ReleaseLogEntry,
    pub first_parent: String,
}

/// Drops the release merge of `number` by replaying the later history onto
/// its first parent.
pub async fn unmerge(ctx: &AppContext, number: TicketNumber) -> AppResult<Unmerged> {
    let merge = find_release_merge_of_ticket(ctx, number).await?;
    let parents = ctx.version_control.parents(&merge.sha1).await?;
    let Some(first_parent) = parents.into_iter().next() else {
        return Err(AppError::InvalidBranchState(format!(
            "release merge {} has no parents",
            merge.sha1
        )));
    };
    info!("removing {} Trac #{number}: {}", merge.sha1, merge.title);
    ctx.version_control
        .rebase_onto(&merge.sha1, &first_parent)
        .await?;
    Ok(Unmerged {
        merge,
        first_parent,
    })
}

/// Whether a failed merge should bounce the ticket back to its author.
fn needs_work(err: &AppError) -> bool {
    match err {
        AppError::MergeRefused { reason, .. } => !matches!(
            reason,
            MergeRefusal::DependenciesNotMerged(_) | MergeRefusal::AlreadyMerged
        ),
        AppError::MissingBranch(_) => true,
        _ => false,
    }
}

fn is_merge_failure(err: &AppError) -> bool {
    matches!(err, AppError::MergeRefused { .. } | AppError::MissingBranch(_))
}

async fn describe_history(ctx: &AppContext) -> AppResult<String> {
    ctx.version_control.fetch(DEVELOP_BRANCH).await?;
    ctx.version_control.history_since_fetch_head().await
}

/// Merges tickets one after another; refused merges are collected, not fatal.
pub async fn merge_many(
    ctx: &AppContext,
    tickets: &[TicketNumber],
    options: MergeOptions,
) -> AppResult<MergeSummary> {
    merge_batch(ctx, tickets, options, None).await
}

/// Like `merge_many`, stopping once `limit` tickets went in.
async fn merge_batch(
    ctx: &AppContext,
    tickets: &[TicketNumber],
    options: MergeOptions,
    limit: Option<usize>,
) -> AppResult<MergeSummary> {
    let mut summary = MergeSummary::default();
    for &number in tickets {
        if limit.is_some_and(|limit| summary.merged.len() >= limit) {
            break;
        }
        let err = match merge(ctx, number, options).await {
            Ok(_) => {
                summary.merged.push(number);
                continue;
            }
            Err(err) if is_merge_failure(&err) => err,
            Err(err) => return Err(err),
        };
        if needs_work(&err) {
            let history = describe_history(ctx).await?.replace('\n', "\n\n");
            let comment = format!("Merge failure on top of:\n\n{history}\n\n{err}");
            let ticket = ctx.issue_tracker.get_ticket(number).await?;
            ctx.issue_tracker
                .update_ticket(
                    number,
                    &ticket.timestamp,
                    TicketChanges::new(comment).set("status", "needs_work"),
                )
                .await?;
            warn!("Trac #{number} set to needs_work");
        }
        summary.failed.push((number, err));
    }
    Ok(summary)
}

/// Merges every ticket with positive review, optionally limited to one
/// milestone and to `limit` successful merges.
pub async fn merge_all(
    ctx: &AppContext,
    milestone: Option<&str>,
    limit: Option<usize>,
    options: MergeOptions,
) -> AppResult<(Option<String>, MergeSummary)> {
    let milestone = resolve_milestone(ctx, milestone).await?;
    let tickets = ctx
        .issue_tracker
        .query_tickets(&ready_query(milestone.as_deref()))
        .await?;
    let summary = merge_batch(ctx, &tickets, options, limit).await?;
    Ok((milestone, summary))
}

async fn release_merges(ctx: &AppContext, head: &str, exclude: &str) -> AppResult<Vec<ReleaseMerge>> {
    let log = ctx
        .version_control
        .first_parent_log(head, Some(exclude), RELEASE_MANAGER)
        .await?;
    let entries = parse_release_log(&log).map_err(AppError::InvalidBranchState)?;

    let mut merges = Vec::with_capacity(entries.len());
    for entry in entries {
        let parents = ctx.version_control.parents(&entry.sha1).await?;
        let ticket_commit = match parents.as_slice() {
            [_, ticket_commit] => Some(ticket_commit.clone()),
            // no code on the ticket
            [_] => None,
            _ => {
                return Err(AppError::InvalidBranchState(format!(
                    "release merge {} has {} parents",
                    entry.sha1,
                    parents.len()
                )));
            }
        };
        merges.push(ReleaseMerge {
            merge_commit: entry.sha1,
            ticket_commit,
            ticket: entry.ticket,
        });
    }
    Ok(merges)
}

/// Closes every ticket merged in `head ^exclude`.
pub async fn close(ctx: &AppContext, head: &str, exclude: &str) -> AppResult<Vec<ClosedTicket>> {
    let mut closed = Vec::new();
    for merge in release_merges(ctx, head, exclude).await? {
        let ticket = ctx.issue_tracker.get_ticket(merge.ticket).await?;
        if ticket.is_closed() {
            closed.push(ClosedTicket {
                number: ticket.number,
                previous_status: ticket.status,
                already_closed: true,
            });
            continue;
        }

        let merged_commit = merge.ticket_commit.unwrap_or_default();
        if ticket.commit != merged_commit {
            return Err(AppError::InvalidBranchState(format!(
                "ticket #{} branch changed (merged={merged_commit}, current={})",
                ticket.number, ticket.commit
            )));
        }
        let mut changes = TicketChanges::new("")
            .set("status", "closed")
            .set("resolution", "fixed");
        if !ticket.commit.is_empty() {
            changes = changes.set("branch", ticket.commit.as_str());
        }
        ctx.issue_tracker
            .update_ticket(ticket.number, &ticket.timestamp, changes)
            .await?;
        closed.push(ClosedTicket {
            number: ticket.number,
            previous_status: ticket.status,
            already_closed: false,
        });
    }
    Ok(closed)
}

fn normalize_milestone(milestone: &str) -> String {
    if milestone.starts_with("sage-") {
        milestone.to_string()
    } else {
        format!("sage-{milestone}")
    }
}

/// The milestone after the newest release tag on the first-parent history.
async fn current_milestone(ctx: &AppContext) -> AppResult<String> {
    let tags = ctx.version_control.first_parent_tags().await?;
    tags.iter()
        .find_map(|tag| milestone_after(tag))
        .ok_or_else(|| {
            AppError::InvalidBranchState(
                "current milestone cannot be determined - no release tags".to_string(),
            )
        })
}

/// `current` names the milestone after the newest release; bare versions
/// get the `sage-` prefix.
async fn resolve_milestone(ctx: &AppContext, milestone: Option<&str>) -> AppResult<Option<String>> {
    match milestone {
        None => Ok(None),
        Some("current") => current_milestone(ctx).await.map(Some),
        Some(milestone) => Ok(Some(normalize_milestone(milestone))),
    }
}

fn ready_query(milestone: Option<&str>) -> String {
    let mut params = vec!["status=positive_review".to_string()];
    match milestone {
        Some(milestone) => params.push(format!("milestone={milestone}")),
        None => params.extend(
            UNMERGEABLE_MILESTONES
                .iter()
                .map(|milestone| format!("milestone!={milestone}")),
        ),
    }
    params.join("&")
}

/// Tickets with positive review, optionally limited to one milestone.
pub async fn todo(ctx: &AppContext, milestone: Option<&str>) -> AppResult<(Option<String>, Vec<Ticket>)> {
    let milestone = resolve_milestone(ctx, milestone).await?;
    let numbers = ctx
        .issue_tracker
        .query_tickets(&ready_query(milestone.as_deref()))
        .await?;
    let mut tickets = Vec::with_capacity(numbers.len());
    for number in numbers {
        tickets.push(ctx.issue_tracker.get_ticket(number).await?);
    }
    Ok((milestone, tickets))
}

/// Pushes develop and its release tag.
pub async fn publish(ctx: &AppContext) -> AppResult<String> {
    let tags = ctx.version_control.tags_at_head().await?;
    let [tag] = tags.as_slice() else {
        return Err(AppError::InvalidBranchState(format!(
            "HEAD must carry exactly one release tag, found {}",
            if tags.is_empty() {
                "none".to_string()
            } else {
                tags.join(", ")
            }
        )));
    };
    ctx.version_control.push_tags(DEVELOP_BRANCH).await?;
    Ok(tag.clone())
}
