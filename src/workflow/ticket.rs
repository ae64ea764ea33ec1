use std::fmt;
use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::config::{DEVELOP_BRANCH, PASSWORD_KEY, RELEASE_MANAGER, USERNAME_KEY};
use crate::context::AppContext;
use crate::domain::branch::{
    BranchName, is_pushable_by, local_branch_for, looks_like_remote_branch, remote_branch_for,
    title_to_branch_name,
};
use crate::domain::release::{ReleaseLocation, locate_release, parse_commit_records};
use crate::domain::ticket::{Ticket, TicketChanges, TicketNumber};
use crate::error::{AppError, AppResult};
use crate::workflow::release::find_release_merge_of_ticket;
use crate::workflow::resolve::resolve_ticket_number;

/// Command argument naming either a ticket or a branch on the trac remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketOrBranch {
    Ticket(TicketNumber),
    Branch(String),
}

/// Strictly positive decimal ticket number.
pub fn parse_ticket_number(value: &str) -> Result<TicketNumber, String> {
    match value.parse::<TicketNumber>() {
        Ok(0) => Err("ticket numbers start at 1".to_string()),
        Ok(number) => Ok(number),
        Err(err) => Err(format!("{value:?} is not a ticket number: {err}")),
    }
}

impl FromStr for TicketOrBranch {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Ok(number) = parse_ticket_number(value) {
            return Ok(TicketOrBranch::Ticket(number));
        }
        if looks_like_remote_branch(value) {
            return Ok(TicketOrBranch::Branch(value.to_string()));
        }
        Err(format!(
            "{value:?} is not a valid ticket number or remote branch name"
        ))
    }
}

impl fmt::Display for TicketOrBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketOrBranch::Ticket(number) => write!(f, "#{number}"),
            TicketOrBranch::Branch(branch) => f.write_str(branch),
        }
    }
}

pub struct CheckoutOutcome {
    pub ticket: Option<TicketNumber>,
    pub local: BranchName,
    pub remote: String,
    pub already_existed: bool,
}

pub struct PushOutcome {
    pub ticket: TicketNumber,
    pub remote: String,
    pub branch_field_updated: bool,
}

pub struct TryOutcome {
    pub previous_branch: String,
    pub remote: String,
}

pub struct Dependencies {
    pub ticket: Ticket,
    pub dependencies: Vec<Ticket>,
}

pub struct SearchOutcome {
    pub branch: String,
    pub ticket: Option<TicketNumber>,
}

pub struct ConfigSummary {
    pub remote_added: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub server_url: String,
    pub remote_url: String,
}

async fn ticket_or_current(ctx: &AppContext, ticket: Option<TicketNumber>) -> AppResult<TicketNumber> {
    match ticket {
        Some(number) => Ok(number),
        None => resolve_ticket_number(ctx, None).await,
    }
}

async fn ticket_branch(ctx: &AppContext, number: TicketNumber) -> AppResult<String> {
    ctx.issue_tracker
        .get_ticket(number)
        .await?
        .branch
        .ok_or(AppError::MissingBranch(number))
}

/// Remote branch named directly, or the branch attached to the ticket.
async fn remote_branch_of(ctx: &AppContext, target: Option<&TicketOrBranch>) -> AppResult<String> {
    match target {
        Some(TicketOrBranch::Branch(branch)) => Ok(branch.clone()),
        Some(TicketOrBranch::Ticket(number)) => ticket_branch(ctx, *number).await,
        None => {
            let number = resolve_ticket_number(ctx, None).await?;
            ticket_branch(ctx, number).await
        }
    }
}

/// Opens a ticket and starts a local branch for it on top of develop.
pub async fn create(
    ctx: &AppContext,
    summary: &str,
    branch_override: Option<&str>,
) -> AppResult<CheckoutOutcome> {
    let username = ctx.config.require_username()?;
    let number = ctx.issue_tracker.create_ticket(summary, "").await?;
    info!("created ticket #{number}");

    let template = branch_override
        .map(str::to_string)
        .unwrap_or_else(|| title_to_branch_name(summary));
    let remote = remote_branch_for(&template, username);
    let local = local_branch_for(number, remote.as_str());

    let vc = &ctx.version_control;
    vc.fetch(DEVELOP_BRANCH).await?;
    vc.branch_from_fetch_head(local.as_str()).await?;
    vc.checkout(local.as_str()).await?;
    vc.set_upstream(remote.as_str()).await?;

    Ok(CheckoutOutcome {
        ticket: Some(number),
        local,
        remote: remote.0,
        already_existed: false,
    })
}

pub async fn checkout(
    ctx: &AppContext,
    target: &TicketOrBranch,
    local_override: Option<&str>,
) -> AppResult<CheckoutOutcome> {
    let (ticket, remote) = match target {
        TicketOrBranch::Ticket(number) => (Some(*number), ticket_branch(ctx, *number).await?),
        TicketOrBranch::Branch(branch) => (
            ctx.issue_tracker.find_ticket_by_branch(branch).await?,
            branch.clone(),
        ),
    };
    let local = match (local_override, ticket) {
        (Some(name), _) => BranchName(name.to_string()),
        (None, Some(number)) => local_branch_for(number, &remote),
        (None, None) => BranchName(remote.clone()),
    };

    let vc = &ctx.version_control;
    let already_existed = vc.has_local_branch(local.as_str()).await?;
    if already_existed {
        debug!("local branch {local} exists, not fetching");
        vc.checkout(local.as_str()).await?;
    } else {
        debug!("downloading branch {remote}");
        vc.fetch(&remote).await?;
        vc.branch_from_fetch_head(local.as_str()).await?;
        vc.checkout(local.as_str()).await?;
        vc.set_upstream(&remote).await?;
    }

    Ok(CheckoutOutcome {
        ticket,
        local,
        remote,
        already_existed,
    })
}

pub async fn fetch(ctx: &AppContext, target: Option<&TicketOrBranch>) -> AppResult<String> {
    let remote = remote_branch_of(ctx, target).await?;
    ctx.version_control.fetch(&remote).await?;
    Ok(remote)
}

pub async fn pull(ctx: &AppContext, target: Option<&TicketOrBranch>) -> AppResult<String> {
    let remote = fetch(ctx, target).await?;
    ctx.version_control.merge_fetch_head().await?;
    Ok(remote)
}

/// Uploads HEAD and points the ticket's "Branch:" field at it.
pub async fn push(
    ctx: &AppContext,
    ticket: Option<TicketNumber>,
    remote_override: Option<&str>,
    force: bool,
) -> AppResult<PushOutcome> {
    let username = ctx.config.require_username()?;
    let number = ticket_or_current(ctx, ticket).await?;
    let ticket = ctx.issue_tracker.get_ticket(number).await?;

    let remote = match (remote_override, ticket.branch.as_deref()) {
        (Some(remote), _) => remote.to_string(),
        (None, Some(branch)) if is_pushable_by(branch, username) => branch.to_string(),
        (None, _) => {
            let current = ctx.version_control.current_branch().await?;
            remote_branch_for(&current, username).0
        }
    };

    let vc = &ctx.version_control;
    vc.push(&remote, force).await?;
    vc.set_upstream(&remote).await?;

    let branch_field_updated = ticket.branch.as_deref() != Some(remote.as_str());
    if branch_field_updated {
        if let Some(previous) = &ticket.branch {
            warn!("replacing branch {previous} on ticket #{number}");
        }
        let changes = TicketChanges::new("").set("branch", remote.as_str());
        ctx.issue_tracker
            .update_ticket(number, &ticket.timestamp, changes)
            .await?;
    }

    Ok(PushOutcome {
        ticket: number,
        remote,
        branch_field_updated,
    })
}

pub async fn print(ctx: &AppContext, ticket: Option<TicketNumber>) -> AppResult<Ticket> {
    let number = ticket_or_current(ctx, ticket).await?;
    ctx.issue_tracker.get_ticket(number).await
}

pub async fn depends(ctx: &AppContext, ticket: Option<TicketNumber>) -> AppResult<Dependencies> {
    let ticket = print(ctx, ticket).await?;
    let numbers = ticket
        .dependency_numbers()
        .map_err(|err| AppError::IssueTracker(format!("ticket #{}: {err}", ticket.number)))?;
    let mut dependencies = Vec::with_capacity(numbers.len());
    for number in numbers {
        dependencies.push(ctx.issue_tracker.get_ticket(number).await?);
    }
    Ok(Dependencies {
        ticket,
        dependencies,
    })
}

pub async fn search(ctx: &AppContext, branch: Option<&str>) -> AppResult<SearchOutcome> {
    let branch = match branch {
        Some(branch) => branch.to_string(),
        None => ctx.version_control.current_branch().await?,
    };
    let ticket = ctx.issue_tracker.find_ticket_by_branch(&branch).await?;
    Ok(SearchOutcome { branch, ticket })
}

/// URL of the ticket page.
pub async fn browse(ctx: &AppContext, ticket: Option<TicketNumber>) -> AppResult<String> {
    let number = ticket_or_current(ctx, ticket).await?;
    Ok(ctx.config.ticket_url(number))
}

/// Merges the remote branch into a detached checkout of develop.
///
/// A failed merge switches back to the branch that was checked out before.
pub async fn try_out(ctx: &AppContext, target: &TicketOrBranch) -> AppResult<TryOutcome> {
    let remote = remote_branch_of(ctx, Some(target)).await?;
    let vc = &ctx.version_control;
    let previous_branch = vc.current_branch().await?;

    vc.fetch(DEVELOP_BRANCH).await?;
    vc.checkout_detached("FETCH_HEAD").await?;
    let merged = async {
        vc.fetch(&remote).await?;
        vc.merge_fetch_head().await
    }
    .await;
    if let Err(err) = merged {
        return restore_branch(ctx, &previous_branch, Err(err)).await;
    }

    Ok(TryOutcome {
        previous_branch,
        remote,
    })
}

/// Diff of the ticket branch against develop, computed on a detached merge.
pub async fn review(ctx: &AppContext, ticket: Option<TicketNumber>) -> AppResult<String> {
    let number = ticket_or_current(ctx, ticket).await?;
    let remote = ticket_branch(ctx, number).await?;
    let vc = &ctx.version_control;
    let previous_branch = vc.current_branch().await?;

    let diff = async {
        vc.fetch(&remote).await?;
        vc.checkout_detached("FETCH_HEAD").await?;
        vc.fetch(DEVELOP_BRANCH).await?;
        vc.merge_fetch_head().await?;
        vc.diff_to_fetch_head().await
    }
    .await;
    restore_branch(ctx, &previous_branch, diff).await
}

/// Checks `branch` out again after `result`. When both fail, the restore
/// failure is logged and the original error is returned.
async fn restore_branch<T>(ctx: &AppContext, branch: &str, result: AppResult<T>) -> AppResult<T> {
    match (result, ctx.version_control.checkout(branch).await) {
        (result, Ok(())) => result,
        (Ok(_), Err(restore_err)) => Err(restore_err),
        (Err(err), Err(restore_err)) => {
            warn!("could not return to {branch}: {restore_err}");
            Err(err)
        }
    }
}

/// Where a commit entered the history of `HEAD`: the release merge that
/// brought it in and the first release after that.
pub async fn find(ctx: &AppContext, commit: &str) -> AppResult<ReleaseLocation> {
    let log = ctx.version_control.ancestry_log(commit).await?;
    Ok(locate_release(parse_commit_records(&log), RELEASE_MANAGER))
}

/// Log of the commits that the release merge of `number` brought in.
pub async fn log(ctx: &AppContext, number: TicketNumber, oneline: bool) -> AppResult<String> {
    let merge = find_release_merge_of_ticket(ctx, number).await?;
    let parents = ctx.version_control.parents(&merge.sha1).await?;
    if parents.len() != 2 {
        return Err(AppError::InvalidBranchState(format!(
            "release merge {} of Trac #{number} has {} parents",
            merge.sha1,
            parents.len()
        )));
    }
    ctx.version_control
        .merged_branch_log(&merge.sha1, oneline)
        .await
}

/// Adds the trac remote if needed and stores credentials in git config.
pub async fn configure(
    ctx: &AppContext,
    username: Option<&str>,
    password: Option<&str>,
) -> AppResult<ConfigSummary> {
    let vc = &ctx.version_control;
    let remote_added = vc.ensure_remote(&ctx.config.remote_url).await?;
    if remote_added {
        info!("added remote trac -> {}", ctx.config.remote_url);
    }
    if let Some(username) = username {
        vc.config_set(USERNAME_KEY, username).await?;
    }
    if let Some(password) = password {
        vc.config_set(PASSWORD_KEY, password).await?;
    }

    Ok(ConfigSummary {
        remote_added,
        username: username.map(str::to_string).or_else(|| ctx.config.username.clone()),
        password: password.map(str::to_string).or_else(|| ctx.config.password.clone()),
        server_url: ctx.config.server_url.clone(),
        remote_url: ctx.config.remote_url.clone(),
    })
}
