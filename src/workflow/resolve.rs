use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::context::AppContext;
use crate::domain::ticket::TicketNumber;
use crate::error::{AppError, AppResult};

// at least two digits, delimited on the left and followed by a delimiter or the end
static TICKET_IN_BRANCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-_/]([0-9]{2,})(?:[-_/]|$)").expect("invalid ticket pattern regex")
});

/// Determines the ticket a command refers to.
///
/// A positive integer is taken literally. Otherwise the input (or the
/// current branch when there is none) is looked up on trac by its
/// "Branch:" field, and finally matched against the conventional
/// `t/<number>/...` naming. An unreachable server is not fatal since the
/// naming convention still works offline.
pub async fn resolve_ticket_number(
    ctx: &AppContext,
    input: Option<&str>,
) -> AppResult<TicketNumber> {
    let input = input.map(str::trim).filter(|value| !value.is_empty());

    if let Some(number) = input
        .and_then(|value| value.parse::<TicketNumber>().ok())
        .filter(|number| *number > 0)
    {
        return Ok(number);
    }

    let candidate = match input {
        Some(value) => value.to_string(),
        None => ctx.version_control.current_branch().await?,
    };

    match ctx.issue_tracker.find_ticket_by_branch(&candidate).await {
        Ok(Some(number)) => {
            debug!("branch {candidate} is attached to ticket #{number}");
            return Ok(number);
        }
        Ok(None) => debug!("no ticket has branch {candidate}"),
        Err(AppError::RemoteUnavailable(reason)) => {
            warn!("could not search trac for branch {candidate}: {reason}");
        }
        Err(err) => return Err(err),
    }

    ticket_from_branch_name(&candidate).ok_or(AppError::TicketNumberUnresolved(candidate))
}

fn ticket_from_branch_name(branch: &str) -> Option<TicketNumber> {
    TICKET_IN_BRANCH
        .captures(branch)
        .and_then(|caps| caps[1].parse().ok())
}
