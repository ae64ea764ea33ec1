use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::ticket::TicketNumber;

static LOCAL_TICKET_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:t|ticket)/[0-9]+/").expect("invalid local prefix regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchName(pub String);

impl BranchName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote branch the user should push `template` to.
///
/// Local `t/<n>/` and `ticket/<n>/` prefixes are dropped, `public/` and the
/// user's own `u/<username>/` namespace are kept, another user's namespace
/// is re-homed and anything else is placed under `u/<username>/`.
pub fn remote_branch_for(template: &str, username: &str) -> BranchName {
    let stripped = LOCAL_TICKET_PREFIX.replace(template, "");
    let name: &str = &stripped;

    if name.starts_with("public/") {
        return BranchName(name.to_string());
    }
    let own_prefix = format!("u/{username}/");
    if name.starts_with(&own_prefix) {
        return BranchName(name.to_string());
    }
    if let Some(rest) = name.strip_prefix("u/") {
        // "u/<name>" without a path falls through and is treated as a plain name
        if let Some((_other, path)) = rest.split_once('/') {
            return BranchName(format!("{own_prefix}{path}"));
        }
    }
    BranchName(format!("{own_prefix}{name}"))
}

/// Local `t/<ticket>/...` branch tracking `remote_branch`.
pub fn local_branch_for(ticket: TicketNumber, remote_branch: &str) -> BranchName {
    let remainder = remote_branch
        .strip_prefix("u/")
        .and_then(|rest| rest.split_once('/'))
        .map(|(_user, path)| path)
        .unwrap_or(remote_branch);
    BranchName(format!("t/{ticket}/{remainder}"))
}

/// Branch name synthesized from a ticket title.
pub fn title_to_branch_name(title: &str) -> String {
    title
        .to_lowercase()
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn is_pushable_by(branch: &str, username: &str) -> bool {
    branch.starts_with("public/") || branch.starts_with(&format!("u/{username}/"))
}

/// Whether `name` is shaped like a branch on the shared repository.
pub fn looks_like_remote_branch(name: &str) -> bool {
    name.starts_with("u/") || name.starts_with("public/") || matches!(name, "master" | "develop")
}
