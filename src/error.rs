use std::fmt;
use std::io;

use thiserror::Error;

use crate::domain::ticket::TicketNumber;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(
        "git returned with non-zero exit code ({exit_code}) when executing \"{command}\"{}",
        indented_output(.stdout, .stderr)
    )]
    CommandFailed {
        exit_code: i32,
        command: String,
        stdout: String,
        stderr: String,
    },
    #[error("unable to determine the ticket number from branch \"{0}\"")]
    TicketNumberUnresolved(String),
    #[error("connection to the trac server failed: {0}")]
    RemoteUnavailable(String),
    #[error("{0}")]
    AuthenticationRequired(AuthFailure),
    #[error("ticket #{0} does not exist")]
    TicketNotFound(TicketNumber),
    #[error("ticket #{0} was modified by someone else; reload it and try again")]
    ConcurrentModification(TicketNumber),
    #[error("invalid repository state: {0}")]
    InvalidBranchState(String),
    #[error("\"Branch:\" field is not set on ticket #{0}")]
    MissingBranch(TicketNumber),
    #[error("release manager has not merged Trac #{0}")]
    NotMerged(TicketNumber),
    #[error("refusing to merge ticket #{ticket}: {reason}")]
    MergeRefused {
        ticket: TicketNumber,
        reason: MergeRefusal,
    },
    #[error("issue tracker error: {0}")]
    IssueTracker(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    MissingCredentials,
    Rejected,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::MissingCredentials => write!(
                f,
                "trac credentials are not configured; run \"git trac config --user <name> --pass <password>\""
            ),
            AuthFailure::Rejected => write!(
                f,
                "the trac server rejected your credentials; check \"git trac config\""
            ),
        }
    }
}

/// Reasons the release manager declines to merge a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeRefusal {
    DependenciesNotMerged(String),
    /// The "Dependencies:" field holds something that is not a ticket.
    InvalidDependency(String),
    InvalidMilestone(String),
    SuspiciousName(String),
    AlreadyMerged,
    Conflicts(Vec<String>),
}

impl fmt::Display for MergeRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeRefusal::DependenciesNotMerged(deps) => {
                write!(f, "ticket dependencies are not all merged: {deps}")
            }
            MergeRefusal::InvalidDependency(message) => write!(f, "{message}"),
            MergeRefusal::InvalidMilestone(milestone) => {
                write!(f, "ticket milestone is not intended to be merged: {milestone}")
            }
            MergeRefusal::SuspiciousName(name) => write!(f, "name {name:?} does not look right"),
            MergeRefusal::AlreadyMerged => write!(f, "already merged"),
            MergeRefusal::Conflicts(files) => {
                write!(f, "merge was not clean: conflicts in {}", files.join(","))
            }
        }
    }
}

fn indented_output(stdout: &str, stderr: &str) -> String {
    let mut out = String::new();
    for (label, text) in [("STDOUT", stdout), ("STDERR", stderr)] {
        for line in text.lines() {
            out.push_str(&format!("\n    {label}: {}", line.trim_end()));
        }
    }
    out
}
