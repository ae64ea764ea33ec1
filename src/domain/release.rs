use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::domain::ticket::TicketNumber;

static RELEASE_LOG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<sha1>[0-9a-f]{40}) Trac #(?P<ticket>[0-9]*): (?P<title>.*)")
        .expect("invalid release log regex")
});

static MERGEABLE_MILESTONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sage-[0-9]*\.[0-9.]*").expect("invalid milestone regex"));

static VERSION_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<version>(?P<major>[0-9]+)\.(?P<minor>[0-9]+)(?:\.(?P<patch>[0-9]+))?)(?P<devel>\.(?:b|beta|rc))?",
    )
    .expect("invalid version tag regex")
});

/// One first-parent commit made by the release manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseLogEntry {
    pub sha1: String,
    pub ticket: TicketNumber,
    pub title: String,
}

/// A release merge together with the tip of the merged ticket branch.
///
/// `ticket_commit` is `None` when the merge carried no code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseMerge {
    pub merge_commit: String,
    pub ticket_commit: Option<String>,
    pub ticket: TicketNumber,
}

/// Parses `git log --oneline --no-abbrev-commit` output of release merges.
pub fn parse_release_log(log: &str) -> Result<Vec<ReleaseLogEntry>, String> {
    log.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let caps = RELEASE_LOG_LINE
                .captures(line)
                .ok_or_else(|| format!("parsing log failed at \"{line}\""))?;
            let ticket = caps["ticket"].parse::<TicketNumber>().map_err(|_| {
                format!("failed to convert ticket number to integer: \"{line}\"")
            })?;
            Ok(ReleaseLogEntry {
                sha1: caps["sha1"].to_string(),
                ticket,
                title: caps["title"].to_string(),
            })
        })
        .collect()
}

/// A commit as printed by `log --format=%H%n%an <%ae>%n%s -z`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub sha1: String,
    pub author: String,
    pub title: String,
}

/// Where a commit entered the history of `HEAD`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseLocation {
    /// The release manager's merge that brought the commit in.
    pub merge: Option<CommitSummary>,
    /// The first release made after that merge.
    pub release: Option<CommitSummary>,
}

/// Parses NUL separated commit records, oldest first. Parsing stops at the
/// first record that does not have three lines.
pub fn parse_commit_records(log: &str) -> Vec<CommitSummary> {
    let mut commits = Vec::new();
    for record in log.split('\0').map(|record| record.trim_matches('\n')) {
        if record.is_empty() {
            continue;
        }
        let lines: Vec<&str> = record.split('\n').collect();
        let [sha1, author, title] = lines.as_slice() else {
            warn!("cannot parse log output: {record}");
            break;
        };
        commits.push(CommitSummary {
            sha1: sha1.to_string(),
            author: author.to_string(),
            title: title.to_string(),
        });
    }
    commits
}

/// Walks forward from a commit: the first commit by `release_manager` is the
/// release merge, the next commit after it that is not a ticket merge is the
/// release.
pub fn locate_release(commits: Vec<CommitSummary>, release_manager: &str) -> ReleaseLocation {
    let mut location = ReleaseLocation::default();
    for commit in commits {
        if location.merge.is_none() {
            if commit.author == release_manager {
                location.merge = Some(commit);
            }
        } else if !commit.title.starts_with("Trac #") {
            location.release = Some(commit);
            break;
        }
    }
    location
}

/// Tags on first-parent history from `log --format=%H%x09%D`, newest first.
pub fn parse_tag_decorations(log: &str) -> Result<Vec<String>, String> {
    let mut tags = Vec::new();
    for line in log.lines() {
        let Some((sha1, decorations)) = line.split_once('\t') else {
            continue;
        };
        let on_commit: Vec<&str> = decorations
            .split(", ")
            .filter_map(|decoration| decoration.strip_prefix("tag: "))
            .collect();
        match on_commit.as_slice() {
            [] => {}
            [tag] => tags.push(tag.to_string()),
            _ => return Err(format!("multiple tags for commit {sha1}")),
        }
    }
    Ok(tags)
}

/// Milestone of the next release after the version tag `tag`.
///
/// A development tag (`9.2.beta3`) belongs to its own milestone, a final
/// release bumps its last component.
pub fn milestone_after(tag: &str) -> Option<String> {
    let caps = VERSION_TAG.captures(tag)?;
    if caps.name("devel").is_some() {
        return Some(format!("sage-{}", &caps["version"]));
    }
    let (major, minor) = (&caps["major"], &caps["minor"]);
    if let Some(patch) = caps.name("patch") {
        let next = patch.as_str().parse::<u64>().ok()? + 1;
        return Some(format!("sage-{major}.{minor}.{next}"));
    }
    let next = minor.parse::<u64>().ok()? + 1;
    Some(format!("sage-{major}.{next}"))
}

pub fn is_mergeable_milestone(milestone: &str) -> bool {
    MERGEABLE_MILESTONE.is_match(milestone)
}

/// Author and reviewer lists must be comma separated names starting with
/// an uppercase letter.
pub fn names_look_right(names: &str) -> bool {
    names.split(',').all(|name| {
        name.trim()
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_uppercase())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA_A: &str = "0123456789abcdef0123456789abcdef01234567";
    const SHA_B: &str = "89abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn parses_release_merges() {
        let log = format!(
            "{SHA_A} Trac #22: fix the flics\n{SHA_B} Trac #14102: Some description\n"
        );
        let entries = parse_release_log(&log).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sha1, SHA_A);
        assert_eq!(entries[0].ticket, 22);
        assert_eq!(entries[1].title, "Some description");
    }

    #[test]
    fn rejects_foreign_commits() {
        let log = format!("{SHA_A} Updated version to 9.1");
        assert!(parse_release_log(&log).unwrap_err().starts_with("parsing log failed"));
    }

    #[test]
    fn empty_ticket_number_is_an_error() {
        let log = format!("{SHA_A} Trac #: nothing");
        assert!(parse_release_log(&log)
            .unwrap_err()
            .starts_with("failed to convert"));
    }

    #[test]
    fn locates_merge_and_release_after_a_commit() {
        let log = "c1\nBob <bob@example.org>\nFix typo\0\
                   m1\nRelease Manager <release@sagemath.org>\nTrac #22: fix the flics\0\
                   m2\nRelease Manager <release@sagemath.org>\nTrac #23: more\0\
                   r1\nRelease Manager <release@sagemath.org>\nUpdated SageMath version to 9.2\0";
        let commits = parse_commit_records(log);
        assert_eq!(commits.len(), 4);

        let location = locate_release(commits, "Release Manager <release@sagemath.org>");
        assert_eq!(location.merge.unwrap().title, "Trac #22: fix the flics");
        assert_eq!(location.release.unwrap().sha1, "r1");
    }

    #[test]
    fn unmerged_commit_has_no_location() {
        let commits = parse_commit_records("c1\nBob <bob@example.org>\nWip\0");
        assert_eq!(
            locate_release(commits, "Release Manager <release@sagemath.org>"),
            ReleaseLocation::default()
        );
        assert!(parse_commit_records("").is_empty());
        assert!(parse_commit_records("only one line\0").is_empty());
    }

    #[test]
    fn tags_follow_first_parent_order() {
        let log = format!("{SHA_A}\tHEAD -> develop, tag: 9.2.beta1\n{SHA_B}\t\n{SHA_A}\ttag: 9.1\n");
        assert_eq!(parse_tag_decorations(&log).unwrap(), vec!["9.2.beta1", "9.1"]);

        let twice = format!("{SHA_A}\ttag: 9.1, tag: 9.1.rc0\n");
        assert!(parse_tag_decorations(&twice).unwrap_err().contains(SHA_A));
    }

    #[test]
    fn milestone_follows_version_tag() {
        assert_eq!(milestone_after("9.2.beta3").as_deref(), Some("sage-9.2"));
        assert_eq!(milestone_after("9.2.rc0").as_deref(), Some("sage-9.2"));
        assert_eq!(milestone_after("9.1").as_deref(), Some("sage-9.2"));
        assert_eq!(milestone_after("9.1.12").as_deref(), Some("sage-9.1.13"));
        assert_eq!(milestone_after("list"), None);
    }

    #[test]
    fn milestones() {
        assert!(is_mergeable_milestone("sage-9.1"));
        assert!(is_mergeable_milestone("sage-10.0.1"));
        assert!(!is_mergeable_milestone("sage-pending"));
        assert!(!is_mergeable_milestone(""));
    }

    #[test]
    fn names() {
        assert!(names_look_right("Alice Smith, Bob Jones"));
        assert!(!names_look_right("alice"));
        assert!(!names_look_right("Alice, "));
    }
}
