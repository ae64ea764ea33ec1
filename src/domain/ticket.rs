use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::Serialize;

pub type TicketNumber = u64;

const NO_SUMMARY: &str = "+++ no summary +++";
const NO_DESCRIPTION: &str = "+++ no description +++";

/// A trac ticket as read through the RPC interface.
///
/// Every optional field has a named default so callers never inspect the raw
/// attribute map.
#[derive(Debug, Clone, Serialize)]
pub struct Ticket {
    pub number: TicketNumber,
    pub title: String,
    pub description: String,
    pub branch: Option<String>,
    pub author: String,
    pub reviewer: String,
    pub reporter: String,
    pub owner: String,
    pub dependencies: Option<String>,
    pub milestone: String,
    pub status: String,
    pub component: String,
    pub keywords: String,
    pub upstream: String,
    pub commit: String,
    pub timestamp: String,
    pub created: Option<NaiveDateTime>,
    pub modified: Option<NaiveDateTime>,
}

impl Ticket {
    pub fn from_fields(
        number: TicketNumber,
        created: Option<NaiveDateTime>,
        modified: Option<NaiveDateTime>,
        fields: &BTreeMap<String, String>,
    ) -> Self {
        let text = |key: &str| fields.get(key).map(|v| v.trim().to_string()).unwrap_or_default();
        let non_empty = |key: &str| Some(text(key)).filter(|v| !v.is_empty());

        Self {
            number,
            title: non_empty("summary").unwrap_or_else(|| NO_SUMMARY.to_string()),
            description: fields
                .get("description")
                .cloned()
                .unwrap_or_else(|| NO_DESCRIPTION.to_string()),
            branch: non_empty("branch"),
            author: text("author"),
            reviewer: text("reviewer"),
            reporter: text("reporter"),
            owner: text("owner"),
            dependencies: non_empty("dependencies"),
            milestone: text("milestone"),
            status: text("status"),
            component: text("component"),
            keywords: text("keywords"),
            upstream: text("upstream"),
            commit: text("commit"),
            timestamp: text("_ts"),
            created,
            modified,
        }
    }

    /// Ticket numbers listed in the "Dependencies:" field, e.g. `#123, #456`.
    pub fn dependency_numbers(&self) -> Result<Vec<TicketNumber>, String> {
        let Some(deps) = &self.dependencies else {
            return Ok(Vec::new());
        };
        deps.replace(',', " ")
            .split_whitespace()
            .map(|dep| {
                dep.trim_start_matches('#')
                    .parse::<TicketNumber>()
                    .map_err(|_| format!("invalid dependency: {dep}"))
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.status == "closed"
    }
}

/// Field updates sent with an optimistic-concurrency timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketChanges {
    pub comment: String,
    pub fields: BTreeMap<String, String>,
}

impl TicketChanges {
    pub fn new(comment: impl Into<String>) -> Self {
        Self {
            comment: comment.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn set(mut self, field: &str, value: impl Into<String>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_fields_get_defaults() {
        let ticket = Ticket::from_fields(123, None, None, &BTreeMap::new());
        assert_eq!(ticket.title, "+++ no summary +++");
        assert_eq!(ticket.description, "+++ no description +++");
        assert_eq!(ticket.branch, None);
        assert_eq!(ticket.dependencies, None);
        assert_eq!(ticket.author, "");
    }

    #[test]
    fn empty_branch_means_no_branch() {
        let ticket = Ticket::from_fields(1, None, None, &fields(&[("branch", "  ")]));
        assert_eq!(ticket.branch, None);

        let ticket = Ticket::from_fields(1, None, None, &fields(&[("branch", "u/alice/foo")]));
        assert_eq!(ticket.branch.as_deref(), Some("u/alice/foo"));
    }

    #[test]
    fn parses_dependency_list() {
        let ticket = Ticket::from_fields(1, None, None, &fields(&[("dependencies", "#12, #345 678")]));
        assert_eq!(ticket.dependency_numbers().unwrap(), vec![12, 345, 678]);

        let ticket = Ticket::from_fields(1, None, None, &fields(&[("dependencies", "#12, soon")]));
        assert_eq!(
            ticket.dependency_numbers().unwrap_err(),
            "invalid dependency: soon"
        );
    }

    #[test]
    fn changes_accumulate_fields() {
        let changes = TicketChanges::new("done")
            .set("status", "closed")
            .set("resolution", "fixed");
        assert_eq!(changes.comment, "done");
        assert_eq!(changes.fields.get("status").map(String::as_str), Some("closed"));
        assert_eq!(changes.fields.len(), 2);
    }
}
