use chrono::NaiveDateTime;
use tracing::warn;

use crate::domain::ticket::Ticket;

pub const TICKET_WIDTH: usize = 78;
pub const COMMIT_WIDTH: usize = 72;

fn time_or_unknown(time: Option<NaiveDateTime>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Human readable ticket page for the terminal.
pub fn format_ticket(ticket: &Ticket, base_url: &str) -> String {
    let rule = "=".repeat(TICKET_WIDTH);
    let text = format!(
        "{rule}\n\
         Trac #{number}: {title}\n\
         \n\
         {description}\n\
         Status: {status:<25}       Component: {component:<25}\n\
         Last modified: {modified:<25}Created: {created} UTC\n\
         Report upstream: {upstream}\n\
         Authors: {author}\n\
         Reviewers: {reviewer}\n\
         Branch: {branch}\n\
         Keywords: {keywords}\n\
         Dependencies: {dependencies}\n\
         \n\
         URL: {base_url}/{number}\n\
         {rule}",
        number = ticket.number,
        title = ticket.title,
        description = ticket.description.trim(),
        status = ticket.status,
        component = ticket.component,
        modified = time_or_unknown(ticket.modified),
        created = time_or_unknown(ticket.created),
        upstream = ticket.upstream,
        author = ticket.author,
        reviewer = ticket.reviewer,
        branch = ticket.branch.as_deref().unwrap_or(""),
        keywords = ticket.keywords,
        dependencies = ticket.dependencies.as_deref().unwrap_or(""),
    );
    wrap_lines(&text, TICKET_WIDTH)
}

/// Commit message the release manager uses when merging `ticket`.
pub fn format_commit_message(ticket: &Ticket, base_url: &str) -> String {
    let summary = format!("Trac #{}: {}", ticket.number, ticket.title.trim());
    let length = summary.chars().count();
    if length > COMMIT_WIDTH {
        warn!("overlong summary at {length} characters");
    }
    let body = format!(
        "{description}\n\n\
         URL: {base_url}/{number}\n\
         Reported by: {reporter}\n\
         Ticket author(s): {author}\n\
         Reviewer(s): {reviewer}",
        description = ticket.description.trim(),
        number = ticket.number,
        reporter = ticket.reporter,
        author = ticket.author,
        reviewer = ticket.reviewer,
    );
    format!("{summary}\n\n{}", wrap_lines(&body, COMMIT_WIDTH))
}

/// Greedy word wrap applied line by line.
///
/// Lines that already fit are kept verbatim, so alignment padding and blank
/// lines survive.
pub fn wrap_lines(text: &str, width: usize) -> String {
    text.trim()
        .lines()
        .map(|line| wrap_line(line.trim_end(), width))
        .collect::<Vec<_>>()
        .join("\n")
}

fn wrap_line(line: &str, width: usize) -> String {
    if line.chars().count() <= width {
        return line.to_string();
    }
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in line.split_whitespace() {
        let needed = current.chars().count() + usize::from(!current.is_empty()) + word.chars().count();
        if !current.is_empty() && needed > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines.join("\n")
}
