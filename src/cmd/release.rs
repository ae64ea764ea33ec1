use clap::{Args, Subcommand};

use crate::context::AppContext;
use crate::domain::ticket::TicketNumber;
use crate::error::AppResult;
use crate::workflow::release::{self as workflow, MergeOptions, MergeSummary};
use crate::workflow::ticket::parse_ticket_number;

#[derive(Args, Debug, Clone)]
pub struct ReleaseArgs {
    #[command(subcommand)]
    pub command: ReleaseCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ReleaseCommand {
    /// Print the release merge commit message of a ticket.
    Print {
        #[arg(value_parser = parse_ticket_number)]
        ticket: TicketNumber,
    },
    /// Create release merges for one or more tickets.
    Merge(MergeArgs),
    /// Merge every ticket that is ready.
    MergeAll {
        /// Milestone, e.g. "9.2", "sage-9.2" or "current".
        #[arg(long)]
        milestone: Option<String>,
        /// Stop after this many successful merges.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Test merge a ticket that has not been reviewed.
    Test {
        #[arg(value_parser = parse_ticket_number)]
        ticket: TicketNumber,
    },
    /// Remove the release merge of a ticket from the history.
    Unmerge {
        #[arg(value_parser = parse_ticket_number)]
        ticket: TicketNumber,
    },
    /// Close the tickets merged in HEAD but not in EXCLUDE.
    Close {
        #[arg(long, default_value = "HEAD")]
        head: String,
        #[arg(long, default_value = "trac/develop")]
        exclude: String,
    },
    /// List tickets that are ready to be merged.
    Todo {
        /// Milestone, e.g. "9.2", "sage-9.2" or "current".
        #[arg(long)]
        milestone: Option<String>,
    },
    /// Push develop together with its release tag.
    Publish,
}

#[derive(Args, Debug, Clone)]
pub struct MergeArgs {
    #[arg(required = true, value_parser = parse_ticket_number)]
    pub tickets: Vec<TicketNumber>,
    /// Close the ticket after merging.
    #[arg(long)]
    pub close: bool,
    /// Allow merges that do not change anything.
    #[arg(long)]
    pub allow_empty: bool,
    /// Do not check that dependencies are merged.
    #[arg(long)]
    pub ignore_dependencies: bool,
    /// Do not check author and reviewer names.
    #[arg(long)]
    pub ignore_name: bool,
}

pub async fn run(ctx: &AppContext, args: ReleaseArgs) -> AppResult<()> {
    match args.command {
        ReleaseCommand::Print { ticket } => {
            println!("{}", workflow::print_commit_message(ctx, ticket).await?);
        }
        ReleaseCommand::Merge(args) => merge(ctx, args).await?,
        ReleaseCommand::MergeAll { milestone, limit } => {
            let (milestone, summary) =
                workflow::merge_all(ctx, milestone.as_deref(), limit, MergeOptions::default())
                    .await?;
            let scope = milestone
                .map(|m| format!("for milestone {m} "))
                .unwrap_or_default();
            if summary.merged.is_empty() && summary.failed.is_empty() {
                println!("No tickets {scope}are ready to be merged");
            } else {
                print_summary(ctx, &summary).await?;
            }
        }
        ReleaseCommand::Test { ticket } => {
            let merged = workflow::test_merge(ctx, ticket).await?;
            println!("Test merged Trac #{}: {}", merged.number, merged.title);
        }
        ReleaseCommand::Unmerge { ticket } => {
            let unmerged = workflow::unmerge(ctx, ticket).await?;
            println!(
                "Removing {} Trac #{}: {}",
                unmerged.merge.sha1, unmerged.merge.ticket, unmerged.merge.title
            );
            println!("Parent release commit is {}", unmerged.first_parent);
        }
        ReleaseCommand::Close { exclude, head } => {
            for ticket in workflow::close(ctx, &head, &exclude).await? {
                if ticket.already_closed {
                    println!("Trac #{} already closed", ticket.number);
                } else {
                    println!("Trac #{}: {} -> closed", ticket.number, ticket.previous_status);
                }
            }
        }
        ReleaseCommand::Todo { milestone } => todo(ctx, milestone.as_deref()).await?,
        ReleaseCommand::Publish => {
            let tag = workflow::publish(ctx).await?;
            println!("Published {tag}");
        }
    }
    Ok(())
}

async fn merge(ctx: &AppContext, args: MergeArgs) -> AppResult<()> {
    let options = MergeOptions {
        close: args.close,
        allow_empty: args.allow_empty,
        ignore_dependencies: args.ignore_dependencies,
        ignore_name: args.ignore_name,
    };
    let mut summary = workflow::merge_many(ctx, &args.tickets, options).await?;
    if args.tickets.len() == 1 {
        if let Some((_, err)) = summary.failed.pop() {
            return Err(err);
        }
        for number in &summary.merged {
            println!("Merged Trac #{number}");
        }
        return Ok(());
    }
    print_summary(ctx, &summary).await
}

async fn print_summary(ctx: &AppContext, summary: &MergeSummary) -> AppResult<()> {
    println!("\n### Summary ###\n");
    if !summary.merged.is_empty() {
        let merged: Vec<String> = summary.merged.iter().map(ToString::to_string).collect();
        println!("Successfully merged: {}", merged.join(", "));
    }
    for (number, err) in &summary.failed {
        let ticket = ctx.issue_tracker.get_ticket(*number).await?;
        println!();
        println!("* {} {} ({})", ticket.number, ticket.title, ticket.author);
        println!("  URL: {}", ctx.config.ticket_url(ticket.number));
        println!("  Error: {err}");
    }
    Ok(())
}

async fn todo(ctx: &AppContext, milestone: Option<&str>) -> AppResult<()> {
    let (milestone, tickets) = workflow::todo(ctx, milestone).await?;
    let scope = milestone
        .map(|m| format!("for milestone {m} "))
        .unwrap_or_default();
    if tickets.is_empty() {
        println!("No tickets {scope}are ready to be merged");
        return Ok(());
    }
    println!("The following tickets {scope}are ready to be merged");
    for ticket in &tickets {
        println!("* {} {} ({})", ticket.number, ticket.title, ticket.author);
    }
    let numbers: Vec<String> = tickets.iter().map(|t| t.number.to_string()).collect();
    println!("Merge tickets with:");
    println!("git trac release merge {}", numbers.join(" "));
    Ok(())
}
