use clap::Args;
use tracing::warn;

use crate::context::AppContext;
use crate::domain::ticket::TicketNumber;
use crate::error::{AppError, AppResult};
use crate::render::format_ticket;
use crate::workflow::ticket::{
    self as workflow, CheckoutOutcome, TicketOrBranch, parse_ticket_number,
};

#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    /// Ticket summary.
    pub summary: String,
    /// Branch name template (default: derived from the summary).
    #[arg(short, long)]
    pub branch: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CheckoutArgs {
    /// Ticket number or remote branch name.
    pub ticket_or_branch: TicketOrBranch,
    /// Local branch name.
    #[arg(short, long)]
    pub branch: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Ticket number or remote branch name (default: current branch's ticket).
    pub ticket_or_branch: Option<TicketOrBranch>,
}

#[derive(Args, Debug, Clone)]
pub struct PushArgs {
    /// Ticket number (default: current branch's ticket).
    #[arg(value_parser = parse_ticket_number)]
    pub ticket: Option<TicketNumber>,
    /// Remote branch name.
    #[arg(long = "branch")]
    pub remote: Option<String>,
    /// Force push.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TicketArgs {
    /// Ticket number (default: current branch's ticket).
    #[arg(value_parser = parse_ticket_number)]
    pub ticket: Option<TicketNumber>,
}

#[derive(Args, Debug, Clone)]
pub struct PrintArgs {
    /// Ticket number (default: current branch's ticket).
    #[arg(value_parser = parse_ticket_number)]
    pub ticket: Option<TicketNumber>,
    /// Print the ticket as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Remote git branch name (default: current branch).
    #[arg(long)]
    pub branch: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct TryArgs {
    /// Ticket number or remote branch name.
    pub ticket_or_branch: TicketOrBranch,
}

#[derive(Args, Debug, Clone)]
pub struct FindArgs {
    /// Commit SHA1.
    pub commit: String,
}

#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    #[arg(value_parser = parse_ticket_number)]
    pub ticket: TicketNumber,
    /// One line per commit.
    #[arg(long)]
    pub oneline: bool,
}

fn report_checkout(outcome: &CheckoutOutcome) {
    if outcome.already_existed {
        println!(
            "Local branch {} already exists. Use \"git trac pull\" to get updates.",
            outcome.local
        );
    }
    match outcome.ticket {
        Some(number) => println!(
            "Trac #{number}: on branch {} tracking trac/{}",
            outcome.local, outcome.remote
        ),
        None => println!("On branch {} tracking trac/{}", outcome.local, outcome.remote),
    }
}

pub async fn create(ctx: &AppContext, args: CreateArgs) -> AppResult<()> {
    let outcome = workflow::create(ctx, &args.summary, args.branch.as_deref()).await?;
    if let Some(number) = outcome.ticket {
        println!("Newly created ticket: {}", ctx.config.ticket_url(number));
    }
    report_checkout(&outcome);
    Ok(())
}

pub async fn checkout(ctx: &AppContext, args: CheckoutArgs) -> AppResult<()> {
    println!("Loading {}...", args.ticket_or_branch);
    let outcome =
        workflow::checkout(ctx, &args.ticket_or_branch, args.branch.as_deref()).await?;
    report_checkout(&outcome);
    Ok(())
}

pub async fn fetch(ctx: &AppContext, args: TargetArgs) -> AppResult<()> {
    let remote = workflow::fetch(ctx, args.ticket_or_branch.as_ref()).await?;
    println!("Fetched trac/{remote} into FETCH_HEAD");
    Ok(())
}

pub async fn pull(ctx: &AppContext, args: TargetArgs) -> AppResult<()> {
    workflow::pull(ctx, args.ticket_or_branch.as_ref()).await?;
    Ok(())
}

pub async fn push(ctx: &AppContext, args: PushArgs) -> AppResult<()> {
    let outcome = workflow::push(ctx, args.ticket, args.remote.as_deref(), args.force).await?;
    println!("Pushed to trac/{} for Trac #{}", outcome.remote, outcome.ticket);
    if outcome.branch_field_updated {
        println!("Changed the ticket's \"Branch:\" field to {}", outcome.remote);
    }
    Ok(())
}

pub async fn print(ctx: &AppContext, args: PrintArgs) -> AppResult<()> {
    let ticket = workflow::print(ctx, args.ticket).await?;
    if args.json {
        let json = serde_json::to_string_pretty(&ticket)
            .map_err(|err| AppError::IssueTracker(format!("failed to encode ticket: {err}")))?;
        println!("{json}");
    } else {
        println!("{}", format_ticket(&ticket, &ctx.config.server_url));
    }
    Ok(())
}

pub async fn depends(ctx: &AppContext, args: TicketArgs) -> AppResult<()> {
    let deps = workflow::depends(ctx, args.ticket).await?;
    if deps.dependencies.is_empty() {
        println!("Trac #{} has no dependencies", deps.ticket.number);
    }
    for dep in &deps.dependencies {
        println!("#{} [{}] {}", dep.number, dep.status, dep.title);
    }
    Ok(())
}

pub async fn search(ctx: &AppContext, args: SearchArgs) -> AppResult<()> {
    let outcome = workflow::search(ctx, args.branch.as_deref()).await?;
    match outcome.ticket {
        Some(number) => println!("{number}"),
        None => println!("No ticket has branch {}", outcome.branch),
    }
    Ok(())
}

pub async fn browse(ctx: &AppContext, args: TicketArgs) -> AppResult<()> {
    let url = workflow::browse(ctx, args.ticket).await?;
    if let Err(err) = open::that(&url) {
        warn!("failed to open a browser: {err}");
        println!("Open {url} in your browser");
    }
    Ok(())
}

pub async fn try_out(ctx: &AppContext, args: TryArgs) -> AppResult<()> {
    let outcome = workflow::try_out(ctx, &args.ticket_or_branch).await?;
    println!(
        "Merge of the most recent beta and trac/{} successful. When you are\n\
         finished, switch back to one of the existing branches. For example:\n\n    \
         git checkout {}",
        outcome.remote, outcome.previous_branch
    );
    Ok(())
}

pub async fn find(ctx: &AppContext, args: FindArgs) -> AppResult<()> {
    let location = workflow::find(ctx, &args.commit).await?;
    let Some(merge) = location.merge else {
        println!("Commit has not been merged by the release manager into your current branch.");
        return Ok(());
    };
    println!("Commit has been merged by the release manager into your current branch.");
    println!("{} {}", merge.sha1, merge.title);
    match location.release {
        Some(release) => println!("It first appeared in {} {}", release.sha1, release.title),
        None => println!("It is not part of a release yet."),
    }
    Ok(())
}

pub async fn log(ctx: &AppContext, args: LogArgs) -> AppResult<()> {
    let log = workflow::log(ctx, args.ticket, args.oneline).await?;
    print!("{log}");
    Ok(())
}

pub async fn review(ctx: &AppContext, args: TicketArgs) -> AppResult<()> {
    let diff = workflow::review(ctx, args.ticket).await?;
    println!("{diff}");
    Ok(())
}
