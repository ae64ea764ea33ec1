mod cmd;
mod config;
mod context;
mod domain;
mod error;
mod infra;
mod logging;
mod render;
mod services;
mod workflow;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::cmd::config::ConfigArgs;
use crate::cmd::release::ReleaseArgs;
use crate::cmd::ticket::{
    CheckoutArgs, CreateArgs, FindArgs, LogArgs, PrintArgs, PushArgs, SearchArgs, TargetArgs,
    TicketArgs, TryArgs,
};
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::error::AppResult;
use crate::infra::git::{GitCli, GitRepository};
use crate::infra::trac::TracClient;

#[derive(Parser)]
#[command(
    name = "git-trac",
    author,
    version,
    about = "The trac command extension for git"
)]
struct Cli {
    /// One of DEBUG, INFO, WARNING, ERROR, CRITICAL.
    #[arg(long, global = true, value_name = "LEVEL")]
    log: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new ticket and a branch for it.
    Create(CreateArgs),
    /// Download the branch of a ticket.
    Checkout(CheckoutArgs),
    /// Fetch the branch of a ticket into FETCH_HEAD.
    Fetch(TargetArgs),
    /// Fetch and merge the branch of a ticket.
    Pull(TargetArgs),
    /// Upload the current branch and attach it to the ticket.
    Push(PushArgs),
    /// Print the trac page of a ticket.
    Print(PrintArgs),
    /// Print the dependencies of a ticket.
    Depends(TicketArgs),
    /// Find the ticket whose branch field is a given branch.
    Search(SearchArgs),
    /// Open the trac page of a ticket in a browser.
    Browse(TicketArgs),
    /// Find the release merge that brought in a commit.
    Find(FindArgs),
    /// Commit log of a merged ticket.
    Log(LogArgs),
    /// Try out a ticket on top of develop in "detached HEAD".
    Try(TryArgs),
    /// Show the changes a ticket makes on top of develop.
    Review(TicketArgs),
    /// Configure the trac remote and credentials.
    Config(ConfigArgs),
    /// Release manager commands.
    Release(ReleaseArgs),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    let cli = Cli::parse();
    logging::init(cli.log.as_deref())?;

    let ctx = build_context().await?;

    match cli.command {
        Commands::Create(args) => cmd::ticket::create(&ctx, args).await,
        Commands::Checkout(args) => cmd::ticket::checkout(&ctx, args).await,
        Commands::Fetch(args) => cmd::ticket::fetch(&ctx, args).await,
        Commands::Pull(args) => cmd::ticket::pull(&ctx, args).await,
        Commands::Push(args) => cmd::ticket::push(&ctx, args).await,
        Commands::Print(args) => cmd::ticket::print(&ctx, args).await,
        Commands::Depends(args) => cmd::ticket::depends(&ctx, args).await,
        Commands::Search(args) => cmd::ticket::search(&ctx, args).await,
        Commands::Browse(args) => cmd::ticket::browse(&ctx, args).await,
        Commands::Find(args) => cmd::ticket::find(&ctx, args).await,
        Commands::Log(args) => cmd::ticket::log(&ctx, args).await,
        Commands::Try(args) => cmd::ticket::try_out(&ctx, args).await,
        Commands::Review(args) => cmd::ticket::review(&ctx, args).await,
        Commands::Config(args) => cmd::config::run(&ctx, args).await,
        Commands::Release(args) => cmd::release::run(&ctx, args).await,
    }
}

async fn build_context() -> AppResult<AppContext> {
    let cwd = std::env::current_dir()?;
    let git = GitCli::with_program(config::git_program(), cwd);
    let repository = Arc::new(GitRepository::new(git));
    let config = AppConfig::load(repository.as_ref()).await?;
    let issue_tracker = Arc::new(TracClient::new(&config));

    Ok(AppContext::new(config, repository, issue_tracker))
}
