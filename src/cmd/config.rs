use clap::Args;

use crate::config::{ANONYMOUS_XMLRPC, AUTHENTICATED_XMLRPC};
use crate::context::AppContext;
use crate::error::AppResult;
use crate::workflow::ticket::{ConfigSummary, configure};

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Trac username to store in git config.
    #[arg(long = "user")]
    pub user: Option<String>,
    /// Trac password to store in git config.
    #[arg(long = "pass")]
    pub pass: Option<String>,
}

pub async fn run(ctx: &AppContext, args: ConfigArgs) -> AppResult<()> {
    let summary = configure(ctx, args.user.as_deref(), args.pass.as_deref()).await?;
    print!("{}", render(&summary));
    Ok(())
}

fn render(summary: &ConfigSummary) -> String {
    let mut out = String::new();
    if summary.remote_added {
        out.push_str(&format!("Added remote \"trac\" -> {}\n", summary.remote_url));
    }
    out.push_str("Trac xmlrpc URL:\n");
    out.push_str(&format!("    {}/{ANONYMOUS_XMLRPC} (anonymous)\n", summary.server_url));
    out.push_str(&format!("    {}/{AUTHENTICATED_XMLRPC} (authenticated)\n", summary.server_url));
    out.push_str(&format!("Username: {}\n", display_value(&summary.username)));
    out.push_str(&format!("Password: {}\n", mask_secret(&summary.password)));
    out
}

fn display_value(value: &Option<String>) -> String {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "<not set>".to_string())
}

fn mask_secret(value: &Option<String>) -> String {
    match value {
        Some(secret) if !secret.is_empty() => "*".repeat(secret.chars().count()),
        _ => "<not set>".to_string(),
    }
}
