//! CLI surface: argument parsing and command dispatch.

use clap::{Parser, Subcommand};

/// orco - adaptive multi-agent task orchestrator
#[derive(Parser, Debug)]
#[command(name = "orco")]
#[command(about = "Adaptive multi-agent task orchestrator")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Route, plan, and drive a single request through to completion.
    Run {
        /// The request to route and (if routed to `task`) plan and execute.
        request: String,
        /// Drive the session against an in-process scripted LLM instead of
        /// the configured endpoint, for local exercise with no API key.
        #[arg(long)]
        mock: bool,
        /// Language the ToolPlanner's planning templates should respond in.
        #[arg(long, default_value = "en")]
        language: String,
    },
    /// Check configuration and provider readiness.
    Doctor,
}

/// Dispatch a parsed command.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Run { request, mock, language }) => {
            crate::session::run_request(&request, mock, &language).await
        }
        Some(Commands::Doctor) => crate::doctor::run().await,
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
