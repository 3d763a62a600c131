//! promptlab — render and test prompt templates through the resilient pipeline.
//!
//! # Usage
//!
//! ```text
//! promptlab render <TEMPLATE> [-p key=value]...
//! promptlab test [--prompt <id> [--version <n>]] [--template <T>] [-p key=value]...
//!                [--timeout-ms <ms>] [--engine <name>] [--json]
//! promptlab params (--prompt <id> [--version <n>] | --template <T>) [--json]
//! promptlab engines [--json]
//! promptlab prompt add <id> --name <name> --body <T> [--note <text>]
//! promptlab prompt revise <id> --body <T> [--note <text>]
//! promptlab prompt list
//! ```
//!
//! Template arguments starting with `@` are read from that file.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    engines::EnginesArgs, params::ParamsArgs, prompt::PromptCommand, render::RenderArgs,
    test::TestArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "promptlab",
    version,
    about = "Render and test prompt templates with sandboxed parameters",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a template and print the result, or the template itself on failure.
    Render(RenderArgs),

    /// Run a template or stored prompt through the full test pipeline.
    Test(TestArgs),

    /// List the parameters a template or stored prompt expects.
    Params(ParamsArgs),

    /// Show registered template engines.
    Engines(EnginesArgs),

    /// Manage stored prompts and their versions.
    Prompt {
        #[command(subcommand)]
        command: PromptCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Render(args) => args.run(),
        Commands::Test(args) => args.run(),
        Commands::Params(args) => args.run(),
        Commands::Engines(args) => args.run(),
        Commands::Prompt { command } => commands::prompt::run(command),
    }
}

/// Diagnostics go to stderr so stdout stays clean for rendered output and JSON.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
