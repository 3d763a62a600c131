//! `promptlab prompt add|revise|list`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use promptlab_core::PromptId;

use super::{prompt_store, read_template};

/// Manage stored prompts.
#[derive(Subcommand, Debug)]
pub enum PromptCommand {
    /// Create a prompt with its first version.
    Add(AddArgs),

    /// Append a new version and make it active.
    Revise(ReviseArgs),

    /// List stored prompts.
    List,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Prompt id, used as the file name.
    pub id: String,

    /// Human-readable name.
    #[arg(long)]
    pub name: String,

    /// Template body or `@path`.
    #[arg(long)]
    pub body: String,

    /// Change note recorded with the version.
    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Args, Debug)]
pub struct ReviseArgs {
    pub id: String,

    /// Template body or `@path`.
    #[arg(long)]
    pub body: String,

    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Tabled)]
struct PromptRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "active")]
    active: u32,
    #[tabled(rename = "versions")]
    versions: usize,
    #[tabled(rename = "updated")]
    updated: String,
}

pub fn run(cmd: PromptCommand) -> Result<()> {
    match cmd {
        PromptCommand::Add(args) => add(args),
        PromptCommand::Revise(args) => revise(args),
        PromptCommand::List => list(),
    }
}

fn add(args: AddArgs) -> Result<()> {
    let body = read_template(&args.body)?;
    let store = prompt_store()?;
    let prompt = store
        .create(PromptId::from(args.id.as_str()), args.name, body, args.note)
        .with_context(|| format!("failed to create prompt '{}'", args.id))?;
    println!("✓ Created prompt '{}' (version {})", prompt.id, prompt.active_version);
    Ok(())
}

fn revise(args: ReviseArgs) -> Result<()> {
    let body = read_template(&args.body)?;
    let store = prompt_store()?;
    let number = store
        .add_version(&PromptId::from(args.id.as_str()), body, args.note)
        .with_context(|| format!("failed to revise prompt '{}'", args.id))?;
    println!("✓ Prompt '{}' is now at version {number}", args.id);
    Ok(())
}

fn list() -> Result<()> {
    let prompts = prompt_store()?.list().context("failed to list prompts")?;
    if prompts.is_empty() {
        println!("No prompts stored.");
        println!("Run: promptlab prompt add <id> --name <name> --body <template>");
        return Ok(());
    }
    let rows: Vec<PromptRow> = prompts
        .into_iter()
        .map(|p| PromptRow {
            id: p.id.to_string(),
            name: p.name,
            active: p.active_version,
            versions: p.versions.len(),
            updated: p.updated_at.format("%Y-%m-%d %H:%M").to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}
