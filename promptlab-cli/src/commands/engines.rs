//! `promptlab engines` — registered engines in selection order.

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use super::load_service;

#[derive(Args, Debug)]
pub struct EnginesArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct EngineRow {
    #[tabled(rename = "engine")]
    name: String,
    #[tabled(rename = "version")]
    version: String,
    #[tabled(rename = "priority")]
    priority: i32,
    #[tabled(rename = "available")]
    available: String,
    #[tabled(rename = "default")]
    default: String,
    #[tabled(rename = "features")]
    features: String,
}

impl EnginesArgs {
    pub fn run(self) -> Result<()> {
        let service = load_service()?;
        let entries = service.registry().entries();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&entries).context("failed to serialize engines")?
            );
            return Ok(());
        }

        let rows: Vec<EngineRow> = entries
            .into_iter()
            .map(|e| EngineRow {
                name: e.name,
                version: e.version,
                priority: e.priority,
                available: if e.available { "yes" } else { "no" }.to_string(),
                default: if e.is_default { "*" } else { "" }.to_string(),
                features: e.features.join(", "),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
