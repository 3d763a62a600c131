//! `promptlab params` — parameters a template expects.

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use promptlab_core::{DiscoveredParameters, PromptId};

use super::{load_service, read_template};

#[derive(Args, Debug)]
pub struct ParamsArgs {
    /// Stored prompt to inspect.
    #[arg(long, conflicts_with = "template")]
    pub prompt: Option<String>,

    /// Prompt version; defaults to the active one.
    #[arg(long, requires = "prompt")]
    pub version: Option<u32>,

    /// Template text or `@path`.
    #[arg(long)]
    pub template: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct ParamsJson<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_name: Option<&'a str>,
    parameters: &'a DiscoveredParameters,
}

#[derive(Tabled)]
struct ParamRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "type")]
    kind: String,
    #[tabled(rename = "required")]
    required: String,
    #[tabled(rename = "default")]
    default: String,
}

impl ParamsArgs {
    pub fn run(self) -> Result<()> {
        let service = load_service()?;
        let (prompt_name, parameters) = match (self.prompt, self.template) {
            (Some(id), _) => {
                let data = service
                    .get_test_data(&PromptId::from(id.as_str()), self.version)
                    .with_context(|| format!("failed to load prompt '{id}'"))?;
                (Some(data.prompt_name), data.discovered_parameters)
            }
            (None, Some(template)) => (None, service.extract_parameters(&read_template(&template)?)),
            (None, None) => bail!("pass --template or --prompt"),
        };

        if self.json {
            let payload = ParamsJson { prompt_name: prompt_name.as_deref(), parameters: &parameters };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize parameters")?
            );
            return Ok(());
        }

        if let Some(name) = &prompt_name {
            println!("Prompt: {name}");
        }
        if parameters.is_empty() {
            println!("No parameters found.");
            return Ok(());
        }
        let rows: Vec<ParamRow> = parameters
            .iter()
            .map(|(name, info)| ParamRow {
                name: name.clone(),
                kind: info.kind.to_string(),
                required: if info.required { "yes" } else { "no" }.to_string(),
                default: info.default.clone().unwrap_or_default(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
