//! `promptlab render <TEMPLATE> [-p key=value]...`

use anyhow::Result;
use clap::Args;

use super::{collect_params, load_service, read_template, ParamArg};

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Template text, or `@path` to read it from a file.
    pub template: String,

    /// Parameter as key=value; repeatable. JSON values are parsed.
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<ParamArg>,
}

impl RenderArgs {
    pub fn run(self) -> Result<()> {
        let template = read_template(&self.template)?;
        let service = load_service()?;
        println!("{}", service.render_template(&template, collect_params(self.params)));
        Ok(())
    }
}
