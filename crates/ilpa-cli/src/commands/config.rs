use std::path::Path;

use clap::{Parser, Subcommand};
use ilpa_server::config::Config;

use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct ConfigCommand {
    #[clap(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    #[clap(about = "Show the effective configuration")]
    Show,
}

impl ConfigCommand {
    pub async fn execute(&self, config_path: Option<&Path>, format: OutputFormat) -> CliResult<()> {
        match self.command {
            ConfigSubcommand::Show => {
                let config = Config::load(config_path)?;
                println!("{}", render(&config, format)?);
                Ok(())
            }
        }
    }
}

fn render(config: &Config, format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(config)?),
        OutputFormat::Table => toml::to_string_pretty(config)
            .map_err(|e| format!("Failed to render config: {e}").into()),
    }
}
