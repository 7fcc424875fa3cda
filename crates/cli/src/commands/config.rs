//! Inspect harness configuration

use anyhow::Result;
use apphost_harness::{HarnessConfig, RuntimeFlavor};
use clap::Subcommand;
use serde::Serialize;

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,

    /// List the runtime flavors supported on this platform
    Flavors,
}

#[derive(Serialize)]
struct FlavorRow {
    flavor: String,
    framework: String,
}

impl TableDisplay for FlavorRow {
    fn headers() -> Vec<&'static str> {
        vec!["Flavor", "Framework"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.flavor.clone(), self.framework.clone()]
    }
}

pub fn execute(cmd: ConfigCommands, config: &HarnessConfig, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            print!("{}", toml::to_string_pretty(config)?);
        }
        ConfigCommands::Flavors => {
            let rows: Vec<FlavorRow> = RuntimeFlavor::supported()
                .into_iter()
                .map(|flavor| FlavorRow {
                    flavor: flavor.to_string(),
                    framework: config.toolchain.framework_for(flavor).to_string(),
                })
                .collect();
            print_list(&rows, format, "No runtime flavors are supported on this platform");
        }
    }
    Ok(())
}
