//! `crmsync check` — verify the token and connectivity.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use crmsync_sync::fetch::check_connection;

use super::{connect, ConfigArgs};

/// Arguments for `crmsync check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let config = self.config.api_config()?;
        let api = connect(&config);
        let user = check_connection(&api)
            .with_context(|| format!("could not reach {}", config.base_url))?;
        println!("{} connected to {} as {user}", "✓".green(), config.base_url);
        Ok(())
    }
}
