//! Subcommands and the configuration flags they share.

pub mod check;
pub mod plan;
pub mod sync;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crmsync_core::{ApiConfig, ConfigLayer, RunConfig};
use crmsync_crm::{PacedApi, PipedriveClient};

/// Flags shared by every subcommand. Precedence, lowest first: built-in
/// defaults, `--config` file, environment, these flags.
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// YAML configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Source database export (CSV).
    #[arg(long, value_name = "PATH")]
    pub source: Option<PathBuf>,

    /// Directory for the audit logs.
    #[arg(long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// CRM API base URL.
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Retries per call after a transient failure.
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Minimum spacing between requests, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub request_delay_ms: Option<u64>,
}

impl ConfigArgs {
    fn layer(&self, dry_run: bool) -> Result<ConfigLayer> {
        let file = match &self.config {
            Some(path) => ConfigLayer::from_yaml_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => ConfigLayer::default(),
        };
        let flags = ConfigLayer {
            source: self.source.clone(),
            out_dir: self.out_dir.clone(),
            base_url: self.base_url.clone(),
            max_retries: self.max_retries,
            request_delay_ms: self.request_delay_ms,
            dry_run: dry_run.then_some(true),
            ..ConfigLayer::default()
        };
        Ok(file.merge(ConfigLayer::from_env()).merge(flags))
    }

    pub fn run_config(&self, dry_run: bool) -> Result<RunConfig> {
        Ok(self.layer(dry_run)?.run_config()?)
    }

    pub fn api_config(&self) -> Result<ApiConfig> {
        Ok(self.layer(false)?.api_config()?)
    }
}

/// Pipedrive client wrapped in pacing and retries.
pub fn connect(config: &ApiConfig) -> PacedApi<PipedriveClient> {
    tracing::debug!(base_url = %config.base_url, "using CRM API");
    PacedApi::from_config(PipedriveClient::new(config), config)
}
