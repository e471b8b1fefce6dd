//! `crmsync plan` — a forced dry run that lists every planned mutation.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use crmsync_core::MutationRecord;

use super::{connect, sync::print_summary, ConfigArgs};

/// Arguments for `crmsync plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Emit the planned mutations as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "target")]
    target: String,
    #[tabled(rename = "before")]
    before: String,
    #[tabled(rename = "after")]
    after: String,
}

impl From<&MutationRecord> for PlanRow {
    fn from(record: &MutationRecord) -> Self {
        Self {
            kind: record.kind().to_string(),
            target: record.mutation.target(),
            before: record.mutation.before_value().unwrap_or_else(|| "-".into()),
            after: record.mutation.after_value(),
        }
    }
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let config = self.config.run_config(true)?;
        let api = connect(&config.api);

        let mut report = crmsync_sync::run(&api, &config).context("plan aborted")?;
        report.summary.requests_made = Some(api.requests_made());

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report.records)
                    .context("failed to serialize planned mutations")?
            );
            return Ok(());
        }

        if report.records.is_empty() {
            println!("Nothing to do: the CRM already matches the export.");
        } else {
            let rows: Vec<PlanRow> = report.records.iter().map(PlanRow::from).collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        for missing in &report.not_in_crm {
            let user = missing
                .user_id
                .map(|id| format!(" (user {id})"))
                .unwrap_or_default();
            println!("  {} {}{user}", "not in CRM".yellow(), missing.email);
        }
        print_summary(&report);
        Ok(())
    }
}
