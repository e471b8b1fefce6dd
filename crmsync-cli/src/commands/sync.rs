//! `crmsync sync` — reconcile the CRM and write the audit logs.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use crmsync_sync::{RunReport, RunSummary};

use super::{connect, ConfigArgs};

/// Arguments for `crmsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Record and log every change without sending it to the CRM.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit the run summary as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let config = self.config.run_config(self.dry_run)?;
        let api = connect(&config.api);

        let mut report = crmsync_sync::run(&api, &config).context("sync aborted")?;
        report.summary.requests_made = Some(api.requests_made());

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report.summary)
                    .context("failed to serialize run summary")?
            );
        } else {
            print_summary(&report);
        }
        Ok(())
    }
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "")]
    label: &'static str,
    #[tabled(rename = "count")]
    count: String,
}

fn row(label: &'static str, count: impl ToString) -> SummaryRow {
    SummaryRow {
        label,
        count: count.to_string(),
    }
}

fn summary_rows(summary: &RunSummary) -> Vec<SummaryRow> {
    let mut rows = Vec::new();
    if summary.dry_run {
        rows.push(row("organizations to create", summary.orgs_planned));
        rows.push(row("persons to update", summary.persons_planned));
    } else {
        rows.push(row("organizations created", summary.orgs_created));
        rows.push(row("persons updated", summary.persons_updated));
    }
    rows.push(row("organizations failed", summary.orgs_failed));
    rows.push(row("persons unchanged", summary.persons_unchanged));
    rows.push(row("persons failed", summary.persons_failed));
    rows.push(row("persons skipped (org not found)", summary.persons_skipped));
    rows.push(row("persons not in CRM", summary.persons_not_in_crm));
    rows.push(row("persons sharing a CRM record", summary.persons_same_crm_person));
    rows.push(row("orphans tagged", summary.orphans_tagged));
    rows.push(row("orphans already tagged", summary.orphans_already_tagged));
    rows.push(row("orphans failed", summary.orphans_failed));
    rows.push(row("malformed source rows", summary.malformed_rows));
    if let Some(requests) = summary.requests_made {
        rows.push(row("API requests", requests));
    }
    rows
}

pub(crate) fn print_summary(report: &RunReport) {
    let summary = &report.summary;
    let prefix = if summary.dry_run { "[dry-run] " } else { "" };
    println!(
        "{prefix}crmsync v{} | connected as {} | {} source persons | {} source organizations",
        env!("CARGO_PKG_VERSION"),
        report.user,
        report.source.persons,
        report.source.organizations,
    );

    let mut table = Table::new(summary_rows(summary));
    table.with(Style::rounded());
    println!("{table}");

    for malformed in &report.malformed {
        println!("  {} {malformed}", "skipped".yellow());
    }

    let failures = summary.orgs_failed + summary.persons_failed + summary.orphans_failed;
    if failures > 0 {
        println!(
            "{}",
            format!("{failures} change(s) failed; see the audit logs for details").red()
        );
    } else {
        println!("{}", format!("{prefix}✓ done").green());
    }

    if let Some(paths) = &summary.audit {
        println!("  ✎  {}", paths.person_changes.display());
        println!("  ✎  {}", paths.orgs_created.display());
    }
}
