//! Run Coordinator.
//!
//! Order: connection check, target fetch, source load, field resolution,
//! organizations (applied or simulated, created ids folded back), person
//! linking, orphan tagging, audit flush. Nothing is mutated and nothing is
//! logged when the target state cannot be fetched.

use chrono::Local;
use serde::Serialize;

use crmsync_core::source::load_csv;
use crmsync_core::{
    MalformedRecord, MutationRecord, Outcome, RunConfig, SourceSnapshot, SourceStats,
    TargetSnapshot,
};
use crmsync_crm::{CrmApi, MutationClient};

use crate::audit::{AuditLog, AuditPaths};
use crate::error::{FetchError, SyncError};
use crate::fetch::{check_connection, ensure_all_orgs_field, fetch_target};
use crate::linker::{link_persons, MissingPerson, SAME_CRM_PERSON};
use crate::orgs::reconcile_orgs;
use crate::orphans::tag_orphans;

/// The part of [`RunConfig`] the engine itself reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub page_size: u32,
    pub all_orgs_field: String,
    pub orphan_tag: String,
}

impl SyncOptions {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            dry_run: config.dry_run,
            page_size: config.api.page_size,
            all_orgs_field: config.all_orgs_field.clone(),
            orphan_tag: config.orphan_tag.clone(),
        }
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub orgs_created: usize,
    pub orgs_planned: usize,
    pub orgs_failed: usize,
    pub persons_updated: usize,
    pub persons_planned: usize,
    pub persons_unchanged: usize,
    pub persons_failed: usize,
    pub persons_skipped: usize,
    pub persons_not_in_crm: usize,
    /// Source persons whose CRM record was linked through another email.
    pub persons_same_crm_person: usize,
    pub orphans_tagged: usize,
    pub orphans_already_tagged: usize,
    pub orphans_failed: usize,
    pub malformed_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_made: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditPaths>,
}

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub user: String,
    pub source: SourceStats,
    pub malformed: Vec<MalformedRecord>,
    /// Source persons with no CRM record; left untouched.
    pub not_in_crm: Vec<MissingPerson>,
    /// CRM state as fetched, before any mutation.
    pub initial_target: TargetSnapshot,
    /// Every Mutation Record, in execution order.
    pub records: Vec<MutationRecord>,
    pub audit: AuditLog,
    pub summary: RunSummary,
}

impl RunReport {
    /// Records that changed (or would change) the CRM.
    pub fn effective_records(&self) -> impl Iterator<Item = &MutationRecord> {
        self.records.iter().filter(|r| !r.outcome.is_failed())
    }
}

/// Fetch the CRM state and reconcile it against an already-built source
/// snapshot. Writes no files.
pub fn sync_snapshot(
    api: &dyn CrmApi,
    source: &SourceSnapshot,
    options: &SyncOptions,
) -> Result<RunReport, FetchError> {
    let user = check_connection(api)?;
    let target = fetch_target(api, options.page_size, &options.all_orgs_field)?;
    reconcile(api, user, source, target, options)
}

/// Full run from configuration: fetch, read the export, reconcile and write
/// both audit logs into `config.out_dir`.
pub fn run(api: &dyn CrmApi, config: &RunConfig) -> Result<RunReport, SyncError> {
    let started = Local::now();
    let options = SyncOptions::from_config(config);
    if options.dry_run {
        tracing::info!("[dry-run] no changes will be sent to the CRM");
    }

    let user = check_connection(api)?;
    let target = fetch_target(api, options.page_size, &options.all_orgs_field)?;
    let source = load_csv(&config.source_path)?;
    let mut report = reconcile(api, user, &source, target, &options)?;

    let paths = AuditPaths::in_dir(&config.out_dir, started);
    report.audit.write(&paths)?;
    report.summary.audit = Some(paths);
    Ok(report)
}

fn reconcile(
    api: &dyn CrmApi,
    user: String,
    source: &SourceSnapshot,
    mut target: TargetSnapshot,
    options: &SyncOptions,
) -> Result<RunReport, FetchError> {
    let initial_target = target.clone();
    let field = ensure_all_orgs_field(api, &mut target, &options.all_orgs_field, options.dry_run)?;
    let client = MutationClient::new(api, options.dry_run);

    let orgs = reconcile_orgs(source, &mut target, &client);
    let linked = link_persons(source, &target, &orgs.directory, &field, &client);
    let orphans = tag_orphans(source, &target, &options.orphan_tag, &client);

    let mut summary = RunSummary {
        dry_run: options.dry_run,
        persons_not_in_crm: linked.not_in_crm.len(),
        persons_same_crm_person: linked.same_crm_person,
        orphans_already_tagged: orphans.already_tagged,
        malformed_rows: source.malformed().len(),
        ..RunSummary::default()
    };
    for record in &orgs.records {
        match record.outcome {
            Outcome::Planned => summary.orgs_planned += 1,
            Outcome::Applied => summary.orgs_created += 1,
            Outcome::Failed(_) => summary.orgs_failed += 1,
        }
    }
    for row in linked.log.iter().filter(|r| r.org_action != SAME_CRM_PERSON) {
        match row.status.as_str() {
            "unchanged" => summary.persons_unchanged += 1,
            "would apply" => summary.persons_planned += 1,
            "applied" => summary.persons_updated += 1,
            _ => summary.persons_failed += 1,
        }
        if row.org_action == "skipped (org not found)" {
            summary.persons_skipped += 1;
        }
    }
    for record in &orphans.records {
        if record.outcome.is_failed() {
            summary.orphans_failed += 1;
        } else {
            summary.orphans_tagged += 1;
        }
    }

    let mut audit = AuditLog {
        persons: linked.log,
        orgs: orgs.log,
    };
    audit.persons.extend(orphans.log);

    let mut records = orgs.records;
    records.extend(linked.records);
    records.extend(orphans.records);

    tracing::info!(
        mutations = records.len(),
        failed = records.iter().filter(|r| r.outcome.is_failed()).count(),
        dry_run = options.dry_run,
        "reconciliation finished"
    );

    Ok(RunReport {
        user,
        source: source.stats(),
        malformed: source.malformed().to_vec(),
        not_in_crm: linked.not_in_crm,
        initial_target,
        records,
        audit,
        summary,
    })
}
