//! Audit logs: one row per person considered, one per organization created.
//!
//! Both files are written whether or not the run is a dry run. Each is
//! written to a `.tmp` sibling first and renamed into place.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use crmsync_core::{MutationRecord, Outcome};

use crate::error::{io_err, SyncError};

/// A row of the person-change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonChange {
    pub email: String,
    pub name: String,
    pub current_org: String,
    pub new_org: String,
    pub org_action: String,
    pub all_orgs: String,
    pub status: String,
}

/// A row of the organization-creation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrgCreation {
    pub name: String,
    pub pd_id: String,
    pub status: String,
}

impl OrgCreation {
    pub fn from_record(name: &str, record: &MutationRecord) -> Self {
        let status = match &record.outcome {
            Outcome::Planned => "would create".to_string(),
            Outcome::Applied => "created".to_string(),
            Outcome::Failed(reason) => format!("failed: {reason}"),
        };
        Self {
            name: name.to_string(),
            pd_id: record.created_id.map(|id| id.to_string()).unwrap_or_default(),
            status,
        }
    }
}

/// Person-log status for the records produced for one person.
pub fn person_status(records: &[MutationRecord]) -> String {
    if let Some(reason) = records.iter().find_map(|r| match &r.outcome {
        Outcome::Failed(reason) => Some(reason),
        _ => None,
    }) {
        return format!("failed: {reason}");
    }
    if records.is_empty() {
        "unchanged".to_string()
    } else if records.iter().all(|r| r.outcome == Outcome::Planned) {
        "would apply".to_string()
    } else {
        "applied".to_string()
    }
}

/// Everything a run logs, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditLog {
    pub persons: Vec<PersonChange>,
    pub orgs: Vec<OrgCreation>,
}

/// Where the two audit files were written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditPaths {
    pub person_changes: PathBuf,
    pub orgs_created: PathBuf,
}

impl AuditPaths {
    pub fn in_dir(dir: &Path, started: DateTime<Local>) -> Self {
        let stamp = started.format("%Y%m%d_%H%M%S");
        Self {
            person_changes: dir.join(format!("person_changes_{stamp}.csv")),
            orgs_created: dir.join(format!("orgs_created_{stamp}.csv")),
        }
    }
}

impl AuditLog {
    /// Write both files; creates `paths`' parent directories as needed.
    pub fn write(&self, paths: &AuditPaths) -> Result<(), SyncError> {
        write_csv(&paths.person_changes, &self.persons, PERSON_HEADER)?;
        write_csv(&paths.orgs_created, &self.orgs, ORG_HEADER)?;
        tracing::info!(
            persons = self.persons.len(),
            orgs = self.orgs.len(),
            "audit logs written to {} and {}",
            paths.person_changes.display(),
            paths.orgs_created.display()
        );
        Ok(())
    }
}

const PERSON_HEADER: &[&str] = &[
    "email",
    "name",
    "current_org",
    "new_org",
    "org_action",
    "all_orgs",
    "status",
];
const ORG_HEADER: &[&str] = &["name", "pd_id", "status"];

fn write_csv<T: Serialize>(path: &Path, rows: &[T], header: &[&str]) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));

    // Header written explicitly so an empty log still carries its columns.
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(&tmp)?;
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|e| io_err(&tmp, e))?;
    drop(writer);

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use crmsync_core::{Mutation, SourceOrgId, TargetOrgId};
    use tempfile::TempDir;

    use super::*;

    fn create(outcome: Outcome, id: Option<u64>) -> MutationRecord {
        MutationRecord {
            mutation: Mutation::CreateOrg {
                name: "Acme".into(),
                source_id: SourceOrgId(7),
            },
            outcome,
            created_id: id.map(TargetOrgId),
        }
    }

    #[test]
    fn org_status_vocabulary() {
        assert_eq!(OrgCreation::from_record("Acme", &create(Outcome::Planned, None)).status, "would create");
        let created = OrgCreation::from_record("Acme", &create(Outcome::Applied, Some(42)));
        assert_eq!((created.pd_id.as_str(), created.status.as_str()), ("42", "created"));
        let failed = OrgCreation::from_record("Acme", &create(Outcome::Failed("HTTP 400".into()), None));
        assert_eq!((failed.pd_id.as_str(), failed.status.as_str()), ("", "failed: HTTP 400"));
    }

    #[test]
    fn person_status_prefers_first_failure() {
        let records = vec![
            create(Outcome::Applied, Some(1)),
            create(Outcome::Failed("first".into()), None),
            create(Outcome::Failed("second".into()), None),
        ];
        assert_eq!(person_status(&records), "failed: first");
        assert_eq!(person_status(&[]), "unchanged");
        assert_eq!(person_status(&[create(Outcome::Planned, None)]), "would apply");
        assert_eq!(person_status(&[create(Outcome::Applied, Some(1))]), "applied");
    }

    #[test]
    fn file_names_carry_the_run_timestamp() {
        let started = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 1).unwrap();
        let paths = AuditPaths::in_dir(Path::new("out"), started);
        assert_eq!(paths.person_changes, Path::new("out/person_changes_20240309_140501.csv"));
        assert_eq!(paths.orgs_created, Path::new("out/orgs_created_20240309_140501.csv"));
    }

    #[test]
    fn writes_headers_and_rows_without_leaving_tmp_files() {
        let dir = TempDir::new().expect("tmp");
        let paths = AuditPaths {
            person_changes: dir.path().join("logs/people.csv"),
            orgs_created: dir.path().join("logs/orgs.csv"),
        };
        let log = AuditLog {
            persons: vec![PersonChange {
                email: "jane@x.com".into(),
                name: "Jane".into(),
                current_org: "".into(),
                new_org: "Acme".into(),
                org_action: "assigned".into(),
                all_orgs: "Acme (7), Beta (8)".into(),
                status: "applied".into(),
            }],
            orgs: vec![],
        };
        log.write(&paths).expect("write");

        let people = std::fs::read_to_string(&paths.person_changes).expect("read");
        assert_eq!(
            people,
            "email,name,current_org,new_org,org_action,all_orgs,status\n\
             jane@x.com,Jane,,Acme,assigned,\"Acme (7), Beta (8)\",applied\n"
        );
        let orgs = std::fs::read_to_string(&paths.orgs_created).expect("read");
        assert_eq!(orgs, "name,pd_id,status\n");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("logs"))
            .expect("dir")
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
