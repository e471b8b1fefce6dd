//! Source Snapshot Builder.
//!
//! Turns export rows (one per person/organization membership) into a
//! normalised model:
//!
//! - organizations keyed by [`NameKey`], first appearance wins, kept in
//!   export order;
//! - persons keyed by [`Email`], each with an ordered membership list where
//!   the first organization seen for that person is the merge-rule default.
//!
//! Rows without an email or organization identifier are skipped and
//! recorded as [`MalformedRecord`]s; they never abort the build.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use serde::Serialize;

use crate::error::{snapshot_io_err, MalformedRecord, SnapshotError};
use crate::types::{Email, Membership, NameKey, SourceOrg, SourceOrgId, SourcePerson};

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One raw export row, before normalisation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRow {
    pub org_id: String,
    pub org_name: String,
    pub email: String,
    pub name: String,
    pub user_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Normalised, read-only view of the source of truth.
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    orgs: Vec<SourceOrg>,
    org_index: HashMap<NameKey, usize>,
    persons: BTreeMap<Email, SourcePerson>,
    rows_read: usize,
    malformed: Vec<MalformedRecord>,
}

/// Counts reported after loading the export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub rows_read: usize,
    pub persons: usize,
    pub organizations: usize,
    pub multi_org_persons: usize,
    pub malformed_rows: usize,
}

impl SourceSnapshot {
    /// Organizations in first-appearance order.
    pub fn orgs(&self) -> impl Iterator<Item = &SourceOrg> {
        self.orgs.iter()
    }

    pub fn org(&self, key: &NameKey) -> Option<&SourceOrg> {
        self.org_index.get(key).map(|&i| &self.orgs[i])
    }

    /// Persons in ascending email order.
    pub fn persons(&self) -> impl Iterator<Item = &SourcePerson> {
        self.persons.values()
    }

    pub fn person(&self, email: &Email) -> Option<&SourcePerson> {
        self.persons.get(email)
    }

    pub fn contains_person(&self, email: &Email) -> bool {
        self.persons.contains_key(email)
    }

    pub fn malformed(&self) -> &[MalformedRecord] {
        &self.malformed
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            rows_read: self.rows_read,
            persons: self.persons.len(),
            organizations: self.orgs.len(),
            multi_org_persons: self
                .persons
                .values()
                .filter(|p| p.memberships.len() > 1)
                .count(),
            malformed_rows: self.malformed.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Incremental snapshot builder; feed rows in export order.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    snapshot: SourceSnapshot,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one export row found at line `row`.
    ///
    /// A malformed row is counted on the snapshot and also returned so the
    /// caller can report it; the builder stays usable either way.
    pub fn push(&mut self, row: usize, raw: &SourceRow) -> Result<(), MalformedRecord> {
        self.snapshot.rows_read += 1;
        match normalise(row, raw) {
            Ok(normalised) => {
                self.insert(normalised);
                Ok(())
            }
            Err(record) => {
                self.reject(record.clone());
                Err(record)
            }
        }
    }

    /// Count a row that could not be decoded into a [`SourceRow`] at all.
    pub fn skip(&mut self, record: MalformedRecord) {
        self.snapshot.rows_read += 1;
        self.reject(record);
    }

    fn reject(&mut self, record: MalformedRecord) {
        tracing::warn!(row = record.row, reason = %record.reason, "skipping malformed source row");
        self.snapshot.malformed.push(record);
    }

    pub fn finish(self) -> SourceSnapshot {
        self.snapshot
    }

    fn insert(&mut self, row: NormalisedRow) {
        let snapshot = &mut self.snapshot;
        let key = NameKey::from_name(&row.org_name);
        if !snapshot.org_index.contains_key(&key) {
            snapshot.org_index.insert(key, snapshot.orgs.len());
            snapshot.orgs.push(SourceOrg {
                id: row.org_id,
                name: row.org_name.clone(),
            });
        }

        let person = snapshot
            .persons
            .entry(row.email.clone())
            .or_insert_with(|| SourcePerson {
                email: row.email,
                name: row.name,
                user_id: row.user_id,
                memberships: Vec::new(),
            });
        if !person.memberships.iter().any(|m| m.org_id == row.org_id) {
            person.memberships.push(Membership {
                org_id: row.org_id,
                org_name: row.org_name,
            });
        }
    }
}

struct NormalisedRow {
    org_id: SourceOrgId,
    org_name: String,
    email: Email,
    name: String,
    user_id: Option<i64>,
}

fn normalise(row: usize, raw: &SourceRow) -> Result<NormalisedRow, MalformedRecord> {
    let malformed = |reason: String| MalformedRecord { row, reason };

    let email = Email::parse(&raw.email).ok_or_else(|| malformed("missing email".into()))?;

    let org_id_raw = raw.org_id.trim();
    if org_id_raw.is_empty() {
        return Err(malformed("missing organization id".into()));
    }
    let org_id = org_id_raw
        .parse::<i64>()
        .map(SourceOrgId)
        .map_err(|_| malformed(format!("invalid organization id '{org_id_raw}'")))?;

    let org_name = raw.org_name.trim();
    if org_name.is_empty() {
        return Err(malformed("missing organization name".into()));
    }

    // The user id is informational; an unparsable one is dropped, not fatal.
    let user_id = raw
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<i64>().ok());

    Ok(NormalisedRow {
        org_id,
        org_name: org_name.to_string(),
        email,
        name: raw.name.trim().to_string(),
        user_id,
    })
}

// ---------------------------------------------------------------------------
// CSV loading
// ---------------------------------------------------------------------------

const ORG_ID_COLUMNS: &[&str] = &["organization id", "organization_id", "org_id"];
const ORG_NAME_COLUMNS: &[&str] = &["organization name", "organization_name", "org_name"];
const EMAIL_COLUMNS: &[&str] = &["email"];
const NAME_COLUMNS: &[&str] = &["full name", "full_name", "name"];
const USER_ID_COLUMNS: &[&str] = &["user id", "user_id"];

struct Columns {
    org_id: usize,
    org_name: usize,
    email: usize,
    name: Option<usize>,
    user_id: Option<usize>,
}

impl Columns {
    fn resolve(headers: &StringRecord) -> Result<Self, SnapshotError> {
        let find = |aliases: &[&str]| {
            headers
                .iter()
                .position(|h| aliases.contains(&h.trim().to_lowercase().as_str()))
        };
        Ok(Self {
            org_id: find(ORG_ID_COLUMNS).ok_or(SnapshotError::MissingColumn {
                column: "Organization ID",
            })?,
            org_name: find(ORG_NAME_COLUMNS).ok_or(SnapshotError::MissingColumn {
                column: "Organization Name",
            })?,
            email: find(EMAIL_COLUMNS).ok_or(SnapshotError::MissingColumn { column: "Email" })?,
            name: find(NAME_COLUMNS),
            user_id: find(USER_ID_COLUMNS),
        })
    }

    fn row(&self, record: &StringRecord) -> SourceRow {
        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        SourceRow {
            org_id: field(self.org_id),
            org_name: field(self.org_name),
            email: field(self.email),
            name: self.name.map(field).unwrap_or_default(),
            user_id: self.user_id.map(field),
        }
    }
}

/// Build a snapshot from CSV data with a header row.
///
/// Only I/O failures and an unusable header row are fatal; a record that
/// cannot be parsed or decoded is skipped like any other malformed row.
pub fn read_csv<R: Read>(reader: R) -> Result<SourceSnapshot, SnapshotError> {
    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let columns = Columns::resolve(csv.headers()?)?;

    let mut builder = SnapshotBuilder::new();
    for (index, result) in csv.byte_records().enumerate() {
        let fallback_line = index + 2;
        let record = match result {
            Ok(record) => record,
            Err(err) if err.is_io_error() => return Err(err.into()),
            Err(err) => {
                let row = err.position().map_or(fallback_line, |p| p.line() as usize);
                builder.skip(MalformedRecord {
                    row,
                    reason: format!("unreadable row: {err}"),
                });
                continue;
            }
        };
        let line = record
            .position()
            .map_or(fallback_line, |p| p.line() as usize);
        match StringRecord::from_byte_record(record) {
            Ok(record) => {
                // Malformed rows are already recorded on the snapshot.
                let _ = builder.push(line, &columns.row(&record));
            }
            Err(err) => builder.skip(MalformedRecord {
                row: line,
                reason: format!("invalid UTF-8 in column {}", err.utf8_error().field() + 1),
            }),
        }
    }

    let snapshot = builder.finish();
    let stats = snapshot.stats();
    tracing::info!(
        rows = stats.rows_read,
        persons = stats.persons,
        organizations = stats.organizations,
        multi_org_persons = stats.multi_org_persons,
        malformed = stats.malformed_rows,
        "loaded source export"
    );
    Ok(snapshot)
}

/// Build a snapshot from the CSV export at `path`.
pub fn load_csv(path: &Path) -> Result<SourceSnapshot, SnapshotError> {
    let file = std::fs::File::open(path).map_err(|e| snapshot_io_err(path, e))?;
    read_csv(std::io::BufReader::new(file))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
