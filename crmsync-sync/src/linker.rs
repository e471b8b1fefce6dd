//! Person Linker.
//!
//! For every source person the CRM already knows, decide the primary
//! organization assignment with the merge rule and bring the "all
//! organizations" field up to date. Persons missing from the CRM are left
//! alone; creating them is not this tool's job.
//!
//! Merge rule: a current assignment that names one of the person's source
//! organizations is kept. Anything else is replaced by the person's first
//! source organization, in export order.

use std::collections::HashSet;

use serde::Serialize;

use crmsync_core::{
    render_all_orgs, Email, FieldKey, Mutation, MutationRecord, NameKey, OrgRef, SourcePerson,
    SourceSnapshot, TargetPerson, TargetSnapshot,
};
use crmsync_crm::MutationClient;

use crate::audit::{person_status, PersonChange};
use crate::orgs::OrgDirectory;

/// Outcome of the merge rule for one person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// The current organization is one of the source organizations.
    Keep(OrgRef),
    /// Move the person to their first source organization.
    Reassign { before: Option<OrgRef>, after: OrgRef },
    /// The first source organization has no CRM counterpart.
    Unresolved { before: Option<OrgRef>, wanted: String },
}

impl Assignment {
    pub fn org_action(&self) -> &'static str {
        match self {
            Assignment::Keep(_) => "kept",
            Assignment::Reassign { before: Some(_), .. } => "updated",
            Assignment::Reassign { before: None, .. } => "assigned",
            Assignment::Unresolved { .. } => "skipped (org not found)",
        }
    }
}

/// The person's current CRM organization, if any.
pub fn current_org(person: &TargetPerson, target: &TargetSnapshot) -> Option<OrgRef> {
    let id = person.org_id?;
    let name = target
        .org_name(id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{id}"));
    Some(OrgRef { id: Some(id), name })
}

/// Apply the merge rule. `None` for a person with no source organization.
pub fn decide_assignment(
    person: &SourcePerson,
    current: Option<OrgRef>,
    directory: &OrgDirectory,
) -> Option<Assignment> {
    let primary = person.primary_membership()?;
    if let Some(current) = current.as_ref() {
        if person.has_org(&NameKey::from_name(&current.name)) {
            return Some(Assignment::Keep(current.clone()));
        }
    }
    let assignment = match directory.get(&primary.key()) {
        Some(after) => Assignment::Reassign {
            before: current,
            after: after.clone(),
        },
        None => Assignment::Unresolved {
            before: current,
            wanted: primary.org_name.clone(),
        },
    };
    Some(assignment)
}

/// Org action for a source person whose CRM record was already linked
/// through another of its emails.
pub const SAME_CRM_PERSON: &str = "skipped (same CRM person)";

/// A source person the CRM has no record of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingPerson {
    pub email: Email,
    pub name: String,
    /// `User ID` from the export, to find the person in the source database.
    pub user_id: Option<i64>,
}

/// Records and log rows produced by linking.
#[derive(Debug, Clone, Default)]
pub struct LinkReport {
    pub records: Vec<MutationRecord>,
    pub log: Vec<PersonChange>,
    pub not_in_crm: Vec<MissingPerson>,
    pub same_crm_person: usize,
}

/// Link every source person, in ascending email order.
pub fn link_persons(
    source: &SourceSnapshot,
    target: &TargetSnapshot,
    directory: &OrgDirectory,
    field: &FieldKey,
    client: &MutationClient<'_>,
) -> LinkReport {
    let mut report = LinkReport::default();
    let mut linked = HashSet::new();

    for person in source.persons() {
        let Some(existing) = target.person(&person.email) else {
            tracing::debug!(email = %person.email, user_id = ?person.user_id, "not in CRM; skipped");
            report.not_in_crm.push(MissingPerson {
                email: person.email.clone(),
                name: person.name.clone(),
                user_id: person.user_id,
            });
            continue;
        };
        let current = current_org(existing, target);

        // A CRM person carrying several source emails is linked once.
        if !linked.insert(existing.id) {
            tracing::info!(email = %person.email, person = %existing.id, "CRM person already linked via another email");
            report.same_crm_person += 1;
            let org = current.map(|o| o.name).unwrap_or_default();
            report.log.push(PersonChange {
                email: person.email.to_string(),
                name: person.name.clone(),
                current_org: org.clone(),
                new_org: org,
                org_action: SAME_CRM_PERSON.to_string(),
                all_orgs: render_all_orgs(&person.memberships),
                status: person_status(&[]),
            });
            continue;
        }

        let Some(assignment) = decide_assignment(person, current.clone(), directory) else {
            continue;
        };
        let rendered = render_all_orgs(&person.memberships);

        let mut records = Vec::new();
        if let Assignment::Reassign { before, after } = &assignment {
            records.push(client.execute(Mutation::SetOrgAssignment {
                person: existing.id,
                email: person.email.clone(),
                before: before.clone(),
                after: after.clone(),
            }));
        }
        if let Assignment::Unresolved { wanted, .. } = &assignment {
            tracing::warn!(email = %person.email, org = %wanted, "organization not found in CRM; assignment skipped");
        }
        if existing.all_orgs.as_deref() != Some(rendered.as_str()) {
            records.push(client.execute(Mutation::SetAllOrgsField {
                person: existing.id,
                email: person.email.clone(),
                field: field.clone(),
                before: existing.all_orgs.clone(),
                after: rendered.clone(),
            }));
        }

        let current_name = current.map(|o| o.name).unwrap_or_default();
        let new_org = match &assignment {
            Assignment::Keep(org) => org.name.clone(),
            Assignment::Reassign { after, .. } => after.name.clone(),
            Assignment::Unresolved { .. } => current_name.clone(),
        };
        report.log.push(PersonChange {
            email: person.email.to_string(),
            name: person.name.clone(),
            current_org: current_name,
            new_org,
            org_action: assignment.org_action().to_string(),
            all_orgs: rendered,
            status: person_status(&records),
        });
        report.records.extend(records);
    }

    tracing::info!(
        linked = linked.len(),
        not_in_crm = report.not_in_crm.len(),
        same_crm_person = report.same_crm_person,
        mutations = report.records.len(),
        "persons linked"
    );
    report
}
