//! Organization Reconciler.
//!
//! Creates every source organization the CRM does not have (matched by
//! trimmed, case-insensitive name), then resolves each source organization
//! to the CRM organization a person can be assigned to.

use std::collections::{HashMap, HashSet};

use crmsync_core::{
    Mutation, MutationRecord, NameKey, OrgRef, Outcome, SourceSnapshot, TargetSnapshot,
};
use crmsync_crm::MutationClient;

use crate::audit::OrgCreation;

/// Create-org mutations for source organizations missing from the CRM, in
/// order of first appearance in the export, at most one per name.
pub fn plan_missing_orgs(source: &SourceSnapshot, target: &TargetSnapshot) -> Vec<Mutation> {
    let mut seen = HashSet::new();
    source
        .orgs()
        .filter(|org| seen.insert(org.key()))
        .filter(|org| target.org_by_name(&org.key()).is_none())
        .map(|org| Mutation::CreateOrg {
            name: org.name.trim().to_string(),
            source_id: org.id,
        })
        .collect()
}

/// Source organization name → CRM organization.
///
/// An organization a dry run would create resolves with `id: None`. One
/// whose creation failed does not resolve at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrgDirectory {
    entries: HashMap<NameKey, OrgRef>,
}

impl OrgDirectory {
    pub fn get(&self, key: &NameKey) -> Option<&OrgRef> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of reconciling organizations.
#[derive(Debug, Clone, Default)]
pub struct OrgReconciliation {
    pub records: Vec<MutationRecord>,
    pub log: Vec<OrgCreation>,
    pub directory: OrgDirectory,
}

/// Create missing organizations, fold the created ids back into `target`
/// and build the directory the Person Linker resolves against.
pub fn reconcile_orgs(
    source: &SourceSnapshot,
    target: &mut TargetSnapshot,
    client: &MutationClient<'_>,
) -> OrgReconciliation {
    let planned = plan_missing_orgs(source, target);
    tracing::info!(
        missing = planned.len(),
        existing = target.org_count(),
        "reconciling organizations"
    );

    let mut out = OrgReconciliation::default();
    let mut pending = HashSet::new();
    for mutation in planned {
        let Mutation::CreateOrg { name, .. } = &mutation else {
            continue;
        };
        let name = name.clone();
        let record = client.execute(mutation);
        match &record.outcome {
            Outcome::Planned => {
                pending.insert(NameKey::from_name(&name));
            }
            Outcome::Applied => target.replay(&record),
            Outcome::Failed(_) => {}
        }
        out.log.push(OrgCreation::from_record(&name, &record));
        out.records.push(record);
    }

    for org in source.orgs() {
        let key = org.key();
        let resolved = match target.org_by_name(&key) {
            Some(existing) => OrgRef {
                id: Some(existing.id),
                name: existing.name.clone(),
            },
            None if pending.contains(&key) => OrgRef {
                id: None,
                name: org.name.trim().to_string(),
            },
            None => continue,
        };
        out.directory.entries.insert(key, resolved);
    }
    out
}
