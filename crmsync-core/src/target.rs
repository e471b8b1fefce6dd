//! Normalised model of the CRM's current state.
//!
//! Keyed the same way as the source snapshot (organizations by
//! [`NameKey`], persons by [`Email`]) so the reconcilers compare keys
//! directly. [`TargetSnapshot::replay`] applies a Mutation Record to the
//! model, which is how a run's audit trail is checked against the CRM.

use std::collections::{BTreeMap, HashMap};

use crate::mutation::{Mutation, MutationRecord, Outcome};
use crate::types::{Email, FieldKey, NameKey, PersonId, TargetOrg, TargetOrgId, TargetPerson};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSnapshot {
    orgs_by_name: BTreeMap<NameKey, TargetOrg>,
    orgs_by_id: HashMap<TargetOrgId, NameKey>,
    persons: BTreeMap<Email, TargetPerson>,
    /// Key of the "all organizations" person field, once resolved.
    pub all_orgs_field: Option<FieldKey>,
}

impl TargetSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an organization. Returns `false` (and keeps the existing
    /// entry) when the normalised name is already taken.
    pub fn insert_org(&mut self, org: TargetOrg) -> bool {
        let key = org.key();
        if self.orgs_by_name.contains_key(&key) {
            // Still resolvable by id for persons assigned to the duplicate.
            self.orgs_by_id.entry(org.id).or_insert(key);
            return false;
        }
        self.orgs_by_id.insert(org.id, key.clone());
        self.orgs_by_name.insert(key, org);
        true
    }

    /// Index `person` under each of its emails. Returns the emails that were
    /// already claimed by another person and therefore skipped.
    pub fn insert_person(&mut self, person: TargetPerson) -> Vec<Email> {
        let mut taken = Vec::new();
        for email in &person.emails {
            if self.persons.contains_key(email) {
                taken.push(email.clone());
            } else {
                self.persons.insert(email.clone(), person.clone());
            }
        }
        taken
    }

    pub fn org_by_name(&self, key: &NameKey) -> Option<&TargetOrg> {
        self.orgs_by_name.get(key)
    }

    /// The organization listed under `id`. For a duplicate-named CRM
    /// organization this is the entry that owns the name.
    pub fn org_by_id(&self, id: TargetOrgId) -> Option<&TargetOrg> {
        self.orgs_by_id
            .get(&id)
            .and_then(|key| self.orgs_by_name.get(key))
    }

    /// Name of the organization with `id`, if the CRM listed it.
    pub fn org_name(&self, id: TargetOrgId) -> Option<&str> {
        self.org_by_id(id).map(|o| o.name.as_str())
    }

    pub fn orgs(&self) -> impl Iterator<Item = &TargetOrg> {
        self.orgs_by_name.values()
    }

    pub fn person(&self, email: &Email) -> Option<&TargetPerson> {
        self.persons.get(email)
    }

    /// `(email, person)` pairs in ascending email order. A person with two
    /// emails appears twice.
    pub fn persons(&self) -> impl Iterator<Item = (&Email, &TargetPerson)> {
        self.persons.iter()
    }

    pub fn org_count(&self) -> usize {
        self.orgs_by_name.len()
    }

    pub fn person_count(&self) -> usize {
        self.persons.len()
    }

    /// Apply a record's effect to this model.
    ///
    /// Failed records change nothing. Planned and applied records both take
    /// effect, so a dry-run plan can be simulated the same way as a live run.
    /// Creating an organization needs `created_id`; without it the record is
    /// ignored.
    pub fn replay(&mut self, record: &MutationRecord) {
        if matches!(record.outcome, Outcome::Failed(_)) {
            return;
        }
        match &record.mutation {
            Mutation::CreateOrg { name, .. } => {
                if let Some(id) = record.created_id {
                    self.insert_org(TargetOrg {
                        id,
                        name: name.clone(),
                    });
                }
            }
            Mutation::SetOrgAssignment { person, after, .. } => {
                let org_id = after.id;
                self.update_person(*person, |p| p.org_id = org_id);
            }
            Mutation::SetAllOrgsField { person, after, .. } => {
                let value = after.clone();
                self.update_person(*person, |p| p.all_orgs = Some(value.clone()));
            }
            Mutation::AddTag { person, tag, .. } => {
                let tag = tag.clone();
                self.update_person(*person, |p| {
                    p.tags.insert(tag.clone());
                });
            }
        }
    }

    fn update_person(&mut self, id: PersonId, mut f: impl FnMut(&mut TargetPerson)) {
        for person in self.persons.values_mut().filter(|p| p.id == id) {
            f(person);
        }
    }
}
