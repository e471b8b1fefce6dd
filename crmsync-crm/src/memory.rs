//! In-memory CRM implementing [`CrmApi`].
//!
//! Holds organizations, persons, person fields and labels in a `RefCell`,
//! records every mutating call, and can be told to fail an operation a
//! given number of times. Used by the engine's tests and for offline runs.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use crmsync_core::{FieldKey, PersonId, TargetOrg, TargetOrgId};

use crate::api::{CrmApi, Page, PersonField, RemotePerson};
use crate::error::ApiError;

/// Every [`CrmApi`] operation, for failure injection and attempt counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CurrentUser,
    ListOrganizations,
    ListPersons,
    ListPersonFields,
    CreatePersonField,
    CreateOrganization,
    SetPersonOrg,
    SetPersonField,
    AddPersonTag,
}

/// A mutating call that reached the CRM and succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrmCall {
    CreatePersonField(String),
    CreateOrganization(String),
    SetPersonOrg(PersonId, TargetOrgId),
    SetPersonField(PersonId, FieldKey, String),
    AddPersonTag(PersonId, String),
}

#[derive(Debug, Default)]
struct State {
    user: String,
    orgs: Vec<TargetOrg>,
    persons: Vec<RemotePerson>,
    fields: Vec<PersonField>,
    labels: Vec<String>,
    next_id: u64,
    calls: Vec<CrmCall>,
    attempts: HashMap<Operation, u32>,
    failures: HashMap<Operation, (u32, ApiError)>,
}

#[derive(Debug)]
pub struct InMemoryCrm {
    state: RefCell<State>,
}

impl Default for InMemoryCrm {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCrm {
    /// An empty CRM that already defines the label used for orphan tagging.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                user: "In-memory operator".to_string(),
                labels: vec![crmsync_core::config::DEFAULT_ORPHAN_TAG.to_string()],
                next_id: 1,
                ..State::default()
            }),
        }
    }

    // -- seeding ------------------------------------------------------------

    pub fn add_org(&self, name: &str) -> TargetOrgId {
        let mut state = self.state.borrow_mut();
        let id = TargetOrgId(state.next_id());
        state.orgs.push(TargetOrg {
            id,
            name: name.to_string(),
        });
        id
    }

    pub fn add_person(&self, name: &str, emails: &[&str], org: Option<TargetOrgId>) -> PersonId {
        let mut state = self.state.borrow_mut();
        let id = PersonId(state.next_id());
        state.persons.push(RemotePerson {
            id,
            name: name.to_string(),
            emails: emails.iter().map(|e| (*e).to_string()).collect(),
            org_id: org,
            custom_fields: BTreeMap::new(),
            tags: Vec::new(),
        });
        id
    }

    pub fn add_field(&self, name: &str) -> FieldKey {
        let mut state = self.state.borrow_mut();
        let key = FieldKey(format!("field_{}", state.next_id()));
        state.fields.push(PersonField {
            key: key.clone(),
            name: name.to_string(),
        });
        key
    }

    pub fn set_field_value(&self, person: PersonId, field: &FieldKey, value: &str) {
        if let Some(p) = self.state.borrow_mut().person_mut(person) {
            p.custom_fields.insert(field.0.clone(), value.to_string());
        }
    }

    pub fn tag_person(&self, person: PersonId, tag: &str) {
        if let Some(p) = self.state.borrow_mut().person_mut(person) {
            if !p.tags.iter().any(|t| t == tag) {
                p.tags.push(tag.to_string());
            }
        }
    }

    /// Remove every defined label, so tagging fails as it would against a
    /// CRM without the label configured.
    pub fn clear_labels(&self) {
        self.state.borrow_mut().labels.clear();
    }

    // -- failure injection --------------------------------------------------

    /// Make the next `times` calls of `operation` fail with `error`.
    pub fn fail_times(&self, operation: Operation, times: u32, error: ApiError) {
        self.state
            .borrow_mut()
            .failures
            .insert(operation, (times, error));
    }

    // -- inspection ---------------------------------------------------------

    /// Successful mutating calls, in order.
    pub fn calls(&self) -> Vec<CrmCall> {
        self.state.borrow().calls.clone()
    }

    /// Calls of `operation` received, failed ones included.
    pub fn attempts(&self, operation: Operation) -> u32 {
        self.state
            .borrow()
            .attempts
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    pub fn person(&self, id: PersonId) -> Option<RemotePerson> {
        self.state
            .borrow()
            .persons
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn orgs(&self) -> Vec<TargetOrg> {
        self.state.borrow().orgs.clone()
    }

    fn enter(&self, operation: Operation) -> Result<std::cell::RefMut<'_, State>, ApiError> {
        let mut state = self.state.borrow_mut();
        *state.attempts.entry(operation).or_insert(0) += 1;
        if let Some((remaining, error)) = state.failures.get_mut(&operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }
        Ok(state)
    }
}

impl State {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn person_mut(&mut self, id: PersonId) -> Option<&mut RemotePerson> {
        self.persons.iter_mut().find(|p| p.id == id)
    }

    fn require_person(&mut self, id: PersonId) -> Result<&mut RemotePerson, ApiError> {
        self.person_mut(id)
            .ok_or_else(|| ApiError::from_status(404, &format!("person {id} not found"), None))
    }
}

fn page<T: Clone>(items: &[T], start: u32, limit: u32) -> Page<T> {
    let begin = (start as usize).min(items.len());
    let end = begin.saturating_add(limit as usize).min(items.len());
    Page {
        items: items[begin..end].to_vec(),
        next_start: (end < items.len()).then_some(end as u32),
    }
}

impl CrmApi for InMemoryCrm {
    fn current_user(&self) -> Result<String, ApiError> {
        let state = self.enter(Operation::CurrentUser)?;
        Ok(state.user.clone())
    }

    fn list_organizations(&self, start: u32, limit: u32) -> Result<Page<TargetOrg>, ApiError> {
        let state = self.enter(Operation::ListOrganizations)?;
        Ok(page(&state.orgs, start, limit))
    }

    fn list_persons(&self, start: u32, limit: u32) -> Result<Page<RemotePerson>, ApiError> {
        let state = self.enter(Operation::ListPersons)?;
        Ok(page(&state.persons, start, limit))
    }

    fn list_person_fields(&self) -> Result<Vec<PersonField>, ApiError> {
        let state = self.enter(Operation::ListPersonFields)?;
        Ok(state.fields.clone())
    }

    fn create_person_field(&self, name: &str) -> Result<PersonField, ApiError> {
        let mut state = self.enter(Operation::CreatePersonField)?;
        let field = PersonField {
            key: FieldKey(format!("field_{}", state.next_id())),
            name: name.to_string(),
        };
        state.fields.push(field.clone());
        state.calls.push(CrmCall::CreatePersonField(name.to_string()));
        Ok(field)
    }

    fn create_organization(&self, name: &str) -> Result<TargetOrg, ApiError> {
        let mut state = self.enter(Operation::CreateOrganization)?;
        let org = TargetOrg {
            id: TargetOrgId(state.next_id()),
            name: name.to_string(),
        };
        state.orgs.push(org.clone());
        state.calls.push(CrmCall::CreateOrganization(name.to_string()));
        Ok(org)
    }

    fn set_person_org(&self, person: PersonId, org: TargetOrgId) -> Result<(), ApiError> {
        let mut state = self.enter(Operation::SetPersonOrg)?;
        if !state.orgs.iter().any(|o| o.id == org) {
            return Err(ApiError::from_status(400, &format!("organization {org} does not exist"), None));
        }
        state.require_person(person)?.org_id = Some(org);
        state.calls.push(CrmCall::SetPersonOrg(person, org));
        Ok(())
    }

    fn set_person_field(
        &self,
        person: PersonId,
        field: &FieldKey,
        value: &str,
    ) -> Result<(), ApiError> {
        let mut state = self.enter(Operation::SetPersonField)?;
        state
            .require_person(person)?
            .custom_fields
            .insert(field.0.clone(), value.to_string());
        state
            .calls
            .push(CrmCall::SetPersonField(person, field.clone(), value.to_string()));
        Ok(())
    }

    fn add_person_tag(&self, person: PersonId, tag: &str) -> Result<(), ApiError> {
        let mut state = self.enter(Operation::AddPersonTag)?;
        if !state.labels.iter().any(|l| l.eq_ignore_ascii_case(tag)) {
            return Err(ApiError::permanent(format!(
                "label '{tag}' is not defined for persons"
            )));
        }
        let p = state.require_person(person)?;
        if !p.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            p.tags.push(tag.to_string());
        }
        state.calls.push(CrmCall::AddPersonTag(person, tag.to_string()));
        Ok(())
    }
}
