//! CRM port: the operations the reconciler consumes.
//!
//! Implementations: [`crate::pipedrive::PipedriveClient`] (HTTP),
//! [`crate::memory::InMemoryCrm`] (tests, offline runs) and the
//! [`crate::paced::PacedApi`] decorator that adds pacing and retries to
//! either of them.

use std::collections::BTreeMap;

use crmsync_core::{FieldKey, PersonId, TargetOrg, TargetOrgId};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Offset of the next page; `None` when the collection is exhausted.
    pub next_start: Option<u32>,
}

/// A person record as the CRM returns it, before normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePerson {
    pub id: PersonId,
    pub name: String,
    /// Raw email values, in CRM order.
    pub emails: Vec<String>,
    pub org_id: Option<TargetOrgId>,
    /// String-valued fields keyed by field key.
    pub custom_fields: BTreeMap<String, String>,
    /// Tag (label) names.
    pub tags: Vec<String>,
}

/// A person field definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonField {
    pub key: FieldKey,
    pub name: String,
}

/// Operations consumed from the CRM.
///
/// All calls are blocking; pacing and retries are layered on top by
/// [`crate::paced::PacedApi`].
pub trait CrmApi {
    /// Name of the authenticated user; used as a connection check.
    fn current_user(&self) -> Result<String, ApiError>;

    fn list_organizations(&self, start: u32, limit: u32) -> Result<Page<TargetOrg>, ApiError>;

    fn list_persons(&self, start: u32, limit: u32) -> Result<Page<RemotePerson>, ApiError>;

    fn list_person_fields(&self) -> Result<Vec<PersonField>, ApiError>;

    /// Create a free-text person field.
    fn create_person_field(&self, name: &str) -> Result<PersonField, ApiError>;

    fn create_organization(&self, name: &str) -> Result<TargetOrg, ApiError>;

    fn set_person_org(&self, person: PersonId, org: TargetOrgId) -> Result<(), ApiError>;

    fn set_person_field(
        &self,
        person: PersonId,
        field: &FieldKey,
        value: &str,
    ) -> Result<(), ApiError>;

    /// Attach `tag` to the person; a tag already present is not an error.
    fn add_person_tag(&self, person: PersonId, tag: &str) -> Result<(), ApiError>;
}

impl<T: CrmApi + ?Sized> CrmApi for &T {
    fn current_user(&self) -> Result<String, ApiError> {
        (**self).current_user()
    }

    fn list_organizations(&self, start: u32, limit: u32) -> Result<Page<TargetOrg>, ApiError> {
        (**self).list_organizations(start, limit)
    }

    fn list_persons(&self, start: u32, limit: u32) -> Result<Page<RemotePerson>, ApiError> {
        (**self).list_persons(start, limit)
    }

    fn list_person_fields(&self) -> Result<Vec<PersonField>, ApiError> {
        (**self).list_person_fields()
    }

    fn create_person_field(&self, name: &str) -> Result<PersonField, ApiError> {
        (**self).create_person_field(name)
    }

    fn create_organization(&self, name: &str) -> Result<TargetOrg, ApiError> {
        (**self).create_organization(name)
    }

    fn set_person_org(&self, person: PersonId, org: TargetOrgId) -> Result<(), ApiError> {
        (**self).set_person_org(person, org)
    }

    fn set_person_field(
        &self,
        person: PersonId,
        field: &FieldKey,
        value: &str,
    ) -> Result<(), ApiError> {
        (**self).set_person_field(person, field, value)
    }

    fn add_person_tag(&self, person: PersonId, tag: &str) -> Result<(), ApiError> {
        (**self).add_person_tag(person, tag)
    }
}
