//! Mutation Records: the unit of planning, execution and audit.
//!
//! A [`Mutation`] is built identically in dry-run and live runs; only the
//! [`Outcome`] attached to it by the executor differs.

use std::fmt;

use serde::Serialize;

use crate::types::{Email, FieldKey, PersonId, SourceOrgId, TargetOrgId};

/// The four kinds of change the engine ever makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
    CreateOrg,
    SetOrgAssignment,
    SetAllOrgsField,
    AddTag,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::CreateOrg => write!(f, "create-org"),
            MutationKind::SetOrgAssignment => write!(f, "set-org-assignment"),
            MutationKind::SetAllOrgsField => write!(f, "set-all-orgs-field"),
            MutationKind::AddTag => write!(f, "add-tag"),
        }
    }
}

/// A CRM organization as referenced from a person assignment.
///
/// `id` is `None` only for an organization a dry run would have created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrgRef {
    pub id: Option<TargetOrgId>,
    pub name: String,
}

/// A single planned change against the CRM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Mutation {
    CreateOrg {
        name: String,
        source_id: SourceOrgId,
    },
    SetOrgAssignment {
        person: PersonId,
        email: Email,
        before: Option<OrgRef>,
        after: OrgRef,
    },
    SetAllOrgsField {
        person: PersonId,
        email: Email,
        field: FieldKey,
        before: Option<String>,
        after: String,
    },
    AddTag {
        person: PersonId,
        email: Email,
        tag: String,
    },
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::CreateOrg { .. } => MutationKind::CreateOrg,
            Mutation::SetOrgAssignment { .. } => MutationKind::SetOrgAssignment,
            Mutation::SetAllOrgsField { .. } => MutationKind::SetAllOrgsField,
            Mutation::AddTag { .. } => MutationKind::AddTag,
        }
    }

    /// Human-readable target entity: the organization name or person email.
    pub fn target(&self) -> String {
        match self {
            Mutation::CreateOrg { name, .. } => name.clone(),
            Mutation::SetOrgAssignment { email, .. }
            | Mutation::SetAllOrgsField { email, .. }
            | Mutation::AddTag { email, .. } => email.to_string(),
        }
    }

    pub fn before_value(&self) -> Option<String> {
        match self {
            Mutation::CreateOrg { .. } | Mutation::AddTag { .. } => None,
            Mutation::SetOrgAssignment { before, .. } => before.as_ref().map(|o| o.name.clone()),
            Mutation::SetAllOrgsField { before, .. } => before.clone(),
        }
    }

    pub fn after_value(&self) -> String {
        match self {
            Mutation::CreateOrg { name, .. } => name.clone(),
            Mutation::SetOrgAssignment { after, .. } => after.name.clone(),
            Mutation::SetAllOrgsField { after, .. } => after.clone(),
            Mutation::AddTag { tag, .. } => tag.clone(),
        }
    }
}

/// What happened to a Mutation Record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum Outcome {
    /// Recorded but not dispatched (dry run, or not yet executed).
    Planned,
    Applied,
    Failed(String),
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Planned => write!(f, "planned"),
            Outcome::Applied => write!(f, "applied"),
            Outcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// A mutation plus its outcome and, for applied organization creations,
/// the identifier the CRM assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationRecord {
    pub mutation: Mutation,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_id: Option<TargetOrgId>,
}

impl MutationRecord {
    pub fn planned(mutation: Mutation) -> Self {
        Self {
            mutation,
            outcome: Outcome::Planned,
            created_id: None,
        }
    }

    pub fn kind(&self) -> MutationKind {
        self.mutation.kind()
    }
}
