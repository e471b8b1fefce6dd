//! Domain types shared by the source and target sides of a reconciliation.
//!
//! Organizations match across systems by [`NameKey`] (trimmed, lowercased
//! display name); persons match by [`Email`] (trimmed, lowercased). Every
//! constructor normalises, so comparing two keys is always a direct `==`.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Case-normalised, trimmed email address; the cross-system person key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Email(String);

impl Email {
    /// Normalise `raw`. Returns `None` when nothing is left after trimming.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Normalised organization name; the only key shared by both systems
/// before an organization exists in the CRM.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NameKey(String);

impl NameKey {
    pub fn from_name(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Organization identifier in the source database export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceOrgId(pub i64);

impl fmt::Display for SourceOrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Organization identifier assigned by the CRM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetOrgId(pub u64);

impl fmt::Display for TargetOrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Person identifier assigned by the CRM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PersonId(pub u64);

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// API key of a CRM custom field (an opaque hash in Pipedrive).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldKey(pub String);

impl FieldKey {
    /// Key used in place of a field that a dry run would have created.
    pub fn dry_run_placeholder(field_name: &str) -> Self {
        Self(format!("dry-run:{field_name}"))
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with("dry-run:")
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for FieldKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Source-side entities
// ---------------------------------------------------------------------------

/// An organization as exported from the source database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOrg {
    pub id: SourceOrgId,
    pub name: String,
}

impl SourceOrg {
    pub fn key(&self) -> NameKey {
        NameKey::from_name(&self.name)
    }
}

/// One person→organization membership, in source row order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub org_id: SourceOrgId,
    pub org_name: String,
}

impl Membership {
    pub fn key(&self) -> NameKey {
        NameKey::from_name(&self.org_name)
    }

    /// `"<name> (<id>)"`
    pub fn render(&self) -> String {
        format!("{} ({})", self.org_name, self.org_id)
    }
}

/// A person as exported from the source database.
///
/// `memberships` keeps first-seen order; index 0 is the default assignment
/// used by the merge rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePerson {
    pub email: Email,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub memberships: Vec<Membership>,
}

impl SourcePerson {
    pub fn primary_membership(&self) -> Option<&Membership> {
        self.memberships.first()
    }

    pub fn has_org(&self, key: &NameKey) -> bool {
        self.memberships.iter().any(|m| &m.key() == key)
    }
}

// ---------------------------------------------------------------------------
// Target-side entities
// ---------------------------------------------------------------------------

/// An organization as it exists in the CRM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOrg {
    pub id: TargetOrgId,
    pub name: String,
}

impl TargetOrg {
    pub fn key(&self) -> NameKey {
        NameKey::from_name(&self.name)
    }
}

/// A person as it exists in the CRM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPerson {
    pub id: PersonId,
    pub name: String,
    pub emails: Vec<Email>,
    /// Primary organization assignment, if any.
    pub org_id: Option<TargetOrgId>,
    /// Current value of the "all organizations" custom field.
    pub all_orgs: Option<String>,
    pub tags: BTreeSet<String>,
}

impl TargetPerson {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Renders the "all organizations" field value: each membership as
/// `"<name> (<id>)"`, joined by `", "`, in membership order.
pub fn render_all_orgs(memberships: &[Membership]) -> String {
    memberships
        .iter()
        .map(Membership::render)
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn membership(name: &str, id: i64) -> Membership {
        Membership {
            org_id: SourceOrgId(id),
            org_name: name.to_string(),
        }
    }

    #[test]
    fn email_is_trimmed_and_lowercased() {
        let email = Email::parse("  Jane.Doe@Example.COM ").expect("email");
        assert_eq!(email.as_str(), "jane.doe@example.com");
        assert!(Email::parse("   ").is_none());
    }

    #[test]
    fn name_key_ignores_case_and_padding() {
        assert_eq!(NameKey::from_name(" Football West "), NameKey::from_name("football west"));
    }

    #[test]
    fn all_orgs_rendering_keeps_membership_order() {
        let rendered = render_all_orgs(&[
            membership("Football West", 44),
            membership("LIGR Demo", 347),
        ]);
        assert_eq!(rendered, "Football West (44), LIGR Demo (347)");
    }

    #[test]
    fn all_orgs_rendering_of_nothing_is_empty() {
        assert_eq!(render_all_orgs(&[]), "");
    }

    #[test]
    fn tag_lookup_is_case_insensitive() {
        let person = TargetPerson {
            id: PersonId(1),
            name: "Jane".into(),
            emails: vec![],
            org_id: None,
            all_orgs: None,
            tags: BTreeSet::from(["Not In DB".to_string()]),
        };
        assert!(person.has_tag("not in db"));
        assert!(!person.has_tag("vip"));
    }

    #[test]
    fn placeholder_field_key_is_recognised() {
        let key = FieldKey::dry_run_placeholder("All LIGR Organizations");
        assert!(key.is_placeholder());
        assert!(!FieldKey::from("abc123").is_placeholder());
    }
}
