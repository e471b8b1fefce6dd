//! Mutation client: turns a [`Mutation`] into a [`MutationRecord`].
//!
//! The same mutation is built in dry-run and live runs; only dispatch
//! differs. A dry run records `Planned` without touching the CRM. A live
//! failure is recorded as `Failed` and never aborts the run.

use crmsync_core::{Mutation, MutationRecord, Outcome, TargetOrgId};

use crate::api::CrmApi;

pub struct MutationClient<'a> {
    api: &'a dyn CrmApi,
    dry_run: bool,
}

impl<'a> MutationClient<'a> {
    pub fn new(api: &'a dyn CrmApi, dry_run: bool) -> Self {
        Self { api, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn execute(&self, mutation: Mutation) -> MutationRecord {
        if self.dry_run {
            tracing::info!(
                "[dry-run] would {} {}: {} -> {}",
                mutation.kind(),
                mutation.target(),
                mutation.before_value().as_deref().unwrap_or("-"),
                mutation.after_value()
            );
            return MutationRecord::planned(mutation);
        }

        let mut record = MutationRecord::planned(mutation);
        match self.dispatch(&record.mutation) {
            Ok(created_id) => {
                tracing::info!(
                    "{} {}: {}",
                    record.kind(),
                    record.mutation.target(),
                    record.mutation.after_value()
                );
                record.outcome = Outcome::Applied;
                record.created_id = created_id;
            }
            Err(reason) => {
                tracing::warn!(
                    kind = %record.kind(),
                    target = %record.mutation.target(),
                    "mutation failed: {reason}"
                );
                record.outcome = Outcome::Failed(reason);
            }
        }
        record
    }

    fn dispatch(&self, mutation: &Mutation) -> Result<Option<TargetOrgId>, String> {
        match mutation {
            Mutation::CreateOrg { name, .. } => self
                .api
                .create_organization(name)
                .map(|org| Some(org.id))
                .map_err(|e| e.to_string()),
            Mutation::SetOrgAssignment { person, after, .. } => {
                let org = after
                    .id
                    .ok_or_else(|| "organization has no CRM id".to_string())?;
                self.api
                    .set_person_org(*person, org)
                    .map(|()| None)
                    .map_err(|e| e.to_string())
            }
            Mutation::SetAllOrgsField {
                person,
                field,
                after,
                ..
            } => {
                if field.is_placeholder() {
                    return Err(format!("field '{field}' was never created"));
                }
                self.api
                    .set_person_field(*person, field, after)
                    .map(|()| None)
                    .map_err(|e| e.to_string())
            }
            Mutation::AddTag { person, tag, .. } => self
                .api
                .add_person_tag(*person, tag)
                .map(|()| None)
                .map_err(|e| e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::memory::{CrmCall, InMemoryCrm, Operation};
    use crmsync_core::{Email, FieldKey, OrgRef, SourceOrgId};

    fn email() -> Email {
        Email::parse("jane@x.com").unwrap()
    }

    #[test]
    fn dry_run_records_planned_without_calls() {
        let crm = InMemoryCrm::new();
        let client = MutationClient::new(&crm, true);
        let record = client.execute(Mutation::CreateOrg {
            name: "Acme".into(),
            source_id: SourceOrgId(1),
        });
        assert_eq!(record.outcome, Outcome::Planned);
        assert_eq!(record.created_id, None);
        assert!(crm.calls().is_empty());
        assert_eq!(crm.attempts(Operation::CreateOrganization), 0);
    }

    #[test]
    fn created_org_id_is_captured() {
        let crm = InMemoryCrm::new();
        let client = MutationClient::new(&crm, false);
        let record = client.execute(Mutation::CreateOrg {
            name: "Acme".into(),
            source_id: SourceOrgId(1),
        });
        assert_eq!(record.outcome, Outcome::Applied);
        let id = record.created_id.expect("created id");
        assert!(crm.orgs().iter().any(|o| o.id == id && o.name == "Acme"));
    }

    #[test]
    fn assignment_without_org_id_fails_without_call() {
        let crm = InMemoryCrm::new();
        let person = crm.add_person("Jane", &["jane@x.com"], None);
        let client = MutationClient::new(&crm, false);
        let record = client.execute(Mutation::SetOrgAssignment {
            person,
            email: email(),
            before: None,
            after: OrgRef {
                id: None,
                name: "Acme".into(),
            },
        });
        assert!(record.outcome.is_failed());
        assert_eq!(crm.attempts(Operation::SetPersonOrg), 0);
    }

    #[test]
    fn placeholder_field_is_never_written() {
        let crm = InMemoryCrm::new();
        let person = crm.add_person("Jane", &["jane@x.com"], None);
        let client = MutationClient::new(&crm, false);
        let record = client.execute(Mutation::SetAllOrgsField {
            person,
            email: email(),
            field: FieldKey::dry_run_placeholder("All LIGR Organizations"),
            before: None,
            after: "Acme (1)".into(),
        });
        assert!(record.outcome.is_failed());
        assert!(crm.calls().is_empty());
    }

    #[test]
    fn api_failure_is_recorded_not_raised() {
        let crm = InMemoryCrm::new();
        let org = crm.add_org("Acme");
        let person = crm.add_person("Jane", &["jane@x.com"], None);
        crm.fail_times(Operation::SetPersonOrg, 1, ApiError::permanent("forbidden"));
        let client = MutationClient::new(&crm, false);
        let record = client.execute(Mutation::SetOrgAssignment {
            person,
            email: email(),
            before: None,
            after: OrgRef {
                id: Some(org),
                name: "Acme".into(),
            },
        });
        assert_eq!(record.outcome, Outcome::Failed("API error: forbidden".into()));
    }

    #[test]
    fn applied_tag_reaches_crm() {
        let crm = InMemoryCrm::new();
        let person = crm.add_person("Jane", &["jane@x.com"], None);
        let client = MutationClient::new(&crm, false);
        let record = client.execute(Mutation::AddTag {
            person,
            email: email(),
            tag: "not in db".into(),
        });
        assert_eq!(record.outcome, Outcome::Applied);
        assert_eq!(crm.calls(), vec![CrmCall::AddPersonTag(person, "not in db".into())]);
    }
}
