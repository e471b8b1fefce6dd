//! Orphan Tagger: CRM persons with no source record get the orphan tag.

use std::collections::HashSet;

use crmsync_core::{Mutation, MutationRecord, SourceSnapshot, TargetPerson, TargetSnapshot};
use crmsync_crm::MutationClient;

use crate::audit::{person_status, PersonChange};
use crate::linker::current_org;

#[derive(Debug, Clone, Default)]
pub struct OrphanReport {
    pub records: Vec<MutationRecord>,
    pub log: Vec<PersonChange>,
    pub already_tagged: usize,
}

/// A CRM person is an orphan when none of its emails is in the source.
pub fn is_orphan(person: &TargetPerson, source: &SourceSnapshot) -> bool {
    !person.emails.iter().any(|e| source.contains_person(e))
}

pub fn tag_orphans(
    source: &SourceSnapshot,
    target: &TargetSnapshot,
    tag: &str,
    client: &MutationClient<'_>,
) -> OrphanReport {
    let mut report = OrphanReport::default();
    let mut seen = HashSet::new();

    for (email, person) in target.persons() {
        if !seen.insert(person.id) || !is_orphan(person, source) {
            continue;
        }

        let mut records = Vec::new();
        let org_action = if person.has_tag(tag) {
            report.already_tagged += 1;
            "already tagged".to_string()
        } else {
            records.push(client.execute(Mutation::AddTag {
                person: person.id,
                email: email.clone(),
                tag: tag.to_string(),
            }));
            format!("tagged {tag}")
        };

        let org = current_org(person, target).map(|o| o.name).unwrap_or_default();
        report.log.push(PersonChange {
            email: email.to_string(),
            name: person.name.clone(),
            current_org: org.clone(),
            new_org: org,
            org_action,
            all_orgs: person.all_orgs.clone().unwrap_or_default(),
            status: person_status(&records),
        });
        report.records.extend(records);
    }

    tracing::info!(
        tagged = report.records.len(),
        already_tagged = report.already_tagged,
        "orphans processed"
    );
    report
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crmsync_core::{Email, PersonId, SnapshotBuilder, SourceRow};
    use crmsync_crm::InMemoryCrm;

    use super::*;

    fn source(emails: &[&str]) -> SourceSnapshot {
        let mut b = SnapshotBuilder::new();
        for (i, email) in emails.iter().enumerate() {
            b.push(
                i + 2,
                &SourceRow {
                    org_id: "1".into(),
                    org_name: "Acme".into(),
                    email: email.to_string(),
                    name: "P".into(),
                    user_id: None,
                },
            )
            .unwrap();
        }
        b.finish()
    }

    fn target_person(id: u64, emails: &[&str], tags: &[&str]) -> TargetPerson {
        TargetPerson {
            id: PersonId(id),
            name: format!("person {id}"),
            emails: emails.iter().filter_map(|e| Email::parse(e)).collect(),
            org_id: None,
            all_orgs: None,
            tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    #[test]
    fn tags_only_persons_missing_from_source() {
        let crm = InMemoryCrm::new();
        let client = MutationClient::new(&crm, true);
        let mut target = TargetSnapshot::new();
        target.insert_person(target_person(1, &["kept@x.com"], &[]));
        target.insert_person(target_person(2, &["gone@x.com"], &[]));

        let report = tag_orphans(&source(&["kept@x.com"]), &target, "not in db", &client);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].mutation.target(), "gone@x.com");
        assert_eq!(report.log[0].org_action, "tagged not in db");
        assert_eq!(report.log[0].status, "would apply");
    }

    #[test]
    fn already_tagged_orphan_is_not_tagged_again() {
        let crm = InMemoryCrm::new();
        let client = MutationClient::new(&crm, false);
        let mut target = TargetSnapshot::new();
        target.insert_person(target_person(2, &["gone@x.com"], &["Not In DB"]));

        let report = tag_orphans(&source(&[]), &target, "not in db", &client);
        assert!(report.records.is_empty());
        assert_eq!(report.already_tagged, 1);
        assert_eq!(report.log[0].status, "unchanged");
        assert!(crm.calls().is_empty());
    }

    #[test]
    fn person_matched_by_any_email_is_not_an_orphan() {
        let crm = InMemoryCrm::new();
        let client = MutationClient::new(&crm, true);
        let mut target = TargetSnapshot::new();
        target.insert_person(target_person(1, &["old@x.com", "new@x.com"], &[]));

        let report = tag_orphans(&source(&["new@x.com"]), &target, "not in db", &client);
        assert!(report.records.is_empty());
        assert!(report.log.is_empty());
    }

    #[test]
    fn orphan_with_two_emails_is_tagged_once() {
        let crm = InMemoryCrm::new();
        let client = MutationClient::new(&crm, true);
        let mut target = TargetSnapshot::new();
        target.insert_person(target_person(1, &["a@x.com", "b@x.com"], &[]));

        let report = tag_orphans(&source(&[]), &target, "not in db", &client);
        assert_eq!(report.records.len(), 1);
    }
}
