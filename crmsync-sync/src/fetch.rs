//! Target State Fetcher.
//!
//! Pages through every CRM organization and person and normalises them
//! into a [`TargetSnapshot`]. The fetch is all-or-nothing: any failure
//! discards what was read so far.

use std::collections::BTreeSet;

use crmsync_core::{Email, FieldKey, TargetPerson, TargetSnapshot};
use crmsync_crm::{CrmApi, Page, RemotePerson};

use crate::error::{FetchError, FetchStage};

/// Ask the CRM who we are. Returns the authenticated user's name.
pub fn check_connection(api: &dyn CrmApi) -> Result<String, FetchError> {
    let user = api
        .current_user()
        .map_err(FetchError::at(FetchStage::Connection))?;
    tracing::info!(user = %user, "connected to CRM");
    Ok(user)
}

/// Read the full target state.
///
/// `all_orgs_field` is the display name of the "all organizations" person
/// field; when the CRM has it, its key is stored on the snapshot and each
/// person's current value is read from it.
pub fn fetch_target(
    api: &dyn CrmApi,
    page_size: u32,
    all_orgs_field: &str,
) -> Result<TargetSnapshot, FetchError> {
    let mut snapshot = TargetSnapshot::new();

    snapshot.all_orgs_field = find_field(api, all_orgs_field)?;

    let orgs = fetch_all(FetchStage::Organizations, page_size, |start, limit| {
        api.list_organizations(start, limit)
    })?;
    let fetched_orgs = orgs.len();
    for org in orgs {
        let id = org.id;
        if !snapshot.insert_org(org) {
            tracing::warn!(org_id = %id, "duplicate organization name in CRM; first one wins");
        }
    }

    let persons = fetch_all(FetchStage::Persons, page_size, |start, limit| {
        api.list_persons(start, limit)
    })?;
    let fetched_persons = persons.len();
    for remote in persons {
        let Some(person) = normalise_person(remote, snapshot.all_orgs_field.as_ref()) else {
            continue;
        };
        let id = person.id;
        for email in snapshot.insert_person(person) {
            tracing::warn!(person = %id, email = %email, "email already belongs to another CRM person; ignored");
        }
    }

    tracing::info!(
        organizations = fetched_orgs,
        persons = fetched_persons,
        "fetched CRM state"
    );
    Ok(snapshot)
}

/// Key of the "all organizations" field, creating it when missing.
///
/// A dry run never creates the field; it returns a placeholder key that the
/// mutation client refuses to write.
pub fn ensure_all_orgs_field(
    api: &dyn CrmApi,
    snapshot: &mut TargetSnapshot,
    name: &str,
    dry_run: bool,
) -> Result<FieldKey, FetchError> {
    if let Some(key) = &snapshot.all_orgs_field {
        return Ok(key.clone());
    }
    let key = if dry_run {
        tracing::info!("[dry-run] would create person field '{name}'");
        FieldKey::dry_run_placeholder(name)
    } else {
        let field = api
            .create_person_field(name)
            .map_err(FetchError::at(FetchStage::PersonFields))?;
        tracing::info!(key = %field.key, "created person field '{name}'");
        field.key
    };
    snapshot.all_orgs_field = Some(key.clone());
    Ok(key)
}

fn find_field(api: &dyn CrmApi, name: &str) -> Result<Option<FieldKey>, FetchError> {
    let fields = api
        .list_person_fields()
        .map_err(FetchError::at(FetchStage::PersonFields))?;
    let wanted = name.trim();
    let found = fields
        .into_iter()
        .find(|f| f.name.trim().eq_ignore_ascii_case(wanted))
        .map(|f| f.key);
    match &found {
        Some(key) => tracing::debug!(key = %key, "found person field '{name}'"),
        None => tracing::info!("person field '{name}' does not exist yet"),
    }
    Ok(found)
}

fn fetch_all<T>(
    stage: FetchStage,
    page_size: u32,
    mut list: impl FnMut(u32, u32) -> Result<Page<T>, crmsync_crm::ApiError>,
) -> Result<Vec<T>, FetchError> {
    let mut items = Vec::new();
    let mut start = 0;
    loop {
        let page = list(start, page_size).map_err(FetchError::at(stage))?;
        items.extend(page.items);
        tracing::debug!(%stage, fetched = items.len(), "page fetched");
        match page.next_start {
            Some(next) if next > start => start = next,
            _ => break,
        }
    }
    Ok(items)
}

fn normalise_person(remote: RemotePerson, field: Option<&FieldKey>) -> Option<TargetPerson> {
    let mut emails: Vec<Email> = Vec::new();
    for email in remote.emails.iter().filter_map(|e| Email::parse(e)) {
        if !emails.contains(&email) {
            emails.push(email);
        }
    }
    if emails.is_empty() {
        tracing::debug!(person = %remote.id, "CRM person has no email; not matchable");
        return None;
    }
    let all_orgs = field
        .and_then(|key| remote.custom_fields.get(&key.0))
        .filter(|v| !v.is_empty())
        .cloned();
    Some(TargetPerson {
        id: remote.id,
        name: remote.name,
        emails,
        org_id: remote.org_id,
        all_orgs,
        tags: remote.tags.into_iter().collect::<BTreeSet<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use crmsync_crm::{ApiError, InMemoryCrm, Operation};

    use super::*;

    #[test]
    fn pages_until_exhausted() {
        let crm = InMemoryCrm::new();
        for i in 0..5 {
            crm.add_org(&format!("Org {i}"));
            crm.add_person(&format!("P {i}"), &[format!("p{i}@x.com").as_str()], None);
        }
        let snap = fetch_target(&crm, 2, "All Orgs").expect("fetch");
        assert_eq!(snap.org_count(), 5);
        assert_eq!(snap.person_count(), 5);
        assert_eq!(crm.attempts(Operation::ListOrganizations), 3);
    }

    #[test]
    fn reads_field_value_by_display_name() {
        let crm = InMemoryCrm::new();
        let key = crm.add_field("All LIGR Organizations");
        let p = crm.add_person("Jane", &["Jane@X.com"], None);
        crm.set_field_value(p, &key, "Acme (1)");
        let snap = fetch_target(&crm, 500, "all ligr organizations").expect("fetch");
        assert_eq!(snap.all_orgs_field, Some(key));
        let jane = snap.person(&Email::parse("jane@x.com").unwrap()).unwrap();
        assert_eq!(jane.all_orgs.as_deref(), Some("Acme (1)"));
    }

    #[test]
    fn persons_failure_aborts_the_fetch() {
        let crm = InMemoryCrm::new();
        crm.add_person("A", &["a@x.com"], None);
        crm.fail_times(Operation::ListPersons, 1, ApiError::permanent("forbidden"));
        let err = fetch_target(&crm, 500, "All Orgs").unwrap_err();
        assert_eq!(err.stage, FetchStage::Persons);
    }

    #[test]
    fn persons_without_email_are_not_indexed() {
        let crm = InMemoryCrm::new();
        crm.add_person("Nobody", &[], None);
        let snap = fetch_target(&crm, 500, "All Orgs").expect("fetch");
        assert_eq!(snap.person_count(), 0);
    }

    #[test]
    fn dry_run_field_is_a_placeholder_and_not_created() {
        let crm = InMemoryCrm::new();
        let mut snap = fetch_target(&crm, 500, "All Orgs").expect("fetch");
        let key = ensure_all_orgs_field(&crm, &mut snap, "All Orgs", true).expect("field");
        assert!(key.is_placeholder());
        assert!(crm.calls().is_empty());
    }

    #[test]
    fn live_run_creates_missing_field_once() {
        let crm = InMemoryCrm::new();
        let mut snap = fetch_target(&crm, 500, "All Orgs").expect("fetch");
        let key = ensure_all_orgs_field(&crm, &mut snap, "All Orgs", false).expect("field");
        let again = ensure_all_orgs_field(&crm, &mut snap, "All Orgs", false).expect("field");
        assert_eq!(key, again);
        assert_eq!(crm.attempts(Operation::CreatePersonField), 1);
    }
}
