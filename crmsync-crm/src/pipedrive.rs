//! Pipedrive v1 REST adapter for the [`CrmApi`] port.
//!
//! Every response uses the `{ success, data, error, additional_data }`
//! envelope. Person tags map onto Pipedrive person labels: label options
//! come from the `label` person field and each person's label ids from the
//! person listing. Both are cached for the life of the client, so tagging a
//! person is a single `PUT`.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crmsync_core::{ApiConfig, ApiToken, FieldKey, PersonId, TargetOrg, TargetOrgId};

use crate::api::{CrmApi, Page, PersonField, RemotePerson};
use crate::error::ApiError;

/// Blocking Pipedrive client. Performs exactly one HTTP request per call.
///
/// Label names are resolved from what [`CrmApi::list_person_fields`] and
/// [`CrmApi::list_persons`] returned earlier; a call that needs labels
/// before those listings fails instead of fetching them on the side.
pub struct PipedriveClient {
    agent: ureq::Agent,
    base_url: String,
    token: ApiToken,
    labels: RefCell<Option<Vec<LabelOption>>>,
    person_labels: RefCell<HashMap<PersonId, Vec<u64>>>,
}

#[derive(Debug, Clone, Deserialize)]
struct LabelOption {
    id: u64,
    label: String,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    error: Option<String>,
    additional_data: Option<AdditionalData>,
}

#[derive(Debug, Deserialize)]
struct AdditionalData {
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    more_items_in_collection: bool,
    next_start: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    name: String,
}

#[derive(Debug, Deserialize)]
struct OrgData {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct FieldData {
    key: String,
    name: String,
    #[serde(default)]
    options: Option<Vec<LabelOption>>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

impl PipedriveClient {
    pub fn new(config: &ApiConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.http_timeout)
            .build();
        Self {
            agent,
            base_url: config.base_url.clone(),
            token: config.api_token.clone(),
            labels: RefCell::new(None),
            person_labels: RefCell::new(HashMap::new()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Envelope<T>, ApiError> {
        let mut request = self
            .agent
            .get(&self.url(path))
            .query("api_token", self.token.expose());
        for (key, value) in query {
            request = request.query(key, value);
        }
        tracing::debug!(path, "GET");
        read_envelope(request.call())
    }

    fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<Envelope<T>, ApiError> {
        tracing::debug!(path, "POST");
        let request = self
            .agent
            .post(&self.url(path))
            .query("api_token", self.token.expose());
        read_envelope(request.send_json(body))
    }

    fn put(&self, path: &str, body: Value) -> Result<(), ApiError> {
        tracing::debug!(path, "PUT");
        let request = self
            .agent
            .put(&self.url(path))
            .query("api_token", self.token.expose());
        read_envelope::<Value>(request.send_json(body)).map(|_| ())
    }

    fn list_page<T: DeserializeOwned>(
        &self,
        path: &str,
        start: u32,
        limit: u32,
    ) -> Result<(Vec<T>, Option<u32>), ApiError> {
        let envelope: Envelope<Vec<T>> = self.get(
            path,
            &[("start", start.to_string()), ("limit", limit.to_string())],
        )?;
        let next_start = envelope
            .additional_data
            .and_then(|a| a.pagination)
            .filter(|p| p.more_items_in_collection)
            .map(|p| p.next_start.unwrap_or(start + limit));
        Ok((envelope.data.unwrap_or_default(), next_start))
    }

    fn label_options(&self) -> Result<Vec<LabelOption>, ApiError> {
        self.labels
            .borrow()
            .clone()
            .ok_or_else(|| {
                ApiError::permanent("person labels not loaded; list person fields first")
            })
    }

    fn label_names(&self, ids: &[u64]) -> Result<Vec<String>, ApiError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let options = self.label_options()?;
        Ok(ids
            .iter()
            .map(|id| {
                options
                    .iter()
                    .find(|o| o.id == *id)
                    .map_or_else(|| format!("label:{id}"), |o| o.label.clone())
            })
            .collect())
    }
}

impl CrmApi for PipedriveClient {
    fn current_user(&self) -> Result<String, ApiError> {
        let envelope: Envelope<UserData> = self.get("users/me", &[])?;
        envelope
            .data
            .map(|u| u.name)
            .ok_or_else(|| ApiError::permanent("users/me returned no data"))
    }

    fn list_organizations(&self, start: u32, limit: u32) -> Result<Page<TargetOrg>, ApiError> {
        let (items, next_start) = self.list_page::<OrgData>("organizations", start, limit)?;
        Ok(Page {
            items: items
                .into_iter()
                .map(|o| TargetOrg {
                    id: TargetOrgId(o.id),
                    name: o.name,
                })
                .collect(),
            next_start,
        })
    }

    fn list_persons(&self, start: u32, limit: u32) -> Result<Page<RemotePerson>, ApiError> {
        let (raw, next_start) = self.list_page::<Map<String, Value>>("persons", start, limit)?;
        let mut items = Vec::with_capacity(raw.len());
        for object in raw {
            let mut person = parse_person(&object)?;
            let ids = label_ids(&object);
            person.tags = self.label_names(&ids)?;
            self.person_labels.borrow_mut().insert(person.id, ids);
            items.push(person);
        }
        Ok(Page { items, next_start })
    }

    fn list_person_fields(&self) -> Result<Vec<PersonField>, ApiError> {
        let envelope: Envelope<Vec<FieldData>> = self.get("personFields", &[])?;
        let fields = envelope.data.unwrap_or_default();
        let options = fields
            .iter()
            .find(|f| f.key == "label")
            .and_then(|f| f.options.clone())
            .unwrap_or_default();
        *self.labels.borrow_mut() = Some(options);
        Ok(fields
            .into_iter()
            .map(|f| PersonField {
                key: FieldKey(f.key),
                name: f.name,
            })
            .collect())
    }

    fn create_person_field(&self, name: &str) -> Result<PersonField, ApiError> {
        let envelope: Envelope<FieldData> = self.post(
            "personFields",
            json!({ "name": name, "field_type": "text" }),
        )?;
        let field = envelope
            .data
            .ok_or_else(|| ApiError::permanent("personFields returned no data"))?;
        Ok(PersonField {
            key: FieldKey(field.key),
            name: field.name,
        })
    }

    fn create_organization(&self, name: &str) -> Result<TargetOrg, ApiError> {
        let envelope: Envelope<OrgData> = self.post("organizations", json!({ "name": name }))?;
        let org = envelope
            .data
            .ok_or_else(|| ApiError::permanent("organizations returned no data"))?;
        Ok(TargetOrg {
            id: TargetOrgId(org.id),
            name: org.name,
        })
    }

    fn set_person_org(&self, person: PersonId, org: TargetOrgId) -> Result<(), ApiError> {
        self.put(&format!("persons/{person}"), json!({ "org_id": org.0 }))
    }

    fn set_person_field(
        &self,
        person: PersonId,
        field: &FieldKey,
        value: &str,
    ) -> Result<(), ApiError> {
        let mut body = Map::new();
        body.insert(field.0.clone(), Value::String(value.to_string()));
        self.put(&format!("persons/{person}"), Value::Object(body))
    }

    fn add_person_tag(&self, person: PersonId, tag: &str) -> Result<(), ApiError> {
        let options = self.label_options()?;
        let option = options
            .iter()
            .find(|o| o.label.eq_ignore_ascii_case(tag))
            .ok_or_else(|| {
                ApiError::permanent(format!("label '{tag}' is not defined for persons"))
            })?;

        // `label_ids` replaces the whole set, so the listed labels are resent.
        let mut ids = self
            .person_labels
            .borrow()
            .get(&person)
            .cloned()
            .ok_or_else(|| {
                ApiError::permanent(format!("labels of person {person} were not listed"))
            })?;
        if !ids.contains(&option.id) {
            ids.push(option.id);
        }
        self.put(&format!("persons/{person}"), json!({ "label_ids": ids }))?;
        self.person_labels.borrow_mut().insert(person, ids);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Response handling
// ---------------------------------------------------------------------------

fn read_envelope<T: DeserializeOwned>(
    result: Result<ureq::Response, ureq::Error>,
) -> Result<Envelope<T>, ApiError> {
    let response = result.map_err(map_transport_error)?;
    let envelope: Envelope<T> = response
        .into_json()
        .map_err(|e| ApiError::permanent(format!("malformed response body: {e}")))?;
    if !envelope.success {
        let detail = envelope
            .error
            .unwrap_or_else(|| "request was not successful".to_string());
        return Err(ApiError::permanent(detail));
    }
    Ok(envelope)
}

fn map_transport_error(err: ureq::Error) -> ApiError {
    match err {
        ureq::Error::Status(status, response) => {
            let retry_after = response
                .header("Retry-After")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.into_string().unwrap_or_default();
            ApiError::from_status(status, &error_detail(&body), retry_after)
        }
        ureq::Error::Transport(transport) => ApiError::retryable(transport.to_string()),
    }
}

/// The `error` field of a JSON error body, or the body itself, shortened.
fn error_detail(body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    detail.chars().take(200).collect()
}

fn parse_person(object: &Map<String, Value>) -> Result<RemotePerson, ApiError> {
    let id = object
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| ApiError::permanent("person without numeric id"))?;

    let emails = match object.get("email") {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| match v {
                Value::Object(o) => o.get("value").and_then(Value::as_str).map(str::to_string),
                Value::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    };

    // `org_id` is either a bare id or an object with a `value` id.
    let org_id = match object.get("org_id") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::Object(o)) => o.get("value").and_then(Value::as_u64),
        _ => None,
    }
    .map(TargetOrgId);

    let custom_fields: BTreeMap<String, String> = object
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect();

    Ok(RemotePerson {
        id: PersonId(id),
        name: object
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        emails,
        org_id,
        custom_fields,
        tags: Vec::new(),
    })
}

/// Label ids from `label_ids` (array) or the older single `label` field.
fn label_ids(object: &Map<String, Value>) -> Vec<u64> {
    match object.get("label_ids") {
        Some(Value::Array(values)) => values.iter().filter_map(Value::as_u64).collect(),
        _ => object
            .get("label")
            .and_then(Value::as_u64)
            .into_iter()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn parses_person_with_object_org_and_email_list() {
        let person = parse_person(&object(json!({
            "id": 17,
            "name": "Jane Doe",
            "email": [{"value": "jane@x.com", "primary": true}, {"value": "j@y.com"}],
            "org_id": {"value": 44, "name": "Football West"},
            "abc123": "Football West (44)",
            "phone": [],
        })))
        .expect("parse");

        assert_eq!(person.id, PersonId(17));
        assert_eq!(person.emails, ["jane@x.com", "j@y.com"]);
        assert_eq!(person.org_id, Some(TargetOrgId(44)));
        assert_eq!(
            person.custom_fields.get("abc123").map(String::as_str),
            Some("Football West (44)")
        );
    }

    #[test]
    fn parses_person_with_bare_org_id_and_no_email() {
        let person = parse_person(&object(json!({ "id": 3, "name": "X", "org_id": 9 }))).unwrap();
        assert_eq!(person.org_id, Some(TargetOrgId(9)));
        assert!(person.emails.is_empty());
    }

    #[test]
    fn person_without_id_is_rejected() {
        assert!(parse_person(&object(json!({ "name": "X" }))).is_err());
    }

    #[test]
    fn label_ids_accept_both_shapes() {
        assert_eq!(label_ids(&object(json!({ "label_ids": [1, 2] }))), [1, 2]);
        assert_eq!(label_ids(&object(json!({ "label": 5 }))), [5]);
        assert!(label_ids(&object(json!({ "label": null }))).is_empty());
    }

    #[test]
    fn error_detail_prefers_json_error_field() {
        assert_eq!(error_detail(r#"{"success":false,"error":"Bad token"}"#), "Bad token");
        assert_eq!(error_detail("  gateway timeout "), "gateway timeout");
    }

    #[test]
    fn tagging_before_listing_fails_without_a_request() {
        // Nothing listens here; reaching the network would be a transport error.
        let client = PipedriveClient::new(&ApiConfig {
            api_token: ApiToken::new("t"),
            base_url: "http://127.0.0.1:9".into(),
            request_delay: Duration::ZERO,
            retry: crmsync_core::RetrySettings::default(),
            page_size: 500,
            http_timeout: Duration::from_secs(1),
        });
        let err = client.add_person_tag(PersonId(1), "not in db").unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("not loaded"), "got: {err}");
    }
}
