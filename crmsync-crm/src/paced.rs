//! Pacing and bounded retry for every CRM call.
//!
//! The CRM rate limit is a global budget shared by all call types, so calls
//! are spaced by a fixed minimum interval rather than run concurrently.
//! Retryable failures back off exponentially (`base * 2^attempt`, capped),
//! honouring a server `Retry-After` hint when one is given.

use std::cell::Cell;
use std::time::{Duration, Instant};

use crmsync_core::{ApiConfig, FieldKey, PersonId, RetrySettings, TargetOrg, TargetOrgId};

use crate::api::{CrmApi, Page, PersonField, RemotePerson};
use crate::error::ApiError;

// ---------------------------------------------------------------------------
// Sleeping
// ---------------------------------------------------------------------------

/// Blocking delay source; swapped out in tests.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// ---------------------------------------------------------------------------
// Pacer
// ---------------------------------------------------------------------------

/// Enforces a minimum spacing between consecutive calls.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last: Cell<Option<Instant>>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Cell::new(None),
        }
    }

    /// The interval that keeps `requests` calls inside every `window`.
    pub fn for_budget(requests: u32, window: Duration) -> Self {
        Self::new(window / requests.max(1))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until the interval since the previous call has elapsed, then
    /// mark a new call as started.
    pub fn wait(&self, sleeper: &dyn Sleeper) {
        if let Some(last) = self.last.get() {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                sleeper.sleep(self.interval - elapsed);
            }
        }
        self.last.set(Some(Instant::now()));
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    settings: RetrySettings,
}

impl RetryPolicy {
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    pub fn max_retries(&self) -> u32 {
        self.settings.max_retries
    }

    /// Whether a failure on zero-based `attempt` should be retried.
    pub fn should_retry(&self, attempt: u32, error: &ApiError) -> bool {
        attempt < self.settings.max_retries && error.is_retryable()
    }

    /// Backoff before retrying after zero-based `attempt`.
    pub fn delay_for(&self, attempt: u32, error: &ApiError) -> Duration {
        if let ApiError::Retryable {
            retry_after: Some(hint),
            ..
        } = error
        {
            return (*hint).min(self.settings.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt);
        self.settings
            .base_delay
            .saturating_mul(factor)
            .min(self.settings.max_delay)
    }
}

// ---------------------------------------------------------------------------
// PacedApi
// ---------------------------------------------------------------------------

/// [`CrmApi`] decorator adding pacing, bounded retry and request counting.
pub struct PacedApi<A> {
    inner: A,
    pacer: Pacer,
    retry: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
    requests: Cell<u64>,
}

impl<A: CrmApi> PacedApi<A> {
    pub fn new(inner: A, request_delay: Duration, retry: RetrySettings) -> Self {
        Self {
            inner,
            pacer: Pacer::new(request_delay),
            retry: RetryPolicy::new(retry),
            sleeper: Box::new(ThreadSleeper),
            requests: Cell::new(0),
        }
    }

    pub fn from_config(inner: A, config: &ApiConfig) -> Self {
        Self::new(inner, config.request_delay, config.retry)
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Requests dispatched so far, retries included.
    pub fn requests_made(&self) -> u64 {
        self.requests.get()
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    fn call<T>(&self, operation: &str, f: impl Fn(&A) -> Result<T, ApiError>) -> Result<T, ApiError> {
        let mut attempt: u32 = 0;
        loop {
            self.pacer.wait(self.sleeper.as_ref());
            self.requests.set(self.requests.get() + 1);

            let error = match f(&self.inner) {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(operation, attempts = attempt + 1, "succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if self.retry.should_retry(attempt, &error) {
                let delay = self.retry.delay_for(attempt, &error);
                tracing::debug!(
                    operation,
                    attempt = attempt + 1,
                    max_retries = self.retry.max_retries(),
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after transient error"
                );
                self.sleeper.sleep(delay);
                attempt += 1;
                continue;
            }

            if error.is_retryable() {
                tracing::warn!(operation, attempts = attempt + 1, error = %error, "retries exhausted");
                return Err(ApiError::RetriesExhausted {
                    attempts: attempt + 1,
                    last: Box::new(error),
                });
            }
            return Err(error);
        }
    }
}

impl<A: CrmApi> CrmApi for PacedApi<A> {
    fn current_user(&self) -> Result<String, ApiError> {
        self.call("current_user", |api| api.current_user())
    }

    fn list_organizations(&self, start: u32, limit: u32) -> Result<Page<TargetOrg>, ApiError> {
        self.call("list_organizations", |api| api.list_organizations(start, limit))
    }

    fn list_persons(&self, start: u32, limit: u32) -> Result<Page<RemotePerson>, ApiError> {
        self.call("list_persons", |api| api.list_persons(start, limit))
    }

    fn list_person_fields(&self) -> Result<Vec<PersonField>, ApiError> {
        self.call("list_person_fields", |api| api.list_person_fields())
    }

    fn create_person_field(&self, name: &str) -> Result<PersonField, ApiError> {
        self.call("create_person_field", |api| api.create_person_field(name))
    }

    fn create_organization(&self, name: &str) -> Result<TargetOrg, ApiError> {
        self.call("create_organization", |api| api.create_organization(name))
    }

    fn set_person_org(&self, person: PersonId, org: TargetOrgId) -> Result<(), ApiError> {
        self.call("set_person_org", |api| api.set_person_org(person, org))
    }

    fn set_person_field(
        &self,
        person: PersonId,
        field: &FieldKey,
        value: &str,
    ) -> Result<(), ApiError> {
        self.call("set_person_field", |api| api.set_person_field(person, field, value))
    }

    fn add_person_tag(&self, person: PersonId, tag: &str) -> Result<(), ApiError> {
        self.call("add_person_tag", |api| api.add_person_tag(person, tag))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
