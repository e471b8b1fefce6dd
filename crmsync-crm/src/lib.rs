//! # crmsync-crm
//!
//! CRM adapter: the [`CrmApi`] port, its Pipedrive HTTP implementation,
//! an in-memory implementation for tests, the [`PacedApi`] decorator that
//! paces and retries calls, and the [`MutationClient`] that executes
//! Mutation Records in dry-run or live mode.

pub mod api;
pub mod dispatch;
pub mod error;
pub mod memory;
pub mod paced;
pub mod pipedrive;

pub use api::{CrmApi, Page, PersonField, RemotePerson};
pub use dispatch::MutationClient;
pub use error::ApiError;
pub use memory::{CrmCall, InMemoryCrm, Operation};
pub use paced::{PacedApi, Pacer, RetryPolicy, Sleeper, ThreadSleeper};
pub use pipedrive::PipedriveClient;
