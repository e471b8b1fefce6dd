//! crmsync core library — domain types, Mutation Records, source snapshot,
//! target snapshot model and run configuration.
//!
//! - [`types`] — keys and entities on both sides
//! - [`source`] — Source Snapshot Builder
//! - [`target`] — [`TargetSnapshot`] and record replay
//! - [`mutation`] — [`Mutation`], [`MutationRecord`], [`Outcome`]
//! - [`config`] — [`RunConfig`] and its layers
//! - [`error`] — [`SnapshotError`], [`ConfigError`], [`MalformedRecord`]

pub mod config;
pub mod error;
pub mod mutation;
pub mod source;
pub mod target;
pub mod types;

pub use config::{ApiConfig, ApiToken, ConfigLayer, RetrySettings, RunConfig};
pub use error::{ConfigError, MalformedRecord, SnapshotError};
pub use mutation::{Mutation, MutationKind, MutationRecord, OrgRef, Outcome};
pub use source::{SnapshotBuilder, SourceRow, SourceSnapshot, SourceStats};
pub use target::TargetSnapshot;
pub use types::{
    render_all_orgs, Email, FieldKey, Membership, NameKey, PersonId, SourceOrg, SourceOrgId,
    SourcePerson, TargetOrg, TargetOrgId, TargetPerson,
};
