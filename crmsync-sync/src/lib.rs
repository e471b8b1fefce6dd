//! # crmsync-sync
//!
//! Reconciliation engine: fetches the CRM state, diffs it against the
//! source export and converges the CRM through Mutation Records.
//!
//! Call [`run`] for a full run from a [`crmsync_core::RunConfig`], or
//! [`sync_snapshot`] to reconcile an already-built source snapshot.

pub mod audit;
pub mod error;
pub mod fetch;
pub mod linker;
pub mod orgs;
pub mod orphans;
pub mod pipeline;

pub use audit::{AuditLog, AuditPaths, OrgCreation, PersonChange};
pub use error::{FetchError, FetchStage, SyncError};
pub use linker::{Assignment, MissingPerson};
pub use pipeline::{run, sync_snapshot, RunReport, RunSummary, SyncOptions};
