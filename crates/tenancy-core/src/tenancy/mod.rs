//! Tenancy lifecycle engine: assignment, transfer, termination and rejection sagas.
//!
//! No step runs inside a cross-store transaction. Each mutation is a conditional
//! (compare-and-swap) write committed on its own, and every forward step after the first has
//! a compensating action. Events go to the change feed only after the matching commit.

pub mod assignment;
pub mod context;
pub mod domain;
pub mod error;
pub mod events;
pub mod invariants;
pub mod memory;
pub mod profile;
pub mod rejection;
pub mod retry;
pub mod router;
pub mod service;
pub mod store;
pub mod termination;
pub mod transfer;

#[cfg(test)]
mod tests;

pub use assignment::AssignmentWorkflow;
pub use context::{WorkflowContext, WorkflowSettings};
pub use domain::{
    normalize_email, Application, ApplicationId, ApplicationStatus, EntityKind, LandlordId,
    NewTenancy, NewTenantProfile, ProfileRole, PropertyId, Tenancy, TenancyId, TenancyStatus,
    TenantId, TenantProfile, Unit, UnitId, UnitStatus,
};
pub use error::{ErrorKind, WorkflowError};
pub use events::{ChangeFeed, FeedError, RecordingChangeFeed, TenancyEvent, TracingChangeFeed};
pub use invariants::{find_discrepancies, OccupancyAudit, OccupancyDiscrepancy};
pub use memory::InMemoryStore;
pub use profile::ProfileResolver;
pub use rejection::RejectionWorkflow;
pub use retry::RetryPolicy;
pub use router::tenancy_router;
pub use service::TenancyLifecycleService;
pub use store::{
    ApplicationFilter, ApplicationStore, ProfileDirectory, StoreError, TenancyFilter,
    TenancyStore, TenancyStores, UnitFilter, UnitStore,
};
pub use termination::EndTenancyWorkflow;
pub use transfer::ChangeUnitWorkflow;
