use std::sync::Arc;

use super::assignment::AssignmentWorkflow;
use super::context::{WorkflowContext, WorkflowSettings};
use super::domain::{
    Application, ApplicationId, EntityKind, PropertyId, Tenancy, TenancyId, Unit, UnitId,
    UnitStatus,
};
use super::error::WorkflowError;
use super::events::ChangeFeed;
use super::invariants::{OccupancyAudit, OccupancyDiscrepancy};
use super::rejection::RejectionWorkflow;
use super::store::{TenancyStores, UnitFilter};
use super::termination::EndTenancyWorkflow;
use super::transfer::ChangeUnitWorkflow;

/// Service composing the lifecycle workflows, the occupancy audit, and read accessors.
#[derive(Clone)]
pub struct TenancyLifecycleService {
    ctx: WorkflowContext,
    assignment: AssignmentWorkflow,
    rejection: RejectionWorkflow,
    transfer: ChangeUnitWorkflow,
    termination: EndTenancyWorkflow,
    audit: OccupancyAudit,
}

impl TenancyLifecycleService {
    pub fn new(stores: TenancyStores, feed: Arc<dyn ChangeFeed>, settings: WorkflowSettings) -> Self {
        let ctx = WorkflowContext::new(stores, feed, settings);
        Self {
            assignment: AssignmentWorkflow::new(ctx.clone()),
            rejection: RejectionWorkflow::new(ctx.clone()),
            transfer: ChangeUnitWorkflow::new(ctx.clone()),
            termination: EndTenancyWorkflow::new(ctx.clone()),
            audit: OccupancyAudit::new(ctx.stores.clone(), settings.retry),
            ctx,
        }
    }

    /// Turn a pending application into an active tenancy on `unit_id`.
    pub async fn assign(
        &self,
        application_id: &ApplicationId,
        unit_id: &UnitId,
    ) -> Result<Tenancy, WorkflowError> {
        self.assignment.assign(application_id, unit_id).await
    }

    pub async fn reject(&self, application_id: &ApplicationId) -> Result<(), WorkflowError> {
        self.rejection.reject(application_id).await
    }

    /// Move an active tenancy to another vacant unit on the same property.
    pub async fn change_unit(
        &self,
        tenancy_id: &TenancyId,
        new_unit_id: &UnitId,
    ) -> Result<Tenancy, WorkflowError> {
        self.transfer.change_unit(tenancy_id, new_unit_id).await
    }

    pub async fn end_tenancy(&self, tenancy_id: &TenancyId) -> Result<Tenancy, WorkflowError> {
        self.termination.end_tenancy(tenancy_id).await
    }

    /// Every place where unit occupancy and active tenancies disagree.
    pub async fn audit_occupancy(&self) -> Result<Vec<OccupancyDiscrepancy>, WorkflowError> {
        self.audit.audit().await
    }

    /// Selection-time listing; `assign` re-checks vacancy when it commits.
    pub async fn vacant_units(&self, property_id: &PropertyId) -> Result<Vec<Unit>, WorkflowError> {
        let filter = UnitFilter {
            property_id: Some(property_id.clone()),
            status: Some(UnitStatus::Vacant),
        };
        self.list_units(&filter).await
    }

    pub async fn list_units(&self, filter: &UnitFilter) -> Result<Vec<Unit>, WorkflowError> {
        let units = &self.ctx.stores.units;
        self.ctx
            .settings
            .retry
            .run("units.list", || units.list(filter))
            .await
            .map_err(|err| WorkflowError::from_store("units.list", err))
    }

    pub async fn application(&self, id: &ApplicationId) -> Result<Application, WorkflowError> {
        let applications = &self.ctx.stores.applications;
        self.ctx
            .settings
            .retry
            .run("applications.fetch", || applications.fetch(id))
            .await
            .map_err(|err| WorkflowError::from_store("applications.fetch", err))?
            .ok_or_else(|| WorkflowError::missing("application_id", EntityKind::Application, id))
    }

    pub async fn unit(&self, id: &UnitId) -> Result<Unit, WorkflowError> {
        let units = &self.ctx.stores.units;
        self.ctx
            .settings
            .retry
            .run("units.fetch", || units.fetch(id))
            .await
            .map_err(|err| WorkflowError::from_store("units.fetch", err))?
            .ok_or_else(|| WorkflowError::missing("unit_id", EntityKind::Unit, id))
    }

    pub async fn tenancy(&self, id: &TenancyId) -> Result<Tenancy, WorkflowError> {
        let tenancies = &self.ctx.stores.tenancies;
        self.ctx
            .settings
            .retry
            .run("tenancies.fetch", || tenancies.fetch(id))
            .await
            .map_err(|err| WorkflowError::from_store("tenancies.fetch", err))?
            .ok_or_else(|| WorkflowError::missing("tenancy_id", EntityKind::Tenancy, id))
    }

    pub fn settings(&self) -> &WorkflowSettings {
        self.ctx.settings()
    }
}
