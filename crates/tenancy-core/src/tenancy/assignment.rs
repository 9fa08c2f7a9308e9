use chrono::NaiveDate;
use tracing::{error, info, instrument, warn};

use super::context::WorkflowContext;
use super::domain::{
    Application, ApplicationId, ApplicationStatus, EntityKind, NewTenancy, Tenancy, TenancyId,
    TenantId, Unit, UnitId, UnitStatus,
};
use super::error::WorkflowError;
use super::events::TenancyEvent;
use super::profile::ProfileResolver;
use super::store::StoreError;

/// Converts a pending application into an active tenancy on a vacant unit.
///
/// Steps commit independently, in order: resolve the tenant profile, open the tenancy,
/// claim the unit, approve the application. A failed claim or approval unwinds the earlier
/// steps in reverse order.
#[derive(Clone)]
pub struct AssignmentWorkflow {
    ctx: WorkflowContext,
    resolver: ProfileResolver,
}

impl AssignmentWorkflow {
    pub fn new(ctx: WorkflowContext) -> Self {
        let resolver = ProfileResolver::new(ctx.stores.profiles.clone(), ctx.settings.retry);
        Self { ctx, resolver }
    }

    #[instrument(skip_all, fields(application_id = %application_id, unit_id = %unit_id))]
    pub async fn assign(
        &self,
        application_id: &ApplicationId,
        unit_id: &UnitId,
    ) -> Result<Tenancy, WorkflowError> {
        let application = self.load_application(application_id).await?;
        let unit = self.load_unit(unit_id).await?;
        check_preconditions(&application, &unit)?;
        let lease = self.lease_term()?;

        let tenant_id = self
            .resolver
            .resolve(
                &application.applicant_email,
                &application.applicant_name,
                &application.applicant_phone,
            )
            .await?;

        let tenancy = self
            .open_tenancy(&application, &unit, tenant_id, lease)
            .await?;
        self.ctx.emit(TenancyEvent::TenancyCreated {
            tenancy_id: tenancy.id.clone(),
            unit_id: unit.id.clone(),
            application_id: application.id.clone(),
        });

        self.claim_unit(&tenancy).await?;
        self.ctx.emit(TenancyEvent::UnitOccupied {
            unit_id: unit.id.clone(),
            tenancy_id: tenancy.id.clone(),
        });

        self.approve(&application, &tenancy).await?;
        self.ctx.emit(TenancyEvent::ApplicationApproved {
            application_id: application.id.clone(),
            tenancy_id: tenancy.id.clone(),
        });

        info!(tenancy_id = %tenancy.id, "tenancy assigned");
        Ok(tenancy)
    }

    async fn load_application(&self, id: &ApplicationId) -> Result<Application, WorkflowError> {
        self.ctx
            .settings
            .retry
            .run("applications.fetch", || self.ctx.stores.applications.fetch(id))
            .await
            .map_err(|err| WorkflowError::from_store("applications.fetch", err))?
            .ok_or_else(|| WorkflowError::missing("application_id", EntityKind::Application, id))
    }

    async fn load_unit(&self, id: &UnitId) -> Result<Unit, WorkflowError> {
        self.ctx
            .settings
            .retry
            .run("units.fetch", || self.ctx.stores.units.fetch(id))
            .await
            .map_err(|err| WorkflowError::from_store("units.fetch", err))?
            .ok_or_else(|| WorkflowError::missing("unit_id", EntityKind::Unit, id))
    }

    /// Lease dates for a tenancy opened today, checked before anything is written.
    fn lease_term(&self) -> Result<(NaiveDate, NaiveDate), WorkflowError> {
        let lease_start = self.ctx.today();
        let lease_days = self.ctx.settings.lease_days;
        let lease_end = self
            .ctx
            .settings
            .lease_end(lease_start)
            .ok_or_else(|| WorkflowError::Validation {
                field: "lease_days",
                reason: format!("a lease of {lease_days} days starting {lease_start} is out of range"),
            })?;
        Ok((lease_start, lease_end))
    }

    async fn open_tenancy(
        &self,
        application: &Application,
        unit: &Unit,
        tenant_id: TenantId,
        (lease_start, lease_end): (NaiveDate, NaiveDate),
    ) -> Result<Tenancy, WorkflowError> {
        let settings = &self.ctx.settings;
        let request = NewTenancy {
            id: TenancyId::generate(),
            property_id: application.property_id.clone(),
            unit_id: unit.id.clone(),
            tenant_id,
            landlord_id: unit.landlord_id.clone(),
            lease_start,
            lease_end,
            monthly_rent: unit.monthly_rent,
            security_deposit: settings.security_deposit(unit.monthly_rent),
        };

        let created = settings
            .retry
            .run("tenancies.create", || {
                self.ctx.stores.tenancies.create(request.clone())
            })
            .await;

        match created {
            Ok(tenancy) => {
                info!(tenancy_id = %tenancy.id, "tenancy opened");
                Ok(tenancy)
            }
            // A retried create whose first attempt landed; the id is ours.
            Err(StoreError::Conflict) => settings
                .retry
                .run("tenancies.fetch", || self.ctx.stores.tenancies.fetch(&request.id))
                .await
                .map_err(|err| WorkflowError::from_store("tenancies.fetch", err))?
                .ok_or_else(|| WorkflowError::transient("tenancies.create")),
            Err(err) => Err(WorkflowError::from_store("tenancies.create", err)),
        }
    }

    async fn claim_unit(&self, tenancy: &Tenancy) -> Result<(), WorkflowError> {
        let claimed = self
            .ctx
            .settings
            .retry
            .run("units.claim", || {
                self.ctx.stores.units.claim(&tenancy.unit_id, &tenancy.id)
            })
            .await;

        match claimed {
            Ok(true) => {
                info!(tenancy_id = %tenancy.id, unit_id = %tenancy.unit_id, "unit occupied");
                Ok(())
            }
            Ok(false) => {
                warn!(unit_id = %tenancy.unit_id, "lost race for unit; ending provisional tenancy");
                self.end_provisional(tenancy).await?;
                Err(WorkflowError::UnitUnavailable {
                    unit_id: tenancy.unit_id.clone(),
                })
            }
            Err(err) => {
                warn!(unit_id = %tenancy.unit_id, error = %err, "unit claim failed; ending provisional tenancy");
                self.end_provisional(tenancy).await?;
                Err(WorkflowError::from_store("units.claim", err))
            }
        }
    }

    async fn approve(
        &self,
        application: &Application,
        tenancy: &Tenancy,
    ) -> Result<(), WorkflowError> {
        let approved = self
            .ctx
            .settings
            .retry
            .run("applications.approve", || {
                self.ctx.stores.applications.transition(
                    &application.id,
                    ApplicationStatus::Pending,
                    ApplicationStatus::Approved,
                )
            })
            .await;

        let failure = match approved {
            Ok(true) => {
                info!(application_id = %application.id, "application approved");
                return Ok(());
            }
            Ok(false) => {
                let actual = self.current_application_status(&application.id).await;
                WorkflowError::invalid_state(
                    EntityKind::Application,
                    &application.id,
                    ApplicationStatus::Pending.label(),
                    actual.map_or("unknown", ApplicationStatus::label),
                )
            }
            Err(err) => WorkflowError::from_store("applications.approve", err),
        };

        warn!(
            application_id = %application.id,
            error = %failure,
            "approval failed; releasing unit and ending tenancy"
        );
        self.release_unit(tenancy).await?;
        self.end_provisional(tenancy).await?;
        Err(failure)
    }

    async fn current_application_status(&self, id: &ApplicationId) -> Option<ApplicationStatus> {
        self.ctx
            .settings
            .retry
            .run("applications.fetch", || self.ctx.stores.applications.fetch(id))
            .await
            .ok()
            .flatten()
            .map(|application| application.status)
    }

    /// Compensation: undo the unit claim. A unit this tenancy no longer holds counts as done.
    async fn release_unit(&self, tenancy: &Tenancy) -> Result<(), WorkflowError> {
        let released = self
            .ctx
            .settings
            .retry
            .run("units.release", || {
                self.ctx.stores.units.release(&tenancy.unit_id, &tenancy.id)
            })
            .await;

        match released {
            Ok(applied) => {
                warn!(unit_id = %tenancy.unit_id, tenancy_id = %tenancy.id, applied, "compensation: unit released");
                if applied {
                    self.ctx.emit(TenancyEvent::UnitVacated {
                        unit_id: tenancy.unit_id.clone(),
                        tenancy_id: tenancy.id.clone(),
                    });
                }
                Ok(())
            }
            Err(err) => Err(self.flag(
                tenancy,
                format!("could not release unit {} after failed assignment: {err}", tenancy.unit_id),
            )),
        }
    }

    /// Compensation: end the tenancy opened by this invocation. Already ended counts as done.
    async fn end_provisional(&self, tenancy: &Tenancy) -> Result<(), WorkflowError> {
        let today = self.ctx.today();
        let ended = self
            .ctx
            .settings
            .retry
            .run("tenancies.end", || self.ctx.stores.tenancies.end(&tenancy.id, today))
            .await;

        match ended {
            Ok(snapshot) => {
                warn!(tenancy_id = %tenancy.id, applied = snapshot.is_some(), "compensation: tenancy ended");
                if snapshot.is_some() {
                    self.ctx.emit(TenancyEvent::TenancyEnded {
                        tenancy_id: tenancy.id.clone(),
                        unit_id: tenancy.unit_id.clone(),
                    });
                }
                Ok(())
            }
            Err(err) => Err(self.flag(
                tenancy,
                format!("could not end provisional tenancy after failed assignment: {err}"),
            )),
        }
    }

    fn flag(&self, tenancy: &Tenancy, context: String) -> WorkflowError {
        error!(tenancy_id = %tenancy.id, %context, "manual reconciliation required");
        self.ctx.emit(TenancyEvent::ReconciliationRequired {
            tenancy_id: tenancy.id.clone(),
            context: context.clone(),
        });
        WorkflowError::reconciliation(&tenancy.id, context)
    }
}

fn check_preconditions(application: &Application, unit: &Unit) -> Result<(), WorkflowError> {
    if application.status != ApplicationStatus::Pending {
        return Err(WorkflowError::invalid_state(
            EntityKind::Application,
            &application.id,
            ApplicationStatus::Pending.label(),
            application.status.label(),
        ));
    }

    if unit.property_id != application.property_id {
        return Err(WorkflowError::Validation {
            field: "unit_id",
            reason: format!(
                "unit {} belongs to property {}, application targets {}",
                unit.id, unit.property_id, application.property_id
            ),
        });
    }

    if unit.status != UnitStatus::Vacant {
        return Err(WorkflowError::UnitUnavailable {
            unit_id: unit.id.clone(),
        });
    }

    Ok(())
}
