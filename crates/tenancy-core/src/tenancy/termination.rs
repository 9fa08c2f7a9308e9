use tracing::{error, info, instrument, warn};

use super::context::WorkflowContext;
use super::domain::{EntityKind, Tenancy, TenancyId, TenancyStatus, Unit, UnitId, UnitStatus};
use super::error::WorkflowError;
use super::events::TenancyEvent;
use super::store::TenancyFilter;

const HOLDER_CHECKS: usize = 3;

/// Ends an active tenancy and frees its unit.
#[derive(Clone)]
pub struct EndTenancyWorkflow {
    ctx: WorkflowContext,
}

impl EndTenancyWorkflow {
    pub fn new(ctx: WorkflowContext) -> Self {
        Self { ctx }
    }

    /// Returns the ended tenancy as committed by the store.
    #[instrument(skip_all, fields(tenancy_id = %tenancy_id))]
    pub async fn end_tenancy(&self, tenancy_id: &TenancyId) -> Result<Tenancy, WorkflowError> {
        let retry = self.ctx.settings.retry;
        let tenancies = &self.ctx.stores.tenancies;
        let today = self.ctx.today();

        let ended = retry
            .run("tenancies.end", || tenancies.end(tenancy_id, today))
            .await
            .map_err(|err| WorkflowError::from_store("tenancies.end", err))?;

        let Some(ended) = ended else {
            let current = retry
                .run("tenancies.fetch", || tenancies.fetch(tenancy_id))
                .await
                .map_err(|err| WorkflowError::from_store("tenancies.fetch", err))?
                .ok_or_else(|| {
                    WorkflowError::missing("tenancy_id", EntityKind::Tenancy, tenancy_id)
                })?;
            return Err(WorkflowError::invalid_state(
                EntityKind::Tenancy,
                tenancy_id,
                TenancyStatus::Active.label(),
                current.status.label(),
            ));
        };

        info!(unit_id = %ended.unit_id, lease_end = %ended.lease_end, "tenancy ended");
        self.ctx.emit(TenancyEvent::TenancyEnded {
            tenancy_id: ended.id.clone(),
            unit_id: ended.unit_id.clone(),
        });

        // The tenancy is already committed as ended, so this step runs to completion on its
        // own, longer budget.
        let units = &self.ctx.stores.units;
        let released = self
            .ctx
            .settings
            .release_retry
            .run("units.release", || units.release(&ended.unit_id, &ended.id))
            .await;

        match released {
            Ok(true) => {
                info!(unit_id = %ended.unit_id, "unit vacated");
                self.ctx.emit(TenancyEvent::UnitVacated {
                    unit_id: ended.unit_id.clone(),
                    tenancy_id: ended.id.clone(),
                });
                Ok(ended)
            }
            Ok(false) => {
                self.check_other_holder(&ended).await?;
                Ok(ended)
            }
            Err(err) => Err(self.flag(
                &ended.id,
                format!(
                    "tenancy ended but unit {} is still occupied: {err}",
                    ended.unit_id
                ),
            )),
        }
    }

    /// The release did not apply, so the unit is vacant or held by someone else. Another
    /// holder is only legitimate while an active tenancy on the unit backs it. A transfer of
    /// this tenancy that was still in flight may re-claim the unit for it; that claim is
    /// released again here.
    async fn check_other_holder(&self, ended: &Tenancy) -> Result<(), WorkflowError> {
        for _ in 0..HOLDER_CHECKS {
            let holder = match self.fetch_unit(&ended.unit_id).await? {
                Some(unit) if unit.status == UnitStatus::Occupied => unit.occupied_by,
                _ => {
                    warn!(unit_id = %ended.unit_id, "unit already vacant; nothing to release");
                    return Ok(());
                }
            };

            if holder.as_ref() != Some(&ended.id) {
                return self.check_backed(ended, holder).await;
            }

            let units = &self.ctx.stores.units;
            let released = self
                .ctx
                .settings
                .release_retry
                .run("units.release", || units.release(&ended.unit_id, &ended.id))
                .await
                .map_err(|err| {
                    self.flag(
                        &ended.id,
                        format!("tenancy ended but unit {} is still occupied: {err}", ended.unit_id),
                    )
                })?;
            if released {
                info!(unit_id = %ended.unit_id, "unit vacated after late claim");
                self.ctx.emit(TenancyEvent::UnitVacated {
                    unit_id: ended.unit_id.clone(),
                    tenancy_id: ended.id.clone(),
                });
                return Ok(());
            }
        }

        Err(self.flag(
            &ended.id,
            format!("unit {} kept changing hands while the tenancy ended", ended.unit_id),
        ))
    }

    async fn check_backed(
        &self,
        ended: &Tenancy,
        holder: Option<TenancyId>,
    ) -> Result<(), WorkflowError> {
        let filter = TenancyFilter::active_on(&ended.unit_id);
        let tenancies = &self.ctx.stores.tenancies;
        let active = self
            .ctx
            .settings
            .retry
            .run("tenancies.list", || tenancies.list(&filter))
            .await
            .map_err(|err| WorkflowError::from_store("tenancies.list", err))?;

        let backed = holder
            .as_ref()
            .is_some_and(|holder| active.iter().any(|tenancy| &tenancy.id == holder));
        if backed {
            warn!(unit_id = %ended.unit_id, "unit already re-let; nothing to release");
            return Ok(());
        }

        let holder = holder.map_or_else(|| "nobody".to_string(), |holder| holder.to_string());
        Err(self.flag(
            &ended.id,
            format!(
                "tenancy ended but unit {} is occupied by {holder} with no active tenancy",
                ended.unit_id
            ),
        ))
    }

    async fn fetch_unit(&self, id: &UnitId) -> Result<Option<Unit>, WorkflowError> {
        let units = &self.ctx.stores.units;
        self.ctx
            .settings
            .retry
            .run("units.fetch", || units.fetch(id))
            .await
            .map_err(|err| WorkflowError::from_store("units.fetch", err))
    }

    fn flag(&self, tenancy_id: &TenancyId, context: String) -> WorkflowError {
        error!(%tenancy_id, %context, "manual reconciliation required");
        self.ctx.emit(TenancyEvent::ReconciliationRequired {
            tenancy_id: tenancy_id.clone(),
            context: context.clone(),
        });
        WorkflowError::reconciliation(tenancy_id, context)
    }
}
