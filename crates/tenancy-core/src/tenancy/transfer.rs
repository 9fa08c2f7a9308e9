use tracing::{error, info, instrument, warn};

use super::context::WorkflowContext;
use super::domain::{EntityKind, Tenancy, TenancyId, TenancyStatus, Unit, UnitId, UnitStatus};
use super::error::WorkflowError;
use super::events::TenancyEvent;
use super::store::StoreError;

/// Moves an active tenancy to another vacant unit of the same property.
///
/// The old unit is freed before the new one is claimed, so for a short window the tenancy
/// references a unit that is not yet marked occupied. A failed claim points the tenancy back
/// and re-occupies the old unit when it is still vacant; if someone else took it in the
/// meantime the workflow reports `ManualReconciliationRequired`.
#[derive(Clone)]
pub struct ChangeUnitWorkflow {
    ctx: WorkflowContext,
}

/// What the workflow knows about the transfer it is running.
struct Transfer {
    tenancy_id: TenancyId,
    old_unit: UnitId,
    old_rent: u32,
    new_unit: UnitId,
    new_rent: u32,
}

impl ChangeUnitWorkflow {
    pub fn new(ctx: WorkflowContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(tenancy_id = %tenancy_id, new_unit_id = %new_unit_id))]
    pub async fn change_unit(
        &self,
        tenancy_id: &TenancyId,
        new_unit_id: &UnitId,
    ) -> Result<Tenancy, WorkflowError> {
        let tenancy = self
            .fetch_tenancy(tenancy_id)
            .await?
            .ok_or_else(|| WorkflowError::missing("tenancy_id", EntityKind::Tenancy, tenancy_id))?;
        if !tenancy.is_active() {
            return Err(tenancy_not_active(tenancy_id, tenancy.status));
        }
        if &tenancy.unit_id == new_unit_id {
            return Err(WorkflowError::Validation {
                field: "unit_id",
                reason: format!("tenancy {tenancy_id} already occupies unit {new_unit_id}"),
            });
        }

        let new_unit = self.load_unit(new_unit_id).await?;
        check_target(&tenancy, &new_unit)?;

        let transfer = Transfer {
            tenancy_id: tenancy.id.clone(),
            old_unit: tenancy.unit_id.clone(),
            old_rent: tenancy.monthly_rent,
            new_unit: new_unit.id.clone(),
            new_rent: new_unit.monthly_rent,
        };

        self.free_old_unit(&transfer).await?;
        self.repoint(&transfer).await?;

        let claimed = self
            .claim("units.claim", &transfer.new_unit, &transfer.tenancy_id)
            .await;

        match claimed {
            Ok(true) => {
                self.ctx.emit(TenancyEvent::UnitOccupied {
                    unit_id: transfer.new_unit.clone(),
                    tenancy_id: transfer.tenancy_id.clone(),
                });
                let moved = self
                    .confirm_holding(&transfer.tenancy_id, &transfer.new_unit)
                    .await?;
                info!(from = %transfer.old_unit, to = %transfer.new_unit, "tenancy moved");
                Ok(moved)
            }
            Ok(false) => {
                warn!(unit_id = %transfer.new_unit, "new unit taken during transfer; rolling back");
                self.roll_back(&transfer).await?;
                Err(WorkflowError::UnitUnavailable {
                    unit_id: transfer.new_unit.clone(),
                })
            }
            Err(err) => {
                warn!(unit_id = %transfer.new_unit, error = %err, "claiming new unit failed; rolling back");
                self.roll_back(&transfer).await?;
                Err(WorkflowError::from_store("units.claim", err))
            }
        }
    }

    /// Step 1: occupied to vacant on the old unit. Nothing is committed if this fails.
    async fn free_old_unit(&self, transfer: &Transfer) -> Result<(), WorkflowError> {
        let released = self
            .release("units.release", &transfer.old_unit, &transfer.tenancy_id)
            .await
            .map_err(|err| WorkflowError::from_store("units.release", err))?;

        if !released {
            // Either the tenancy was ended concurrently or another transfer got here first.
            let current = self.fetch_tenancy(&transfer.tenancy_id).await?;
            if let Some(tenancy) = current.filter(|tenancy| !tenancy.is_active()) {
                return Err(tenancy_not_active(&transfer.tenancy_id, tenancy.status));
            }
            let unit = self.fetch_unit(&transfer.old_unit).await?;
            return Err(WorkflowError::invalid_state(
                EntityKind::Unit,
                &transfer.old_unit,
                HELD_BY_TENANCY,
                holder_state(unit.as_ref(), &transfer.tenancy_id),
            ));
        }

        info!(unit_id = %transfer.old_unit, "old unit vacated");
        self.ctx.emit(TenancyEvent::UnitVacated {
            unit_id: transfer.old_unit.clone(),
            tenancy_id: transfer.tenancy_id.clone(),
        });
        Ok(())
    }

    /// Step 2: point the tenancy at the new unit and rent.
    async fn repoint(&self, transfer: &Transfer) -> Result<(), WorkflowError> {
        let relocated = self
            .relocate(transfer, &transfer.old_unit, &transfer.new_unit, transfer.new_rent)
            .await;

        match relocated {
            Ok(true) => {
                self.ctx.emit(TenancyEvent::TenancyUnitChanged {
                    tenancy_id: transfer.tenancy_id.clone(),
                    from_unit: transfer.old_unit.clone(),
                    to_unit: transfer.new_unit.clone(),
                });
                Ok(())
            }
            Ok(false) => {
                let current = self.fetch_tenancy(&transfer.tenancy_id).await?;
                match current {
                    // Ended underneath us; the old unit is correctly vacant.
                    Some(tenancy) if !tenancy.is_active() => {
                        Err(tenancy_not_active(&transfer.tenancy_id, tenancy.status))
                    }
                    _ => Err(self.flag(
                        &transfer.tenancy_id,
                        format!(
                            "tenancy no longer references unit {} after it was vacated",
                            transfer.old_unit
                        ),
                    )),
                }
            }
            Err(err) => {
                warn!(error = %err, "repointing tenancy failed; re-occupying old unit");
                self.reoccupy_old_unit(transfer).await?;
                self.confirm_holding(&transfer.tenancy_id, &transfer.old_unit)
                    .await?;
                Err(WorkflowError::from_store("tenancies.relocate", err))
            }
        }
    }

    /// Compensation after a failed claim: point back at the old unit and re-occupy it.
    async fn roll_back(&self, transfer: &Transfer) -> Result<(), WorkflowError> {
        let restored = self
            .relocate(transfer, &transfer.new_unit, &transfer.old_unit, transfer.old_rent)
            .await;

        match restored {
            Ok(true) => {
                warn!(unit_id = %transfer.old_unit, "compensation: tenancy pointed back at old unit");
                self.ctx.emit(TenancyEvent::TenancyUnitChanged {
                    tenancy_id: transfer.tenancy_id.clone(),
                    from_unit: transfer.new_unit.clone(),
                    to_unit: transfer.old_unit.clone(),
                });
                self.reoccupy_old_unit(transfer).await?;
                self.confirm_holding(&transfer.tenancy_id, &transfer.old_unit)
                    .await
                    .map(|_| ())
            }
            Ok(false) => {
                let current = self.fetch_tenancy(&transfer.tenancy_id).await?;
                match current {
                    Some(tenancy) if !tenancy.is_active() => {
                        Err(tenancy_not_active(&transfer.tenancy_id, tenancy.status))
                    }
                    _ => Err(self.flag(
                        &transfer.tenancy_id,
                        format!(
                            "could not point tenancy back from unit {} to unit {}",
                            transfer.new_unit, transfer.old_unit
                        ),
                    )),
                }
            }
            Err(err) => Err(self.flag(
                &transfer.tenancy_id,
                format!(
                    "tenancy left on unclaimed unit {} after failed transfer: {err}",
                    transfer.new_unit
                ),
            )),
        }
    }

    async fn reoccupy_old_unit(&self, transfer: &Transfer) -> Result<(), WorkflowError> {
        let reclaimed = self
            .claim("units.reclaim", &transfer.old_unit, &transfer.tenancy_id)
            .await;

        match reclaimed {
            Ok(true) => {
                warn!(unit_id = %transfer.old_unit, "compensation: old unit re-occupied");
                self.ctx.emit(TenancyEvent::UnitOccupied {
                    unit_id: transfer.old_unit.clone(),
                    tenancy_id: transfer.tenancy_id.clone(),
                });
                Ok(())
            }
            Ok(false) => Err(self.flag(
                &transfer.tenancy_id,
                format!(
                    "old unit {} was claimed by another tenancy during transfer",
                    transfer.old_unit
                ),
            )),
            Err(err) => Err(self.flag(
                &transfer.tenancy_id,
                format!("could not re-occupy old unit {}: {err}", transfer.old_unit),
            )),
        }
    }

    /// Re-read the tenancy after claiming `unit`. If it was ended while the claim was in
    /// flight, give the unit back. The release only applies while this tenancy still holds
    /// the unit, so it never undoes the end workflow's release or a later claim.
    async fn confirm_holding(
        &self,
        tenancy_id: &TenancyId,
        unit: &UnitId,
    ) -> Result<Tenancy, WorkflowError> {
        let current = self
            .fetch_tenancy(tenancy_id)
            .await?
            .ok_or_else(|| WorkflowError::missing("tenancy_id", EntityKind::Tenancy, tenancy_id))?;

        if current.is_active() && &current.unit_id == unit {
            return Ok(current);
        }

        warn!(unit_id = %unit, "tenancy changed during transfer; releasing claimed unit");
        match self.release("units.release", unit, tenancy_id).await {
            Ok(applied) => {
                if applied {
                    self.ctx.emit(TenancyEvent::UnitVacated {
                        unit_id: unit.clone(),
                        tenancy_id: tenancy_id.clone(),
                    });
                }
                if current.is_active() {
                    Err(self.flag(
                        tenancy_id,
                        format!(
                            "tenancy moved to unit {} while unit {unit} was being claimed",
                            current.unit_id
                        ),
                    ))
                } else {
                    Err(tenancy_not_active(tenancy_id, current.status))
                }
            }
            Err(err) => Err(self.flag(
                tenancy_id,
                format!("unit {unit} left occupied after tenancy ended: {err}"),
            )),
        }
    }

    async fn relocate(
        &self,
        transfer: &Transfer,
        from: &UnitId,
        to: &UnitId,
        monthly_rent: u32,
    ) -> Result<bool, StoreError> {
        let tenancies = &self.ctx.stores.tenancies;
        self.ctx
            .settings
            .retry
            .run("tenancies.relocate", || {
                tenancies.relocate(&transfer.tenancy_id, from, to, monthly_rent)
            })
            .await
    }

    async fn claim(
        &self,
        operation: &'static str,
        unit: &UnitId,
        tenancy_id: &TenancyId,
    ) -> Result<bool, StoreError> {
        let units = &self.ctx.stores.units;
        self.ctx
            .settings
            .retry
            .run(operation, || units.claim(unit, tenancy_id))
            .await
    }

    async fn release(
        &self,
        operation: &'static str,
        unit: &UnitId,
        tenancy_id: &TenancyId,
    ) -> Result<bool, StoreError> {
        let units = &self.ctx.stores.units;
        self.ctx
            .settings
            .retry
            .run(operation, || units.release(unit, tenancy_id))
            .await
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

    async fn fetch_tenancy(&self, id: &TenancyId) -> Result<Option<Tenancy>, WorkflowError> {
        let tenancies = &self.ctx.stores.tenancies;
        self.ctx
            .settings
            .retry
            .run("tenancies.fetch", || tenancies.fetch(id))
            .await
            .map_err(|err| WorkflowError::from_store("tenancies.fetch", err))
    }

    async fn load_unit(&self, id: &UnitId) -> Result<Unit, WorkflowError> {
        self.fetch_unit(id)
            .await?
            .ok_or_else(|| WorkflowError::missing("unit_id", EntityKind::Unit, id))
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

fn check_target(tenancy: &Tenancy, unit: &Unit) -> Result<(), WorkflowError> {
    if unit.property_id != tenancy.property_id {
        return Err(WorkflowError::Validation {
            field: "unit_id",
            reason: format!(
                "unit {} belongs to property {}, tenancy is on property {}",
                unit.id, unit.property_id, tenancy.property_id
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

const HELD_BY_TENANCY: &str = "occupied by this tenancy";

fn holder_state(unit: Option<&Unit>, tenancy_id: &TenancyId) -> &'static str {
    match unit {
        None => "missing",
        Some(unit) if unit.status == UnitStatus::Vacant => UnitStatus::Vacant.label(),
        Some(unit) if unit.occupied_by.as_ref() == Some(tenancy_id) => HELD_BY_TENANCY,
        Some(_) => "occupied by another tenancy",
    }
}

fn tenancy_not_active(id: &TenancyId, actual: TenancyStatus) -> WorkflowError {
    WorkflowError::invalid_state(
        EntityKind::Tenancy,
        id,
        TenancyStatus::Active.label(),
        actual.label(),
    )
}
