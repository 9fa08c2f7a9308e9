use std::collections::BTreeMap;

use serde::Serialize;

use super::domain::{PropertyId, Tenancy, TenancyId, TenancyStatus, Unit, UnitId, UnitStatus};
use super::error::WorkflowError;
use super::retry::RetryPolicy;
use super::store::{TenancyFilter, TenancyStores, UnitFilter};

/// A divergence between unit occupancy and the tenancies referencing each unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OccupancyDiscrepancy {
    OccupiedWithoutTenancy {
        unit_id: UnitId,
    },
    VacantWithActiveTenancy {
        unit_id: UnitId,
        tenancy_id: TenancyId,
    },
    MultipleActiveTenancies {
        unit_id: UnitId,
        tenancy_ids: Vec<TenancyId>,
    },
    /// Occupied by one active tenancy while recording a different holder.
    HolderMismatch {
        unit_id: UnitId,
        holder: Option<TenancyId>,
        tenancy_id: TenancyId,
    },
    PropertyMismatch {
        tenancy_id: TenancyId,
        unit_id: UnitId,
        tenancy_property: PropertyId,
        unit_property: PropertyId,
    },
    UnknownUnit {
        tenancy_id: TenancyId,
        unit_id: UnitId,
    },
}

/// Pure check over a snapshot of units and tenancies.
pub fn find_discrepancies(units: &[Unit], tenancies: &[Tenancy]) -> Vec<OccupancyDiscrepancy> {
    let mut active_by_unit: BTreeMap<&UnitId, Vec<&Tenancy>> = BTreeMap::new();
    for tenancy in tenancies.iter().filter(|tenancy| tenancy.is_active()) {
        active_by_unit.entry(&tenancy.unit_id).or_default().push(tenancy);
    }

    let units_by_id: BTreeMap<&UnitId, &Unit> =
        units.iter().map(|unit| (&unit.id, unit)).collect();
    let mut findings = Vec::new();

    for unit in units {
        let active = active_by_unit
            .get(&unit.id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        match (unit.status, active) {
            (UnitStatus::Occupied, []) => {
                findings.push(OccupancyDiscrepancy::OccupiedWithoutTenancy {
                    unit_id: unit.id.clone(),
                })
            }
            (UnitStatus::Vacant, [first, ..]) => {
                findings.push(OccupancyDiscrepancy::VacantWithActiveTenancy {
                    unit_id: unit.id.clone(),
                    tenancy_id: first.id.clone(),
                })
            }
            (UnitStatus::Occupied, [only]) if unit.occupied_by.as_ref() != Some(&only.id) => {
                findings.push(OccupancyDiscrepancy::HolderMismatch {
                    unit_id: unit.id.clone(),
                    holder: unit.occupied_by.clone(),
                    tenancy_id: only.id.clone(),
                })
            }
            _ => {}
        }

        if active.len() > 1 {
            findings.push(OccupancyDiscrepancy::MultipleActiveTenancies {
                unit_id: unit.id.clone(),
                tenancy_ids: active.iter().map(|tenancy| tenancy.id.clone()).collect(),
            });
        }
    }

    for tenancy in tenancies {
        match units_by_id.get(&tenancy.unit_id) {
            Some(unit) if unit.property_id != tenancy.property_id => {
                findings.push(OccupancyDiscrepancy::PropertyMismatch {
                    tenancy_id: tenancy.id.clone(),
                    unit_id: unit.id.clone(),
                    tenancy_property: tenancy.property_id.clone(),
                    unit_property: unit.property_id.clone(),
                })
            }
            None if tenancy.is_active() => findings.push(OccupancyDiscrepancy::UnknownUnit {
                tenancy_id: tenancy.id.clone(),
                unit_id: tenancy.unit_id.clone(),
            }),
            _ => {}
        }
    }

    findings
}

/// Scans the stores and reports every unit whose occupancy does not mirror its tenancies.
#[derive(Clone)]
pub struct OccupancyAudit {
    stores: TenancyStores,
    retry: RetryPolicy,
}

impl OccupancyAudit {
    pub fn new(stores: TenancyStores, retry: RetryPolicy) -> Self {
        Self { stores, retry }
    }

    /// Units and tenancies are listed in two separate reads, so a workflow committing in
    /// between can make one scan disagree with itself. A finding is only reported when a
    /// second scan sees it too.
    pub async fn audit(&self) -> Result<Vec<OccupancyDiscrepancy>, WorkflowError> {
        let first = self.scan().await?;
        if first.is_empty() {
            return Ok(first);
        }

        let second = self.scan().await?;
        Ok(second
            .into_iter()
            .filter(|finding| first.contains(finding))
            .collect())
    }

    async fn scan(&self) -> Result<Vec<OccupancyDiscrepancy>, WorkflowError> {
        let unit_filter = UnitFilter::default();
        let units = self
            .retry
            .run("units.list", || self.stores.units.list(&unit_filter))
            .await
            .map_err(|err| WorkflowError::from_store("units.list", err))?;

        let tenancy_filter = TenancyFilter {
            status: Some(TenancyStatus::Active),
            ..TenancyFilter::default()
        };
        let tenancies = self
            .retry
            .run("tenancies.list", || self.stores.tenancies.list(&tenancy_filter))
            .await
            .map_err(|err| WorkflowError::from_store("tenancies.list", err))?;

        Ok(find_discrepancies(&units, &tenancies))
    }
}
