//! Persistence boundary consumed by the lifecycle workflows.
//!
//! Every mutating call is conditional: the store applies the write only when the row is in
//! the expected prior state and reports whether it did. Implementations must return
//! [`StoreError::Unavailable`] only when the write was not applied, so a retried call never
//! double-applies.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use super::domain::{
    Application, ApplicationId, ApplicationStatus, NewTenancy, NewTenantProfile, PropertyId,
    Tenancy, TenancyId, TenancyStatus, TenantId, TenantProfile, Unit, UnitId, UnitStatus,
};

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationFilter {
    pub property_id: Option<PropertyId>,
    pub status: Option<ApplicationStatus>,
}

impl ApplicationFilter {
    pub fn matches(&self, application: &Application) -> bool {
        self.property_id
            .as_ref()
            .map_or(true, |property| &application.property_id == property)
            && self.status.map_or(true, |status| application.status == status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitFilter {
    pub property_id: Option<PropertyId>,
    pub status: Option<UnitStatus>,
}

impl UnitFilter {
    pub fn matches(&self, unit: &Unit) -> bool {
        self.property_id
            .as_ref()
            .map_or(true, |property| &unit.property_id == property)
            && self.status.map_or(true, |status| unit.status == status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenancyFilter {
    pub unit_id: Option<UnitId>,
    pub tenant_id: Option<TenantId>,
    pub status: Option<TenancyStatus>,
}

impl TenancyFilter {
    pub fn active_on(unit_id: &UnitId) -> Self {
        Self {
            unit_id: Some(unit_id.clone()),
            tenant_id: None,
            status: Some(TenancyStatus::Active),
        }
    }

    pub fn matches(&self, tenancy: &Tenancy) -> bool {
        self.unit_id
            .as_ref()
            .map_or(true, |unit| &tenancy.unit_id == unit)
            && self
                .tenant_id
                .as_ref()
                .map_or(true, |tenant| &tenancy.tenant_id == tenant)
            && self.status.map_or(true, |status| tenancy.status == status)
    }
}

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    /// Applications are created outside the lifecycle engine; this exists for intake adapters.
    async fn insert(&self, application: Application) -> Result<Application, StoreError>;
    async fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, StoreError>;
    /// Move `id` from `expected` to `next`. Returns `false` when the current status differs.
    async fn transition(
        &self,
        id: &ApplicationId,
        expected: ApplicationStatus,
        next: ApplicationStatus,
    ) -> Result<bool, StoreError>;
    async fn list(&self, filter: &ApplicationFilter) -> Result<Vec<Application>, StoreError>;
}

#[async_trait]
pub trait UnitStore: Send + Sync {
    async fn insert(&self, unit: Unit) -> Result<Unit, StoreError>;
    async fn fetch(&self, id: &UnitId) -> Result<Option<Unit>, StoreError>;
    /// Vacant to occupied, recording `tenancy` as the holder. Returns `false` when the unit
    /// is not vacant. This is the sole arbiter of contested claims.
    async fn claim(&self, id: &UnitId, tenancy: &TenancyId) -> Result<bool, StoreError>;
    /// Occupied to vacant, applied only while `tenancy` is still the holder. Returns `false`
    /// when the unit is vacant or held by another tenancy.
    async fn release(&self, id: &UnitId, tenancy: &TenancyId) -> Result<bool, StoreError>;
    async fn list(&self, filter: &UnitFilter) -> Result<Vec<Unit>, StoreError>;
}

#[async_trait]
pub trait TenancyStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when a tenancy with the same id already exists.
    async fn create(&self, tenancy: NewTenancy) -> Result<Tenancy, StoreError>;
    async fn fetch(&self, id: &TenancyId) -> Result<Option<Tenancy>, StoreError>;
    /// Move an active tenancy to ended, stamping `lease_end`. Returns the ended row, or
    /// `None` when the tenancy was not active.
    async fn end(&self, id: &TenancyId, ended_on: NaiveDate)
        -> Result<Option<Tenancy>, StoreError>;
    /// Repoint an active tenancy from `from` to `to`. Returns `false` unless the tenancy is
    /// still active and still references `from`.
    async fn relocate(
        &self,
        id: &TenancyId,
        from: &UnitId,
        to: &UnitId,
        monthly_rent: u32,
    ) -> Result<bool, StoreError>;
    async fn list(&self, filter: &TenancyFilter) -> Result<Vec<Tenancy>, StoreError>;
}

/// Tenant profile lookup keyed by normalized email.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<TenantProfile>, StoreError>;
    /// Fails with [`StoreError::Conflict`] when a profile for the email already exists.
    async fn create(&self, profile: NewTenantProfile) -> Result<TenantProfile, StoreError>;
}

/// Bundle of store handles shared by every workflow.
#[derive(Clone)]
pub struct TenancyStores {
    pub applications: Arc<dyn ApplicationStore>,
    pub units: Arc<dyn UnitStore>,
    pub tenancies: Arc<dyn TenancyStore>,
    pub profiles: Arc<dyn ProfileDirectory>,
}

impl TenancyStores {
    /// Use one backend for all four stores.
    pub fn shared<S>(backend: Arc<S>) -> Self
    where
        S: ApplicationStore + UnitStore + TenancyStore + ProfileDirectory + 'static,
    {
        Self {
            applications: backend.clone(),
            units: backend.clone(),
            tenancies: backend.clone(),
            profiles: backend,
        }
    }
}
