use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;

use super::domain::{
    normalize_email, Application, ApplicationId, ApplicationStatus, NewTenancy,
    NewTenantProfile, Tenancy, TenancyId, TenancyStatus, TenantId, TenantProfile, Unit, UnitId,
    UnitStatus,
};
use super::store::{
    ApplicationFilter, ApplicationStore, ProfileDirectory, StoreError, TenancyFilter,
    TenancyStore, UnitFilter, UnitStore,
};

#[derive(Debug, Default)]
struct MemoryState {
    applications: HashMap<ApplicationId, Application>,
    units: HashMap<UnitId, Unit>,
    tenancies: HashMap<TenancyId, Tenancy>,
    profiles: HashMap<String, TenantProfile>,
}

/// Process-local backend implementing every store trait with compare-and-swap semantics.
///
/// Each call yields to the scheduler before touching state so concurrent workflows
/// interleave at store boundaries the way they would against a remote database.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))
    }

    /// Sorted snapshot of every unit, mainly for reports and assertions.
    pub fn units_snapshot(&self) -> Vec<Unit> {
        let mut units: Vec<Unit> = match self.lock() {
            Ok(state) => state.units.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        units.sort_by(|a, b| a.id.cmp(&b.id));
        units
    }

    pub fn tenancies_snapshot(&self) -> Vec<Tenancy> {
        let mut tenancies: Vec<Tenancy> = match self.lock() {
            Ok(state) => state.tenancies.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        tenancies.sort_by(|a, b| a.id.cmp(&b.id));
        tenancies
    }

    pub fn profile_count(&self) -> usize {
        self.lock().map(|state| state.profiles.len()).unwrap_or_default()
    }
}

#[async_trait]
impl ApplicationStore for InMemoryStore {
    async fn insert(&self, application: Application) -> Result<Application, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.lock()?;
        if state.applications.contains_key(&application.id) {
            return Err(StoreError::Conflict);
        }
        state
            .applications
            .insert(application.id.clone(), application.clone());
        Ok(application)
    }

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, StoreError> {
        tokio::task::yield_now().await;
        Ok(self.lock()?.applications.get(id).cloned())
    }

    async fn transition(
        &self,
        id: &ApplicationId,
        expected: ApplicationStatus,
        next: ApplicationStatus,
    ) -> Result<bool, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.lock()?;
        match state.applications.get_mut(id) {
            Some(application) if application.status == expected => {
                application.status = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, filter: &ApplicationFilter) -> Result<Vec<Application>, StoreError> {
        tokio::task::yield_now().await;
        let state = self.lock()?;
        let mut applications: Vec<Application> = state
            .applications
            .values()
            .filter(|application| filter.matches(application))
            .cloned()
            .collect();
        applications.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(applications)
    }
}

#[async_trait]
impl UnitStore for InMemoryStore {
    async fn insert(&self, unit: Unit) -> Result<Unit, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.lock()?;
        if state.units.contains_key(&unit.id) {
            return Err(StoreError::Conflict);
        }
        state.units.insert(unit.id.clone(), unit.clone());
        Ok(unit)
    }

    async fn fetch(&self, id: &UnitId) -> Result<Option<Unit>, StoreError> {
        tokio::task::yield_now().await;
        Ok(self.lock()?.units.get(id).cloned())
    }

    async fn claim(&self, id: &UnitId, tenancy: &TenancyId) -> Result<bool, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.lock()?;
        match state.units.get_mut(id) {
            Some(unit) if unit.status == UnitStatus::Vacant => {
                unit.status = UnitStatus::Occupied;
                unit.occupied_by = Some(tenancy.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, id: &UnitId, tenancy: &TenancyId) -> Result<bool, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.lock()?;
        match state.units.get_mut(id) {
            Some(unit)
                if unit.status == UnitStatus::Occupied
                    && unit.occupied_by.as_ref() == Some(tenancy) =>
            {
                unit.status = UnitStatus::Vacant;
                unit.occupied_by = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, filter: &UnitFilter) -> Result<Vec<Unit>, StoreError> {
        tokio::task::yield_now().await;
        let state = self.lock()?;
        let mut units: Vec<Unit> = state
            .units
            .values()
            .filter(|unit| filter.matches(unit))
            .cloned()
            .collect();
        units.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(units)
    }
}

#[async_trait]
impl TenancyStore for InMemoryStore {
    async fn create(&self, tenancy: NewTenancy) -> Result<Tenancy, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.lock()?;
        if state.tenancies.contains_key(&tenancy.id) {
            return Err(StoreError::Conflict);
        }
        let tenancy = tenancy.into_tenancy();
        state.tenancies.insert(tenancy.id.clone(), tenancy.clone());
        Ok(tenancy)
    }

    async fn fetch(&self, id: &TenancyId) -> Result<Option<Tenancy>, StoreError> {
        tokio::task::yield_now().await;
        Ok(self.lock()?.tenancies.get(id).cloned())
    }

    async fn end(
        &self,
        id: &TenancyId,
        ended_on: NaiveDate,
    ) -> Result<Option<Tenancy>, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.lock()?;
        match state.tenancies.get_mut(id) {
            Some(tenancy) if tenancy.status == TenancyStatus::Active => {
                tenancy.status = TenancyStatus::Ended;
                tenancy.lease_end = ended_on;
                Ok(Some(tenancy.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn relocate(
        &self,
        id: &TenancyId,
        from: &UnitId,
        to: &UnitId,
        monthly_rent: u32,
    ) -> Result<bool, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.lock()?;
        match state.tenancies.get_mut(id) {
            Some(tenancy) if tenancy.status == TenancyStatus::Active && &tenancy.unit_id == from => {
                tenancy.unit_id = to.clone();
                tenancy.monthly_rent = monthly_rent;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, filter: &TenancyFilter) -> Result<Vec<Tenancy>, StoreError> {
        tokio::task::yield_now().await;
        let state = self.lock()?;
        let mut tenancies: Vec<Tenancy> = state
            .tenancies
            .values()
            .filter(|tenancy| filter.matches(tenancy))
            .cloned()
            .collect();
        tenancies.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tenancies)
    }
}

#[async_trait]
impl ProfileDirectory for InMemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<TenantProfile>, StoreError> {
        tokio::task::yield_now().await;
        Ok(self.lock()?.profiles.get(&normalize_email(email)).cloned())
    }

    async fn create(&self, profile: NewTenantProfile) -> Result<TenantProfile, StoreError> {
        tokio::task::yield_now().await;
        let email = normalize_email(&profile.email);
        let mut state = self.lock()?;
        if state.profiles.contains_key(&email) {
            return Err(StoreError::Conflict);
        }
        let created = TenantProfile {
            id: TenantId::generate(),
            email: email.clone(),
            name: profile.name,
            phone: profile.phone,
            role: profile.role,
        };
        state.profiles.insert(email, created.clone());
        Ok(created)
    }
}
