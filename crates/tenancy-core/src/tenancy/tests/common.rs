use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};

use crate::tenancy::domain::{
    Application, ApplicationId, ApplicationStatus, LandlordId, NewTenancy, NewTenantProfile,
    ProfileRole, PropertyId, Tenancy, TenancyId, TenantId, TenantProfile, Unit, UnitId,
    UnitStatus,
};
use crate::tenancy::events::RecordingChangeFeed;
use crate::tenancy::memory::InMemoryStore;
use crate::tenancy::retry::RetryPolicy;
use crate::tenancy::store::{
    ApplicationFilter, ApplicationStore, ProfileDirectory, StoreError, TenancyFilter,
    TenancyStore, TenancyStores, UnitFilter, UnitStore,
};
use crate::tenancy::{TenancyLifecycleService, WorkflowSettings};

pub(super) fn settings() -> WorkflowSettings {
    WorkflowSettings {
        retry: RetryPolicy::new(3, Duration::ZERO),
        release_retry: RetryPolicy::new(5, Duration::ZERO),
        ..WorkflowSettings::default()
    }
}

pub(super) fn application(id: &str, property: &str, email: &str) -> Application {
    Application {
        id: ApplicationId::from(id),
        property_id: PropertyId::from(property),
        applicant_email: email.to_string(),
        applicant_name: format!("Applicant {id}"),
        applicant_phone: "515-555-0100".to_string(),
        status: ApplicationStatus::Pending,
        created_at: Utc
            .with_ymd_and_hms(2025, 9, 1, 9, 0, 0)
            .single()
            .expect("valid timestamp"),
    }
}

pub(super) fn unit(id: &str, property: &str, rent: u32) -> Unit {
    Unit {
        id: UnitId::from(id),
        property_id: PropertyId::from(property),
        landlord_id: LandlordId::from("L1"),
        unit_number: id.trim_start_matches('U').to_string(),
        monthly_rent: rent,
        status: UnitStatus::Vacant,
        occupied_by: None,
    }
}

pub(super) fn tenancy(id: &str, unit_id: &str) -> Tenancy {
    NewTenancy {
        id: TenancyId::from(id),
        property_id: PropertyId::from("P1"),
        unit_id: UnitId::from(unit_id),
        tenant_id: TenantId::from("tp-1"),
        landlord_id: LandlordId::from("L1"),
        lease_start: NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid"),
        lease_end: NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid"),
        monthly_rent: 50_000,
        security_deposit: 50_000,
    }
    .into_tenancy()
}

/// In-memory store wrapped with injectable faults.
#[derive(Default)]
pub(super) struct FaultyStore {
    pub(super) inner: InMemoryStore,
    /// Pending `Unavailable` failures for unit claims.
    pub(super) claim_failures: AtomicU32,
    /// Pending `Unavailable` failures for unit releases.
    pub(super) release_failures: AtomicU32,
    pub(super) relocate_failures: AtomicU32,
    /// Units another caller grabs just before our claim lands.
    pub(super) stolen_on_claim: Mutex<HashSet<UnitId>>,
    /// Pending `Unavailable` failures for application approvals.
    pub(super) approve_failures: AtomicU32,
    /// Reject the application just before our approval lands.
    pub(super) reject_on_approve: AtomicBool,
    /// Serve the next unit listing as if every unit were vacant, like a read that races
    /// ahead of concurrent claims.
    pub(super) stale_unit_listing: AtomicBool,
}

impl FaultyStore {
    pub(super) fn steal_on_claim(&self, unit: &str) {
        self.stolen_on_claim
            .lock()
            .expect("steal set")
            .insert(UnitId::from(unit));
    }

    fn take_steal(&self, unit: &UnitId) -> bool {
        self.stolen_on_claim.lock().expect("steal set").remove(unit)
    }
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

/// Holder recorded for units grabbed outside the engine.
pub(super) fn intruder() -> TenancyId {
    TenancyId::from("ten-intruder")
}

fn injected() -> StoreError {
    StoreError::Unavailable("injected fault".to_string())
}

#[async_trait]
impl ApplicationStore for FaultyStore {
    async fn insert(&self, application: Application) -> Result<Application, StoreError> {
        ApplicationStore::insert(&self.inner, application).await
    }

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, StoreError> {
        ApplicationStore::fetch(&self.inner, id).await
    }

    async fn transition(
        &self,
        id: &ApplicationId,
        expected: ApplicationStatus,
        next: ApplicationStatus,
    ) -> Result<bool, StoreError> {
        if next == ApplicationStatus::Approved && take(&self.approve_failures) {
            return Err(injected());
        }
        if next == ApplicationStatus::Approved && self.reject_on_approve.swap(false, Ordering::SeqCst)
        {
            ApplicationStore::transition(
                &self.inner,
                id,
                ApplicationStatus::Pending,
                ApplicationStatus::Rejected,
            )
            .await?;
        }
        ApplicationStore::transition(&self.inner, id, expected, next).await
    }

    async fn list(&self, filter: &ApplicationFilter) -> Result<Vec<Application>, StoreError> {
        ApplicationStore::list(&self.inner, filter).await
    }
}

#[async_trait]
impl UnitStore for FaultyStore {
    async fn insert(&self, unit: Unit) -> Result<Unit, StoreError> {
        UnitStore::insert(&self.inner, unit).await
    }

    async fn fetch(&self, id: &UnitId) -> Result<Option<Unit>, StoreError> {
        UnitStore::fetch(&self.inner, id).await
    }

    async fn claim(&self, id: &UnitId, tenancy: &TenancyId) -> Result<bool, StoreError> {
        if take(&self.claim_failures) {
            return Err(injected());
        }
        if self.take_steal(id) {
            self.inner.claim(id, &intruder()).await?;
        }
        self.inner.claim(id, tenancy).await
    }

    async fn release(&self, id: &UnitId, tenancy: &TenancyId) -> Result<bool, StoreError> {
        if take(&self.release_failures) {
            return Err(injected());
        }
        self.inner.release(id, tenancy).await
    }

    async fn list(&self, filter: &UnitFilter) -> Result<Vec<Unit>, StoreError> {
        let units = UnitStore::list(&self.inner, filter).await?;
        if !self.stale_unit_listing.swap(false, Ordering::SeqCst) {
            return Ok(units);
        }
        Ok(units
            .into_iter()
            .map(|unit| Unit {
                status: UnitStatus::Vacant,
                occupied_by: None,
                ..unit
            })
            .collect())
    }
}

#[async_trait]
impl TenancyStore for FaultyStore {
    async fn create(&self, tenancy: NewTenancy) -> Result<Tenancy, StoreError> {
        TenancyStore::create(&self.inner, tenancy).await
    }

    async fn fetch(&self, id: &TenancyId) -> Result<Option<Tenancy>, StoreError> {
        TenancyStore::fetch(&self.inner, id).await
    }

    async fn end(
        &self,
        id: &TenancyId,
        ended_on: NaiveDate,
    ) -> Result<Option<Tenancy>, StoreError> {
        TenancyStore::end(&self.inner, id, ended_on).await
    }

    async fn relocate(
        &self,
        id: &TenancyId,
        from: &UnitId,
        to: &UnitId,
        monthly_rent: u32,
    ) -> Result<bool, StoreError> {
        if take(&self.relocate_failures) {
            return Err(injected());
        }
        TenancyStore::relocate(&self.inner, id, from, to, monthly_rent).await
    }

    async fn list(&self, filter: &TenancyFilter) -> Result<Vec<Tenancy>, StoreError> {
        TenancyStore::list(&self.inner, filter).await
    }
}

#[async_trait]
impl ProfileDirectory for FaultyStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<TenantProfile>, StoreError> {
        self.inner.find_by_email(email).await
    }

    async fn create(&self, profile: NewTenantProfile) -> Result<TenantProfile, StoreError> {
        ProfileDirectory::create(&self.inner, profile).await
    }
}

/// Directory that loses every creation race: the first lookup misses, and by the time the
/// create lands another caller has already stored the profile.
#[derive(Default)]
pub(super) struct RacingDirectory {
    pub(super) inner: InMemoryStore,
    raced: AtomicBool,
}

#[async_trait]
impl ProfileDirectory for RacingDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<TenantProfile>, StoreError> {
        if !self.raced.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_by_email(email).await
    }

    async fn create(&self, profile: NewTenantProfile) -> Result<TenantProfile, StoreError> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            let winner = NewTenantProfile {
                name: "Concurrent Winner".to_string(),
                role: ProfileRole::Tenant,
                ..profile.clone()
            };
            ProfileDirectory::create(&self.inner, winner).await?;
        }
        ProfileDirectory::create(&self.inner, profile).await
    }
}

/// Service over a [`FaultyStore`] seeded with two properties.
///
/// P1: units U1 (50000), U2 (62000), U3 (48000); pending applications A1, A2.
/// P2: unit U9 (41000); pending application A9.
pub(super) struct Harness {
    pub(super) service: TenancyLifecycleService,
    pub(super) store: Arc<FaultyStore>,
    pub(super) stores: TenancyStores,
    pub(super) feed: RecordingChangeFeed,
}

impl Harness {
    pub(super) async fn seeded() -> Self {
        let store = Arc::new(FaultyStore::default());
        let stores = TenancyStores::shared(store.clone());

        for seeded in [
            unit("U1", "P1", 50_000),
            unit("U2", "P1", 62_000),
            unit("U3", "P1", 48_000),
            unit("U9", "P2", 41_000),
        ] {
            stores.units.insert(seeded).await.expect("seed unit");
        }
        for seeded in [
            application("A1", "P1", "ada@example.com"),
            application("A2", "P1", "grace@example.com"),
            application("A9", "P2", "alan@example.com"),
        ] {
            stores
                .applications
                .insert(seeded)
                .await
                .expect("seed application");
        }

        let feed = RecordingChangeFeed::default();
        let service = TenancyLifecycleService::new(stores.clone(), Arc::new(feed.clone()), settings());
        Self {
            service,
            store,
            stores,
            feed,
        }
    }

    pub(super) async fn unit_status(&self, id: &str) -> UnitStatus {
        self.stores
            .units
            .fetch(&UnitId::from(id))
            .await
            .expect("fetch unit")
            .expect("unit present")
            .status
    }

    pub(super) async fn application_status(&self, id: &str) -> ApplicationStatus {
        self.stores
            .applications
            .fetch(&ApplicationId::from(id))
            .await
            .expect("fetch application")
            .expect("application present")
            .status
    }

    pub(super) async fn stored_tenancy(&self, id: &TenancyId) -> Tenancy {
        self.stores
            .tenancies
            .fetch(id)
            .await
            .expect("fetch tenancy")
            .expect("tenancy present")
    }

    pub(super) async fn all_tenancies(&self) -> Vec<Tenancy> {
        self.stores
            .tenancies
            .list(&TenancyFilter::default())
            .await
            .expect("list tenancies")
    }

    pub(super) async fn assert_consistent(&self) {
        let findings = self.service.audit_occupancy().await.expect("audit runs");
        assert!(findings.is_empty(), "occupancy discrepancies: {findings:?}");
    }

    /// Assign A1 to U1 and return the tenancy id.
    pub(super) async fn assigned(&self) -> TenancyId {
        self.service
            .assign(&ApplicationId::from("A1"), &UnitId::from("U1"))
            .await
            .expect("assignment succeeds")
            .id
    }
}
