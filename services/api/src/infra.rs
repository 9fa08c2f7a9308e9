use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tenancy_core::tenancy::{
    Application, ApplicationId, ApplicationStatus, LandlordId, PropertyId, StoreError,
    TenancyStores, Unit, UnitId, UnitStatus,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) const DEMO_PROPERTY: &str = "maple-court";
const DEMO_LANDLORD: &str = "landlord-maple";

/// Units offered at the sample property: (unit id, unit number, monthly rent in cents).
const DEMO_UNITS: [(&str, &str, u32); 4] = [
    ("maple-101", "101", 95_000),
    ("maple-102", "102", 98_000),
    ("maple-201", "201", 110_000),
    ("maple-202", "202", 112_500),
];

/// Pending applications: (application id, applicant name, email, phone).
const DEMO_APPLICATIONS: [(&str, &str, &str, &str); 4] = [
    ("app-1001", "Jordan Avery", "jordan.avery@example.com", "319-555-0142"),
    ("app-1002", "Riley Chen", "riley.chen@example.com", "319-555-0178"),
    ("app-1003", "Casey Morgan", "casey.morgan@example.com", "319-555-0110"),
    ("app-1004", "Jordan Avery", "Jordan.Avery@Example.com", "319-555-0142"),
];

/// Load a small portfolio with every unit vacant and every application pending.
pub(crate) async fn seed_demo_portfolio(stores: &TenancyStores) -> Result<(), StoreError> {
    for (id, number, rent) in DEMO_UNITS {
        stores
            .units
            .insert(Unit {
                id: UnitId::from(id),
                property_id: PropertyId::from(DEMO_PROPERTY),
                landlord_id: LandlordId::from(DEMO_LANDLORD),
                unit_number: number.to_string(),
                monthly_rent: rent,
                status: UnitStatus::Vacant,
                occupied_by: None,
            })
            .await?;
    }

    for (id, name, email, phone) in DEMO_APPLICATIONS {
        stores
            .applications
            .insert(Application {
                id: ApplicationId::from(id),
                property_id: PropertyId::from(DEMO_PROPERTY),
                applicant_email: email.to_string(),
                applicant_name: name.to_string(),
                applicant_phone: phone.to_string(),
                status: ApplicationStatus::Pending,
                created_at: Utc::now(),
            })
            .await?;
    }

    Ok(())
}
