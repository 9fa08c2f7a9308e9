use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier wrapper for rental applications.
    ApplicationId
);
string_id!(
    /// Identifier wrapper for rentable units.
    UnitId
);
string_id!(
    /// Identifier wrapper for tenancies (leases on a unit).
    TenancyId
);
string_id!(PropertyId);
string_id!(
    /// Identifier of a resolved tenant profile.
    TenantId
);
string_id!(LandlordId);

impl TenancyId {
    pub fn generate() -> Self {
        Self(format!("ten-{}", uuid::Uuid::new_v4().simple()))
    }
}

impl TenantId {
    pub fn generate() -> Self {
        Self(format!("tp-{}", uuid::Uuid::new_v4().simple()))
    }
}

/// Entities whose state the lifecycle workflows reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Application,
    Unit,
    Tenancy,
    TenantProfile,
}

impl EntityKind {
    pub const fn label(self) -> &'static str {
        match self {
            EntityKind::Application => "application",
            EntityKind::Unit => "unit",
            EntityKind::Tenancy => "tenancy",
            EntityKind::TenantProfile => "tenant_profile",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Application decision status. Approved and rejected are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Vacant,
    Occupied,
}

impl UnitStatus {
    pub const fn label(self) -> &'static str {
        match self {
            UnitStatus::Vacant => "vacant",
            UnitStatus::Occupied => "occupied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenancyStatus {
    Active,
    Ended,
}

impl TenancyStatus {
    pub const fn label(self) -> &'static str {
        match self {
            TenancyStatus::Active => "active",
            TenancyStatus::Ended => "ended",
        }
    }
}

/// Role stamped on profiles the lifecycle engine creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileRole {
    Tenant,
}

/// Rental application as submitted by a prospective tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub property_id: PropertyId,
    pub applicant_email: String,
    pub applicant_name: String,
    pub applicant_phone: String,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
}

/// Rentable unit. `monthly_rent` is stored in minor currency units.
///
/// `occupied_by` names the tenancy whose claim made the unit occupied; it is `None` while
/// the unit is vacant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub property_id: PropertyId,
    pub landlord_id: LandlordId,
    pub unit_number: String,
    pub monthly_rent: u32,
    pub status: UnitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupied_by: Option<TenancyId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenancy {
    pub id: TenancyId,
    pub property_id: PropertyId,
    pub unit_id: UnitId,
    pub tenant_id: TenantId,
    pub landlord_id: LandlordId,
    pub lease_start: NaiveDate,
    pub lease_end: NaiveDate,
    pub monthly_rent: u32,
    pub security_deposit: u32,
    pub status: TenancyStatus,
}

impl Tenancy {
    pub fn is_active(&self) -> bool {
        self.status == TenancyStatus::Active
    }
}

/// Fields supplied when opening a tenancy. The id is chosen by the caller so that a
/// retried create can be recognised instead of duplicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTenancy {
    pub id: TenancyId,
    pub property_id: PropertyId,
    pub unit_id: UnitId,
    pub tenant_id: TenantId,
    pub landlord_id: LandlordId,
    pub lease_start: NaiveDate,
    pub lease_end: NaiveDate,
    pub monthly_rent: u32,
    pub security_deposit: u32,
}

impl NewTenancy {
    pub fn into_tenancy(self) -> Tenancy {
        Tenancy {
            id: self.id,
            property_id: self.property_id,
            unit_id: self.unit_id,
            tenant_id: self.tenant_id,
            landlord_id: self.landlord_id,
            lease_start: self.lease_start,
            lease_end: self.lease_end,
            monthly_rent: self.monthly_rent,
            security_deposit: self.security_deposit,
            status: TenancyStatus::Active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantProfile {
    pub id: TenantId,
    pub email: String,
    pub name: String,
    pub phone: String,
    pub role: ProfileRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTenantProfile {
    pub email: String,
    pub name: String,
    pub phone: String,
    pub role: ProfileRole,
}

/// Canonical form used for profile lookups: trimmed and lowercased.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}
