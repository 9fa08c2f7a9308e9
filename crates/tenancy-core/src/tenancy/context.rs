use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate, Utc};

use super::events::{emit, ChangeFeed, TenancyEvent};
use super::retry::RetryPolicy;
use super::store::TenancyStores;
use crate::config::TenancyConfig;

const DEFAULT_LEASE_DAYS: i64 = 365;
const DEFAULT_DEPOSIT_MONTHS: u32 = 1;

/// Tunables shared by every workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowSettings {
    /// Budget applied to each forward step and compensation.
    pub retry: RetryPolicy,
    /// Longer budget for releasing a unit after its tenancy has already ended.
    pub release_retry: RetryPolicy,
    pub lease_days: i64,
    pub deposit_months: u32,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            release_retry: RetryPolicy::new(5, Duration::from_millis(50)),
            lease_days: DEFAULT_LEASE_DAYS,
            deposit_months: DEFAULT_DEPOSIT_MONTHS,
        }
    }
}

impl From<&TenancyConfig> for WorkflowSettings {
    fn from(config: &TenancyConfig) -> Self {
        let base_delay = Duration::from_millis(config.retry_base_delay_ms);
        Self {
            retry: RetryPolicy::new(config.retry_attempts, base_delay),
            release_retry: RetryPolicy::new(config.release_retry_attempts, base_delay),
            lease_days: config.lease_days,
            deposit_months: config.deposit_months,
        }
    }
}

impl WorkflowSettings {
    pub fn security_deposit(&self, monthly_rent: u32) -> u32 {
        monthly_rent.saturating_mul(self.deposit_months)
    }

    /// Last day of a lease starting on `lease_start`, or `None` when `lease_days` is not a
    /// positive length the calendar can represent.
    pub fn lease_end(&self, lease_start: NaiveDate) -> Option<NaiveDate> {
        let days = u64::try_from(self.lease_days).ok().filter(|days| *days > 0)?;
        lease_start.checked_add_days(Days::new(days))
    }
}

/// Stores, feed and settings handed to each workflow.
#[derive(Clone)]
pub struct WorkflowContext {
    pub(crate) stores: TenancyStores,
    pub(crate) feed: Arc<dyn ChangeFeed>,
    pub(crate) settings: WorkflowSettings,
}

impl WorkflowContext {
    pub fn new(stores: TenancyStores, feed: Arc<dyn ChangeFeed>, settings: WorkflowSettings) -> Self {
        Self {
            stores,
            feed,
            settings,
        }
    }

    pub fn stores(&self) -> &TenancyStores {
        &self.stores
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub(crate) fn emit(&self, event: TenancyEvent) {
        emit(self.feed.as_ref(), event);
    }

    pub(crate) fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}
