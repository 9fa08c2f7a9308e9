use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

use super::domain::{ApplicationId, TenancyId, UnitId};

/// Post-commit notifications. Consumers treat these as invalidation hints only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TenancyEvent {
    TenancyCreated {
        tenancy_id: TenancyId,
        unit_id: UnitId,
        application_id: ApplicationId,
    },
    UnitOccupied {
        unit_id: UnitId,
        tenancy_id: TenancyId,
    },
    UnitVacated {
        unit_id: UnitId,
        tenancy_id: TenancyId,
    },
    ApplicationApproved {
        application_id: ApplicationId,
        tenancy_id: TenancyId,
    },
    ApplicationRejected {
        application_id: ApplicationId,
    },
    TenancyUnitChanged {
        tenancy_id: TenancyId,
        from_unit: UnitId,
        to_unit: UnitId,
    },
    TenancyEnded {
        tenancy_id: TenancyId,
        unit_id: UnitId,
    },
    ReconciliationRequired {
        tenancy_id: TenancyId,
        context: String,
    },
}

impl TenancyEvent {
    pub const fn event_type(&self) -> &'static str {
        match self {
            TenancyEvent::TenancyCreated { .. } => "tenancy_created",
            TenancyEvent::UnitOccupied { .. } => "unit_occupied",
            TenancyEvent::UnitVacated { .. } => "unit_vacated",
            TenancyEvent::ApplicationApproved { .. } => "application_approved",
            TenancyEvent::ApplicationRejected { .. } => "application_rejected",
            TenancyEvent::TenancyUnitChanged { .. } => "tenancy_unit_changed",
            TenancyEvent::TenancyEnded { .. } => "tenancy_ended",
            TenancyEvent::ReconciliationRequired { .. } => "reconciliation_required",
        }
    }
}

/// Feed dispatch error.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("change feed transport unavailable: {0}")]
    Transport(String),
}

/// Outbound, best-effort change feed.
pub trait ChangeFeed: Send + Sync {
    fn publish(&self, event: TenancyEvent) -> Result<(), FeedError>;
}

/// Fire-and-forget publish; delivery failures never affect the workflow outcome.
pub(crate) fn emit(feed: &dyn ChangeFeed, event: TenancyEvent) {
    let event_type = event.event_type();
    if let Err(err) = feed.publish(event) {
        warn!(event_type, error = %err, "dropped change feed event");
    }
}

/// Feed that only writes events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingChangeFeed;

impl ChangeFeed for TracingChangeFeed {
    fn publish(&self, event: TenancyEvent) -> Result<(), FeedError> {
        let payload = serde_json::to_string(&event)
            .map_err(|err| FeedError::Transport(err.to_string()))?;
        info!(event_type = event.event_type(), %payload, "change feed event");
        Ok(())
    }
}

/// Feed that keeps every event in memory, for demos and assertions.
#[derive(Debug, Default, Clone)]
pub struct RecordingChangeFeed {
    events: Arc<Mutex<Vec<TenancyEvent>>>,
}

impl RecordingChangeFeed {
    pub fn events(&self) -> Vec<TenancyEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.events()
            .iter()
            .map(TenancyEvent::event_type)
            .collect()
    }
}

impl ChangeFeed for RecordingChangeFeed {
    fn publish(&self, event: TenancyEvent) -> Result<(), FeedError> {
        self.events
            .lock()
            .map_err(|_| FeedError::Transport("event buffer poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}
