use std::sync::atomic::Ordering;

use chrono::Utc;

use super::common::{intruder, Harness};
use crate::tenancy::domain::{
    ApplicationId, EntityKind, TenancyId, TenancyStatus, UnitId, UnitStatus,
};
use crate::tenancy::error::{ErrorKind, WorkflowError};
use crate::tenancy::invariants::OccupancyDiscrepancy;

#[tokio::test]
async fn end_tenancy_frees_the_unit() {
    let harness = Harness::seeded().await;
    let tenancy_id = harness.assigned().await;

    let ended = harness
        .service
        .end_tenancy(&tenancy_id)
        .await
        .expect("end succeeds");

    assert_eq!(ended.status, TenancyStatus::Ended);
    assert_eq!(ended.lease_end, Utc::now().date_naive());
    assert_eq!(harness.unit_status("U1").await, UnitStatus::Vacant);
    assert_eq!(
        harness.feed.event_types()[3..],
        ["tenancy_ended", "unit_vacated"]
    );
    harness.assert_consistent().await;

    harness
        .service
        .assign(&ApplicationId::from("A2"), &UnitId::from("U1"))
        .await
        .expect("freed unit can be let again");
    harness.assert_consistent().await;
}

#[tokio::test]
async fn ending_twice_reports_invalid_state() {
    let harness = Harness::seeded().await;
    let tenancy_id = harness.assigned().await;
    harness
        .service
        .end_tenancy(&tenancy_id)
        .await
        .expect("first end");
    let before = harness.feed.events().len();

    let err = harness
        .service
        .end_tenancy(&tenancy_id)
        .await
        .expect_err("already ended");

    assert_eq!(
        err,
        WorkflowError::InvalidState {
            entity: EntityKind::Tenancy,
            id: tenancy_id.to_string(),
            expected: "active",
            actual: "ended",
        }
    );
    assert_eq!(harness.unit_status("U1").await, UnitStatus::Vacant);
    assert_eq!(harness.feed.events().len(), before);
}

#[tokio::test]
async fn unknown_tenancy_is_a_validation_error() {
    let harness = Harness::seeded().await;

    let err = harness
        .service
        .end_tenancy(&TenancyId::from("ten-missing"))
        .await
        .expect_err("unknown tenancy");

    assert!(matches!(
        err,
        WorkflowError::Validation {
            field: "tenancy_id",
            ..
        }
    ));
}

#[tokio::test]
async fn release_uses_its_longer_budget() {
    let harness = Harness::seeded().await;
    let tenancy_id = harness.assigned().await;
    // More than the default budget of three, fewer than the release budget of five.
    harness.store.release_failures.store(4, Ordering::SeqCst);

    harness
        .service
        .end_tenancy(&tenancy_id)
        .await
        .expect("release succeeds on the last attempt");

    assert_eq!(harness.unit_status("U1").await, UnitStatus::Vacant);
    harness.assert_consistent().await;
}

#[tokio::test]
async fn exhausted_release_escalates_to_manual_reconciliation() {
    let harness = Harness::seeded().await;
    let tenancy_id = harness.assigned().await;
    harness.store.release_failures.store(5, Ordering::SeqCst);

    let err = harness
        .service
        .end_tenancy(&tenancy_id)
        .await
        .expect_err("release never lands");

    assert_eq!(err.kind(), ErrorKind::ManualReconciliation);
    assert_eq!(
        harness.stored_tenancy(&tenancy_id).await.status,
        TenancyStatus::Ended
    );
    assert_eq!(harness.unit_status("U1").await, UnitStatus::Occupied);
    assert_eq!(
        harness.feed.event_types().last(),
        Some(&"reconciliation_required")
    );

    let findings = harness.service.audit_occupancy().await.expect("audit runs");
    assert_eq!(
        findings,
        vec![OccupancyDiscrepancy::OccupiedWithoutTenancy {
            unit_id: UnitId::from("U1")
        }]
    );
}

#[tokio::test]
async fn unit_released_elsewhere_counts_as_released() {
    let harness = Harness::seeded().await;
    let tenancy_id = harness.assigned().await;
    harness
        .stores
        .units
        .release(&UnitId::from("U1"), &tenancy_id)
        .await
        .expect("manual release");

    let ended = harness
        .service
        .end_tenancy(&tenancy_id)
        .await
        .expect("end succeeds");

    assert_eq!(ended.status, TenancyStatus::Ended);
    assert_eq!(
        harness.feed.event_types().last(),
        Some(&"tenancy_ended")
    );
    harness.assert_consistent().await;
}

#[tokio::test]
async fn unit_re_let_to_another_tenancy_is_left_alone() {
    let harness = Harness::seeded().await;
    let first = harness.assigned().await;
    harness
        .stores
        .units
        .release(&UnitId::from("U1"), &first)
        .await
        .expect("manual release");
    let second = harness
        .service
        .assign(&ApplicationId::from("A2"), &UnitId::from("U1"))
        .await
        .expect("unit re-let");

    // The stale tenancy still points at U1 until it is ended.
    harness
        .service
        .end_tenancy(&first)
        .await
        .expect("end succeeds");

    let unit = harness
        .stores
        .units
        .fetch(&UnitId::from("U1"))
        .await
        .expect("fetch unit")
        .expect("unit present");
    assert_eq!(unit.status, UnitStatus::Occupied);
    assert_eq!(unit.occupied_by, Some(second.id));
    assert_eq!(
        harness.feed.event_types().last(),
        Some(&"tenancy_ended")
    );
    harness.assert_consistent().await;
}

#[tokio::test]
async fn unit_held_without_active_tenancy_needs_reconciliation() {
    let harness = Harness::seeded().await;
    let tenancy_id = harness.assigned().await;
    let unit_id = UnitId::from("U1");
    harness
        .stores
        .units
        .release(&unit_id, &tenancy_id)
        .await
        .expect("manual release");
    harness
        .stores
        .units
        .claim(&unit_id, &intruder())
        .await
        .expect("claim outside the engine");

    let err = harness
        .service
        .end_tenancy(&tenancy_id)
        .await
        .expect_err("unit left occupied by an unbacked holder");

    assert_eq!(err.kind(), ErrorKind::ManualReconciliation);
    assert_eq!(
        harness.stored_tenancy(&tenancy_id).await.status,
        TenancyStatus::Ended
    );
    assert_eq!(
        harness.feed.event_types()[3..],
        ["tenancy_ended", "reconciliation_required"]
    );
    assert_eq!(
        harness.service.audit_occupancy().await.expect("audit runs"),
        vec![OccupancyDiscrepancy::OccupiedWithoutTenancy { unit_id }]
    );
}
