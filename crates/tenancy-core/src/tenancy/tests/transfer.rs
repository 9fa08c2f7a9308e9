use std::sync::atomic::Ordering;

use super::common::Harness;
use crate::tenancy::domain::{
    ApplicationId, EntityKind, TenancyId, TenancyStatus, UnitId, UnitStatus,
};
use crate::tenancy::error::{ErrorKind, WorkflowError};
use crate::tenancy::invariants::OccupancyDiscrepancy;

#[tokio::test]
async fn change_unit_moves_tenancy_and_rent() {
    let harness = Harness::seeded().await;
    let tenancy_id = harness.assigned().await;

    let moved = harness
        .service
        .change_unit(&tenancy_id, &UnitId::from("U2"))
        .await
        .expect("transfer succeeds");

    assert_eq!(moved.unit_id, UnitId::from("U2"));
    assert_eq!(moved.monthly_rent, 62_000);
    assert_eq!(moved.status, TenancyStatus::Active);
    assert_eq!(harness.unit_status("U1").await, UnitStatus::Vacant);
    assert_eq!(harness.unit_status("U2").await, UnitStatus::Occupied);
    assert_eq!(
        harness.feed.event_types()[3..],
        ["unit_vacated", "tenancy_unit_changed", "unit_occupied"]
    );
    harness.assert_consistent().await;
}

#[tokio::test]
async fn occupied_target_is_refused_without_changes() {
    let harness = Harness::seeded().await;
    let tenancy_id = harness.assigned().await;
    harness
        .service
        .assign(&ApplicationId::from("A2"), &UnitId::from("U2"))
        .await
        .expect("second assignment");
    let before = harness.feed.events().len();

    let err = harness
        .service
        .change_unit(&tenancy_id, &UnitId::from("U2"))
        .await
        .expect_err("target occupied");

    assert_eq!(
        err,
        WorkflowError::UnitUnavailable {
            unit_id: UnitId::from("U2")
        }
    );
    let tenancy = harness.stored_tenancy(&tenancy_id).await;
    assert_eq!(tenancy.unit_id, UnitId::from("U1"));
    assert_eq!(tenancy.monthly_rent, 50_000);
    assert_eq!(harness.unit_status("U1").await, UnitStatus::Occupied);
    assert_eq!(harness.feed.events().len(), before);
    harness.assert_consistent().await;
}

#[tokio::test]
async fn invalid_targets_are_rejected_up_front() {
    let harness = Harness::seeded().await;
    let tenancy_id = harness.assigned().await;

    let same = harness
        .service
        .change_unit(&tenancy_id, &UnitId::from("U1"))
        .await
        .expect_err("same unit");
    assert_eq!(same.kind(), ErrorKind::Validation);

    let other_property = harness
        .service
        .change_unit(&tenancy_id, &UnitId::from("U9"))
        .await
        .expect_err("unit on another property");
    assert!(matches!(
        other_property,
        WorkflowError::Validation {
            field: "unit_id",
            ..
        }
    ));

    let unknown = harness
        .service
        .change_unit(&TenancyId::from("ten-missing"), &UnitId::from("U2"))
        .await
        .expect_err("unknown tenancy");
    assert!(matches!(
        unknown,
        WorkflowError::Validation {
            field: "tenancy_id",
            ..
        }
    ));

    assert_eq!(harness.unit_status("U1").await, UnitStatus::Occupied);
    harness.assert_consistent().await;
}

#[tokio::test]
async fn ended_tenancy_cannot_change_unit() {
    let harness = Harness::seeded().await;
    let tenancy_id = harness.assigned().await;
    harness
        .service
        .end_tenancy(&tenancy_id)
        .await
        .expect("end succeeds");

    let err = harness
        .service
        .change_unit(&tenancy_id, &UnitId::from("U2"))
        .await
        .expect_err("ended tenancy");

    assert_eq!(
        err,
        WorkflowError::InvalidState {
            entity: EntityKind::Tenancy,
            id: tenancy_id.to_string(),
            expected: "active",
            actual: "ended",
        }
    );
    assert_eq!(harness.unit_status("U2").await, UnitStatus::Vacant);
}

#[tokio::test]
async fn new_unit_taken_mid_transfer_rolls_back_to_old_unit() {
    let harness = Harness::seeded().await;
    let tenancy_id = harness.assigned().await;
    harness.store.steal_on_claim("U2");

    let err = harness
        .service
        .change_unit(&tenancy_id, &UnitId::from("U2"))
        .await
        .expect_err("new unit lost");

    assert_eq!(
        err,
        WorkflowError::UnitUnavailable {
            unit_id: UnitId::from("U2")
        }
    );
    let tenancy = harness.stored_tenancy(&tenancy_id).await;
    assert_eq!(tenancy.unit_id, UnitId::from("U1"));
    assert_eq!(tenancy.monthly_rent, 50_000);
    assert!(tenancy.is_active());
    assert_eq!(harness.unit_status("U1").await, UnitStatus::Occupied);

    // U2 was grabbed outside the engine, so it is the only thing the audit reports.
    let findings = harness.service.audit_occupancy().await.expect("audit runs");
    assert_eq!(
        findings,
        vec![OccupancyDiscrepancy::OccupiedWithoutTenancy {
            unit_id: UnitId::from("U2")
        }]
    );
}

#[tokio::test]
async fn losing_both_units_requires_manual_reconciliation() {
    let harness = Harness::seeded().await;
    let tenancy_id = harness.assigned().await;
    harness.store.steal_on_claim("U2");
    harness.store.steal_on_claim("U1");

    let err = harness
        .service
        .change_unit(&tenancy_id, &UnitId::from("U2"))
        .await
        .expect_err("rollback cannot complete");

    assert_eq!(err.kind(), ErrorKind::ManualReconciliation);
    assert!(matches!(
        &err,
        WorkflowError::ManualReconciliationRequired { tenancy_id: flagged, .. } if flagged == &tenancy_id
    ));
    assert!(harness
        .feed
        .event_types()
        .contains(&"reconciliation_required"));
}

#[tokio::test]
async fn failed_repoint_reoccupies_old_unit() {
    let harness = Harness::seeded().await;
    let tenancy_id = harness.assigned().await;
    harness.store.relocate_failures.store(3, Ordering::SeqCst);

    let err = harness
        .service
        .change_unit(&tenancy_id, &UnitId::from("U2"))
        .await
        .expect_err("relocate exhausts retries");

    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(
        harness.stored_tenancy(&tenancy_id).await.unit_id,
        UnitId::from("U1")
    );
    assert_eq!(harness.unit_status("U1").await, UnitStatus::Occupied);
    assert_eq!(harness.unit_status("U2").await, UnitStatus::Vacant);
    harness.assert_consistent().await;
}

#[tokio::test]
async fn failed_claim_of_new_unit_rolls_back_cleanly() {
    let harness = Harness::seeded().await;
    let tenancy_id = harness.assigned().await;
    harness.store.claim_failures.store(3, Ordering::SeqCst);

    let err = harness
        .service
        .change_unit(&tenancy_id, &UnitId::from("U2"))
        .await
        .expect_err("claim exhausts retries");

    assert!(err.is_retryable());
    let tenancy = harness.stored_tenancy(&tenancy_id).await;
    assert_eq!(tenancy.unit_id, UnitId::from("U1"));
    assert_eq!(tenancy.monthly_rent, 50_000);
    assert_eq!(harness.unit_status("U2").await, UnitStatus::Vacant);
    harness.assert_consistent().await;
}

#[tokio::test]
async fn transfer_racing_end_tenancy_leaves_no_orphaned_unit() {
    let harness = Harness::seeded().await;
    let tenancy_id = harness.assigned().await;
    let target = UnitId::from("U2");

    let (moved, ended) = tokio::join!(
        harness.service.change_unit(&tenancy_id, &target),
        harness.service.end_tenancy(&tenancy_id),
    );

    ended.expect("end always wins eventually");
    if let Err(err) = &moved {
        assert_ne!(err.kind(), ErrorKind::ManualReconciliation, "{err}");
    }
    assert_eq!(
        harness.stored_tenancy(&tenancy_id).await.status,
        TenancyStatus::Ended
    );
    harness.assert_consistent().await;
}

#[tokio::test]
async fn two_transfers_to_one_unit_leave_a_single_holder() {
    let harness = Harness::seeded().await;
    let first = harness.assigned().await;
    let second = harness
        .service
        .assign(&ApplicationId::from("A2"), &UnitId::from("U3"))
        .await
        .expect("second assignment")
        .id;
    let target = UnitId::from("U2");

    let (left, right) = tokio::join!(
        harness.service.change_unit(&first, &target),
        harness.service.change_unit(&second, &target),
    );

    let outcomes = [left, right];
    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .filter_map(|outcome| outcome.as_ref().err())
        .all(|err| err.kind() == ErrorKind::PreconditionFailed));
    harness.assert_consistent().await;
}
