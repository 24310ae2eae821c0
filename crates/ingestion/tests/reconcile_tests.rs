//! Reconciliation engine tests against the in-memory gateway.

use chrono::Duration;
use std::sync::Arc;

use fits_common::{Observation, ObservationBatch};
use ingestion::{ReconcileError, ReconcileOptions, ReconcileState, Reconciler, Strategy};
use storage::{GatewayCall, MemoryGateway, ReferenceGateway};
use test_utils::{
    seeded_gateway, siteless_gateway, time, vgt2_e_batch, vgt2_e_source, vgt2_source_with,
};

fn merge() -> ReconcileOptions {
    ReconcileOptions::default()
}

fn resync() -> ReconcileOptions {
    ReconcileOptions {
        resync: true,
        ..Default::default()
    }
}

fn offline_resync() -> ReconcileOptions {
    ReconcileOptions {
        offline_validation: true,
        resync: true,
        ..Default::default()
    }
}

fn reconciler(gw: &Arc<MemoryGateway>, options: ReconcileOptions) -> Reconciler<MemoryGateway> {
    Reconciler::new(gw.clone(), options)
}

/// The fixture batch plus one record a day after the last.
fn batch_with_extra() -> (ObservationBatch, Observation) {
    let mut batch = vgt2_e_batch();
    let last = *batch.observations().last().unwrap();
    let extra = Observation::new(last.time + Duration::days(1), 12.2, 6.6);
    batch.push(extra);
    (batch, extra)
}

fn is_mutation(call: &GatewayCall) -> bool {
    matches!(
        call,
        GatewayCall::UpsertObservation(_) | GatewayCall::Delete { .. } | GatewayCall::Insert { .. }
    )
}

// ============================================================================
// Scenarios A-D
// ============================================================================

#[tokio::test]
async fn test_scenario_a_merge_into_empty_store() {
    let gw = Arc::new(seeded_gateway());
    let outcome = reconciler(&gw, merge()).reconcile(&vgt2_e_batch()).await.unwrap();

    assert_eq!(outcome.strategy, Strategy::Merge);
    assert_eq!(outcome.state, ReconcileState::Committed);
    assert_eq!(outcome.records_written, 7);
    assert_eq!(gw.count_observations("VGT2", "e").await, 7);
}

#[tokio::test]
async fn test_scenario_b_merge_adds_new_record() {
    let gw = Arc::new(seeded_gateway());
    let engine = reconciler(&gw, merge());
    engine.reconcile(&vgt2_e_batch()).await.unwrap();

    let (batch, _) = batch_with_extra();
    engine.reconcile(&batch).await.unwrap();

    assert_eq!(gw.count_observations("VGT2", "e").await, 8);
}

#[tokio::test]
async fn test_scenario_c_resync_conflict_leaves_store_unchanged() {
    let gw = Arc::new(seeded_gateway());
    let (batch, extra) = batch_with_extra();
    reconciler(&gw, merge()).reconcile(&batch).await.unwrap();
    assert_eq!(gw.count_observations("VGT2", "e").await, 8);

    let before = gw.observations("VGT2", "e").await;

    // A duplicate that never went through the duplicate check.
    let mut batch = batch;
    batch.push(extra);
    let err = reconciler(&gw, resync())
        .delete_then_save(&batch)
        .await
        .unwrap_err();

    assert_eq!(err.state, ReconcileState::RolledBack);
    assert!(
        matches!(
            err.source,
            ReconcileError::WriteConflict {
                stage: ReconcileState::Inserting,
                ..
            }
        ),
        "{:?}",
        err.source
    );
    assert!(!err.is_retryable());
    assert_eq!(gw.observations("VGT2", "e").await, before);

    let calls = gw.calls().await;
    assert_eq!(calls.last(), Some(&GatewayCall::Rollback));
    assert!(!calls.contains(&GatewayCall::Commit));
}

#[tokio::test]
async fn test_scenario_d_resync_removes_orphan() {
    let gw = Arc::new(seeded_gateway());
    let (batch, extra) = batch_with_extra();
    reconciler(&gw, merge()).reconcile(&batch).await.unwrap();

    let outcome = reconciler(&gw, resync())
        .reconcile(&vgt2_e_batch())
        .await
        .unwrap();

    assert_eq!(outcome.state, ReconcileState::Committed);
    assert_eq!(outcome.records_deleted, 8);
    assert_eq!(outcome.records_written, 7);

    let stored = gw.observations("VGT2", "e").await;
    assert_eq!(stored.len(), 7);
    assert!(stored.iter().all(|o| o.time != extra.time));
}

// ============================================================================
// Merge
// ============================================================================

#[tokio::test]
async fn test_merge_twice_is_idempotent() {
    let gw = Arc::new(seeded_gateway());
    let engine = reconciler(&gw, merge());

    engine.reconcile(&vgt2_e_batch()).await.unwrap();
    let once = gw.observations("VGT2", "e").await;

    engine.reconcile(&vgt2_e_batch()).await.unwrap();
    assert_eq!(gw.observations("VGT2", "e").await, once);
}

#[tokio::test]
async fn test_merge_updates_value_in_place() {
    let gw = Arc::new(seeded_gateway());
    let engine = reconciler(&gw, merge());
    engine.reconcile(&vgt2_e_batch()).await.unwrap();

    let first = vgt2_e_batch().observations()[0];
    let updated = ObservationBatch::new(
        vgt2_e_source(),
        vec![Observation::new(first.time, 99.5, 0.25)],
    );
    engine.reconcile(&updated).await.unwrap();

    let stored = gw.observations("VGT2", "e").await;
    assert_eq!(stored.len(), 7);
    assert_eq!(stored[0].value, 99.5);
    assert_eq!(stored[0].error, 0.25);
}

#[tokio::test]
async fn test_merge_allows_duplicate_timestamps_last_wins() {
    let gw = Arc::new(seeded_gateway());
    let t = time("2013-08-10T12:00:00Z");
    let batch = ObservationBatch::new(
        vgt2_e_source(),
        vec![Observation::new(t, 1.0, 0.1), Observation::new(t, 2.0, 0.2)],
    );

    reconciler(&gw, merge()).reconcile(&batch).await.unwrap();

    let stored = gw.observations("VGT2", "e").await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].value, 2.0);
}

#[tokio::test]
async fn test_merge_failure_reports_index_and_keeps_earlier_records() {
    let gw = Arc::new(seeded_gateway());
    gw.fail_upserts_after(3).await;

    let err = reconciler(&gw, merge())
        .reconcile(&vgt2_e_batch())
        .await
        .unwrap_err();

    match &err.source {
        ReconcileError::MergeAborted {
            index,
            committed,
            source,
        } => {
            assert_eq!(*index, 3);
            assert_eq!(*committed, 3);
            assert!(matches!(**source, ReconcileError::Transport(_)));
        }
        other => panic!("expected merge abort, got {:?}", other),
    }
    assert!(err.is_retryable());
    assert_eq!(err.site_id.as_deref(), Some("VGT2"));
    assert_eq!(err.type_id.as_deref(), Some("e"));
    assert_eq!(gw.count_observations("VGT2", "e").await, 3);
}

// ============================================================================
// Resync
// ============================================================================

#[tokio::test]
async fn test_resync_mirrors_batch_exactly() {
    let gw = Arc::new(seeded_gateway());
    let (bigger, _) = batch_with_extra();
    reconciler(&gw, merge()).reconcile(&bigger).await.unwrap();

    let batch = vgt2_e_batch();
    reconciler(&gw, resync()).reconcile(&batch).await.unwrap();

    assert_eq!(gw.observations("VGT2", "e").await, batch.observations());
}

#[tokio::test]
async fn test_resync_leaves_other_types_alone() {
    let gw = Arc::new(seeded_gateway());
    let north = ObservationBatch::new(
        vgt2_source_with("n", "bernese5", ""),
        vgt2_e_batch().observations().to_vec(),
    );
    reconciler(&gw, merge()).reconcile(&north).await.unwrap();

    reconciler(&gw, resync()).reconcile(&vgt2_e_batch()).await.unwrap();

    assert_eq!(gw.count_observations("VGT2", "n").await, 7);
    assert_eq!(gw.count_observations("VGT2", "e").await, 7);
}

#[tokio::test]
async fn test_resync_with_empty_batch_clears_source() {
    let gw = Arc::new(seeded_gateway());
    reconciler(&gw, merge()).reconcile(&vgt2_e_batch()).await.unwrap();

    let empty = ObservationBatch::new(vgt2_e_source(), Vec::new());
    let outcome = reconciler(&gw, resync()).reconcile(&empty).await.unwrap();

    assert_eq!(outcome.records_deleted, 7);
    assert_eq!(outcome.records_written, 0);
    assert_eq!(gw.count_observations("VGT2", "e").await, 0);
}

#[tokio::test]
async fn test_resync_duplicate_check_prevents_transaction() {
    let gw = Arc::new(seeded_gateway());
    let (mut batch, extra) = batch_with_extra();
    batch.push(extra);

    let err = reconciler(&gw, resync()).reconcile(&batch).await.unwrap_err();

    assert!(matches!(
        err.source,
        ReconcileError::DuplicateTimestamps { count: 1 }
    ));
    assert_eq!(err.state, ReconcileState::Aborted);
    assert!(!gw.calls().await.contains(&GatewayCall::Begin));
}

#[tokio::test]
async fn test_resync_delete_failure_rolls_back() {
    let gw = Arc::new(seeded_gateway());
    let (batch, _) = batch_with_extra();
    reconciler(&gw, merge()).reconcile(&batch).await.unwrap();
    let before = gw.observations("VGT2", "e").await;

    gw.fail_deletes().await;
    let err = reconciler(&gw, resync())
        .reconcile(&vgt2_e_batch())
        .await
        .unwrap_err();

    assert_eq!(err.state, ReconcileState::RolledBack);
    assert!(matches!(err.source, ReconcileError::Transport(_)));
    assert!(err.is_retryable());
    assert_eq!(gw.observations("VGT2", "e").await, before);

    let calls = gw.calls().await;
    assert!(!calls.iter().any(|c| matches!(c, GatewayCall::Insert { .. })));
    assert_eq!(calls.last(), Some(&GatewayCall::Rollback));
}

// ============================================================================
// Validation and key resolution
// ============================================================================

#[tokio::test]
async fn test_unknown_site_fails_before_any_write() {
    let gw = Arc::new(siteless_gateway());

    for options in [merge(), resync()] {
        let err = reconciler(&gw, options)
            .reconcile(&vgt2_e_batch())
            .await
            .unwrap_err();
        match &err.source {
            ReconcileError::Referential { field, value } => {
                assert_eq!(*field, "siteID");
                assert_eq!(value, "VGT2");
            }
            other => panic!("expected referential error, got {:?}", other),
        }
    }

    assert!(gw.calls().await.is_empty());
}

#[tokio::test]
async fn test_validation_order_reports_type_method_first() {
    let gw = Arc::new(siteless_gateway());
    // bad type-method pair and bad sample and no site
    let source = vgt2_source_with("e", "gamit", "A1");
    let batch = ObservationBatch::new(source, vgt2_e_batch().observations().to_vec());

    let err = reconciler(&gw, merge()).reconcile(&batch).await.unwrap_err();
    match err.source {
        ReconcileError::Referential { field, value } => {
            assert_eq!(field, "typeID.methodID");
            assert_eq!(value, "e.gamit");
        }
        other => panic!("expected referential error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_sample_is_referential() {
    let gw = Arc::new(seeded_gateway());
    let source = vgt2_source_with("e", "bernese5", "A1");
    let batch = ObservationBatch::new(source, vgt2_e_batch().observations().to_vec());

    let err = reconciler(&gw, resync()).reconcile(&batch).await.unwrap_err();
    assert!(matches!(
        err.source,
        ReconcileError::Referential {
            field: "sampleID.systemID",
            ..
        }
    ));
}

#[tokio::test]
async fn test_offline_resync_still_resolves_keys_before_mutating() {
    let gw = Arc::new(siteless_gateway());

    let err = reconciler(&gw, offline_resync())
        .reconcile(&vgt2_e_batch())
        .await
        .unwrap_err();

    assert_eq!(err.state, ReconcileState::Aborted);
    assert!(matches!(err.source, ReconcileError::Referential { .. }));
    let calls = gw.calls().await;
    assert!(!calls.iter().any(is_mutation), "{:?}", calls);
    assert!(!calls.contains(&GatewayCall::Begin));
}

#[tokio::test]
async fn test_offline_resync_unknown_method_opens_no_transaction() {
    let gw = Arc::new(seeded_gateway());
    let batch = ObservationBatch::new(
        vgt2_source_with("e", "trimble", ""),
        vgt2_e_batch().observations().to_vec(),
    );

    let err = reconciler(&gw, offline_resync())
        .reconcile(&batch)
        .await
        .unwrap_err();

    assert_eq!(err.state, ReconcileState::Aborted);
    match &err.source {
        ReconcileError::Referential { field, value } => {
            assert_eq!(*field, "methodID");
            assert_eq!(value, "trimble");
        }
        other => panic!("expected referential error, got {:?}", other),
    }
    let calls = gw.calls().await;
    assert!(!calls.contains(&GatewayCall::Begin));
    assert!(!calls.iter().any(is_mutation), "{:?}", calls);
}

#[tokio::test]
async fn test_offline_resync_type_not_valid_for_method_opens_no_transaction() {
    let gw = Arc::new(seeded_gateway());
    // gamit is registered but has no valid types
    let batch = ObservationBatch::new(
        vgt2_source_with("e", "gamit", ""),
        vgt2_e_batch().observations().to_vec(),
    );

    let err = reconciler(&gw, offline_resync())
        .reconcile(&batch)
        .await
        .unwrap_err();

    assert_eq!(err.state, ReconcileState::Aborted);
    assert!(matches!(
        err.source,
        ReconcileError::Referential {
            field: "typeID.methodID",
            ..
        }
    ));
    let calls = gw.calls().await;
    assert!(!calls.contains(&GatewayCall::Begin));
    assert!(!calls.iter().any(is_mutation), "{:?}", calls);
}

#[tokio::test]
async fn test_resolve_keys_reports_site_first() {
    let gw = Arc::new(siteless_gateway());
    // no site, unknown sample, type not valid for method
    let source = vgt2_source_with("e", "gamit", "A1");

    let err = reconciler(&gw, resync())
        .resolve_keys(&source)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Referential { field: "siteID", .. }));

    let gw = Arc::new(seeded_gateway());
    let err = reconciler(&gw, resync())
        .resolve_keys(&source)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Referential {
            field: "sampleID.systemID",
            ..
        }
    ));
}

#[tokio::test]
async fn test_resolve_keys_matches_gateway() {
    let gw = Arc::new(seeded_gateway());
    let keys = reconciler(&gw, resync())
        .resolve_keys(&vgt2_e_source())
        .await
        .unwrap();

    assert_eq!(keys.site_pk, gw.resolve_site_pk("VGT2").await.unwrap());
    assert_eq!(keys.method_pk, gw.resolve_method_pk("bernese5").await.unwrap());
}

// ============================================================================
// Dry run
// ============================================================================

#[tokio::test]
async fn test_dry_run_never_mutates() {
    let gw = Arc::new(seeded_gateway());

    for resync_mode in [false, true] {
        let options = ReconcileOptions {
            resync: resync_mode,
            dry_run: true,
            ..Default::default()
        };
        let outcome = reconciler(&gw, options)
            .reconcile(&vgt2_e_batch())
            .await
            .unwrap();
        assert!(outcome.dry_run);
        assert_eq!(outcome.records_written, 0);
    }

    assert!(gw.calls().await.is_empty());
    assert_eq!(gw.count_observations("VGT2", "e").await, 0);
}

#[tokio::test]
async fn test_dry_run_still_validates() {
    let gw = Arc::new(siteless_gateway());
    let options = ReconcileOptions {
        dry_run: true,
        ..Default::default()
    };

    let err = reconciler(&gw, options)
        .reconcile(&vgt2_e_batch())
        .await
        .unwrap_err();
    assert!(matches!(err.source, ReconcileError::Referential { .. }));
}
