mod common;

use common::{fixture, process};
use serde_json::json;
use std::time::Duration;
use transfer_process_store::domain::ports::{LeaseManager, TransferProcessStore};
use transfer_process_store::domain::process::{ProcessType, TransferProcessState};
use transfer_process_store::error::StoreError;

const LEASE: Duration = Duration::from_secs(30);

#[tokio::test]
async fn test_create_then_find_returns_equal_record() {
    let f = fixture().await;

    let mut record = process("tp-1", &f.clock)
        .with_correlation_id("provider-tp-9")
        .with_payload(json!({ "assetId": "asset-1", "destination": { "type": "HttpData" } }));
    record
        .trace_context
        .insert("traceparent".to_string(), "00-abc-def-01".to_string());
    record.error_detail = Some("none yet".to_string());

    f.store.create(record.clone()).await.unwrap();

    let found = f.store.find_by_id("tp-1").await.unwrap().unwrap();
    assert_eq!(found, record);
    assert!(f.store.find_by_id("tp-2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_rejects_duplicate_id() {
    let f = fixture().await;

    f.store.create(process("tp-1", &f.clock)).await.unwrap();
    let result = f.store.create(process("tp-1", &f.clock)).await;

    assert!(matches!(result, Err(StoreError::DuplicateId { ref id }) if id == "tp-1"));
}

#[tokio::test]
async fn test_find_by_correlation_id() {
    let f = fixture().await;

    f.store
        .create(process("tp-1", &f.clock).with_correlation_id("corr-1"))
        .await
        .unwrap();
    f.store.create(process("tp-2", &f.clock)).await.unwrap();

    let found = f.store.find_by_correlation_id("corr-1").await.unwrap().unwrap();
    assert_eq!(found.id, "tp-1");
    assert!(f.store.find_by_correlation_id("corr-2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_under_lease_bumps_counters() {
    let f = fixture().await;
    f.store.create(process("tp-1", &f.clock)).await.unwrap();

    let lease = f.leases.acquire("tp-1", "node-a", LEASE).await.unwrap();
    f.clock.advance(Duration::from_millis(5));

    let mut record = f.store.find_by_id("tp-1").await.unwrap().unwrap();
    record.transition_to(TransferProcessState::Requesting, common::START_MS + 5);
    record.payload = json!({ "attempt": 1 });

    let updated = f.store.update(record, &lease).await.unwrap();
    assert_eq!(updated.state, TransferProcessState::Requesting);
    assert_eq!(updated.state_count, 2);
    assert_eq!(updated.version, 2);
    assert_eq!(updated.updated_at, common::START_MS + 5);

    let persisted = f.store.find_by_id("tp-1").await.unwrap().unwrap();
    assert_eq!(persisted, updated);
}

#[tokio::test]
async fn test_update_without_lease_is_refused() {
    let f = fixture().await;
    f.store.create(process("tp-1", &f.clock)).await.unwrap();

    let theirs = f.leases.acquire("tp-1", "node-b", LEASE).await.unwrap();
    let mut mine = theirs.clone();
    mine.holder = "node-a".to_string();
    mine.lease_id = "made-up".to_string();

    let mut record = f.store.find_by_id("tp-1").await.unwrap().unwrap();
    record.transition_to(TransferProcessState::Requesting, common::START_MS);

    let result = f.store.update(record, &mine).await;
    assert!(matches!(result, Err(StoreError::LeaseNotOwned { .. })));
}

#[tokio::test]
async fn test_update_with_lease_for_other_entity_is_refused() {
    let f = fixture().await;
    f.store.create(process("tp-1", &f.clock)).await.unwrap();
    let lease = f.leases.acquire("tp-2", "node-a", LEASE).await.unwrap();

    let mut record = f.store.find_by_id("tp-1").await.unwrap().unwrap();
    record.transition_to(TransferProcessState::Requesting, common::START_MS);

    let result = f.store.update(record, &lease).await;
    assert!(matches!(result, Err(StoreError::LeaseNotOwned { .. })));
}

#[tokio::test]
async fn test_update_after_lease_expiry_fails() {
    let f = fixture().await;
    f.store.create(process("tp-1", &f.clock)).await.unwrap();

    let lease = f.leases.acquire("tp-1", "node-a", LEASE).await.unwrap();
    let mut record = f.store.find_by_id("tp-1").await.unwrap().unwrap();
    f.clock.advance(Duration::from_secs(31));
    record.transition_to(TransferProcessState::Requesting, common::START_MS + 31_000);

    let result = f.store.update(record, &lease).await;
    assert!(matches!(result, Err(StoreError::LeaseExpired { .. })));

    let persisted = f.store.find_by_id("tp-1").await.unwrap().unwrap();
    assert_eq!(persisted.state, TransferProcessState::Initial);
    assert_eq!(persisted.state_count, 1);
}

#[tokio::test]
async fn test_update_after_takeover_still_reports_expiry() {
    let f = fixture().await;
    f.store.create(process("tp-1", &f.clock)).await.unwrap();

    let lease = f.leases.acquire("tp-1", "node-a", LEASE).await.unwrap();
    f.clock.advance(Duration::from_secs(31));
    f.leases.acquire("tp-1", "node-b", LEASE).await.unwrap();

    let mut record = f.store.find_by_id("tp-1").await.unwrap().unwrap();
    record.transition_to(TransferProcessState::Requesting, common::START_MS + 31_000);

    let result = f.store.update(record, &lease).await;
    assert!(matches!(result, Err(StoreError::LeaseExpired { .. })));
}

#[tokio::test]
async fn test_stale_state_count_is_rejected_and_row_unchanged() {
    let f = fixture().await;
    f.store.create(process("tp-1", &f.clock)).await.unwrap();
    let lease = f.leases.acquire("tp-1", "node-a", LEASE).await.unwrap();

    let snapshot = f.store.find_by_id("tp-1").await.unwrap().unwrap();

    let mut first = snapshot.clone();
    first.transition_to(TransferProcessState::Requesting, common::START_MS + 1);
    let after_first = f.store.update(first, &lease).await.unwrap();

    let mut second = snapshot;
    second.transition_to(TransferProcessState::Provisioning, common::START_MS + 2);
    let result = f.store.update(second, &lease).await;
    assert!(matches!(
        result,
        Err(StoreError::StaleWrite {
            expected: 1,
            actual: 2,
            ..
        })
    ));

    let persisted = f.store.find_by_id("tp-1").await.unwrap().unwrap();
    assert_eq!(persisted, after_first);
}

#[tokio::test]
async fn test_illegal_transition_leaves_state_count_alone() {
    let f = fixture().await;
    f.store.create(process("tp-1", &f.clock)).await.unwrap();
    let lease = f.leases.acquire("tp-1", "node-a", LEASE).await.unwrap();

    let mut record = f.store.find_by_id("tp-1").await.unwrap().unwrap();
    record.transition_to(TransferProcessState::Completed, common::START_MS + 1);

    let result = f.store.update(record, &lease).await;
    assert!(matches!(
        result,
        Err(StoreError::IllegalTransition {
            from: TransferProcessState::Initial,
            to: TransferProcessState::Completed,
        })
    ));

    let persisted = f.store.find_by_id("tp-1").await.unwrap().unwrap();
    assert_eq!(persisted.state, TransferProcessState::Initial);
    assert_eq!(persisted.state_count, 1);
    assert_eq!(persisted.version, 1);
}

#[tokio::test]
async fn test_same_state_rewrite_needs_retriable_state() {
    let f = fixture().await;
    f.store.create(process("tp-1", &f.clock)).await.unwrap();
    let lease = f.leases.acquire("tp-1", "node-a", LEASE).await.unwrap();

    let mut record = f.store.find_by_id("tp-1").await.unwrap().unwrap();
    record.payload = json!({ "touched": true });
    let result = f.store.update(record, &lease).await;
    assert!(matches!(result, Err(StoreError::IllegalTransition { .. })));

    let mut record = f.store.find_by_id("tp-1").await.unwrap().unwrap();
    record.transition_to(TransferProcessState::Requesting, common::START_MS);
    let record = f.store.update(record, &lease).await.unwrap();

    let mut retry = record;
    retry.error_detail = Some("counter-party unreachable".to_string());
    let retried = f.store.update(retry, &lease).await.unwrap();
    assert_eq!(retried.state, TransferProcessState::Requesting);
    assert_eq!(retried.state_count, 3);
}

#[tokio::test]
async fn test_backwards_state_timestamp_is_clock_skew() {
    let f = fixture().await;
    f.store.create(process("tp-1", &f.clock)).await.unwrap();
    let lease = f.leases.acquire("tp-1", "node-a", LEASE).await.unwrap();

    let mut record = f.store.find_by_id("tp-1").await.unwrap().unwrap();
    record.transition_to(TransferProcessState::Requesting, common::START_MS - 1);

    let result = f.store.update(record, &lease).await;
    assert!(matches!(result, Err(StoreError::ClockSkew { .. })));
    let persisted = f.store.find_by_id("tp-1").await.unwrap().unwrap();
    assert_eq!(persisted.state_count, 1);
}

#[tokio::test]
async fn test_update_of_missing_record_is_not_found() {
    let f = fixture().await;
    let lease = f.leases.acquire("ghost", "node-a", LEASE).await.unwrap();

    let mut record = process("ghost", &f.clock);
    record.transition_to(TransferProcessState::Requesting, common::START_MS);

    let result = f.store.update(record, &lease).await;
    assert!(matches!(result, Err(StoreError::NotFound { ref id }) if id == "ghost"));
}

#[tokio::test]
async fn test_update_keeps_immutable_fields() {
    let f = fixture().await;
    f.store.create(process("tp-1", &f.clock)).await.unwrap();
    let lease = f.leases.acquire("tp-1", "node-a", LEASE).await.unwrap();

    let mut record = f.store.find_by_id("tp-1").await.unwrap().unwrap();
    record.transition_to(TransferProcessState::Requesting, common::START_MS);
    record.process_type = ProcessType::Provider;
    record.created_at = 0;

    let updated = f.store.update(record, &lease).await.unwrap();
    assert_eq!(updated.process_type, ProcessType::Consumer);
    assert_eq!(updated.created_at, common::START_MS);
}

#[tokio::test]
async fn test_delete_refused_while_other_holder_leases() {
    let f = fixture().await;
    f.store.create(process("tp-1", &f.clock)).await.unwrap();
    f.leases.acquire("tp-1", "node-b", LEASE).await.unwrap();

    let result = f.store.delete("tp-1", "node-a").await;
    assert!(matches!(
        result,
        Err(StoreError::LeaseHeld { ref holder, .. }) if holder == "node-b"
    ));
    assert!(f.store.find_by_id("tp-1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_by_lease_holder_drops_record_and_lease() {
    let f = fixture().await;
    f.store.create(process("tp-1", &f.clock)).await.unwrap();
    f.leases.acquire("tp-1", "node-a", LEASE).await.unwrap();

    f.store.delete("tp-1", "node-a").await.unwrap();

    assert!(f.store.find_by_id("tp-1").await.unwrap().is_none());
    assert!(f.leases.current("tp-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_ignores_expired_leases() {
    let f = fixture().await;
    f.store.create(process("tp-1", &f.clock)).await.unwrap();
    f.leases.acquire("tp-1", "node-b", LEASE).await.unwrap();
    f.clock.advance(Duration::from_secs(31));

    f.store.delete("tp-1", "node-a").await.unwrap();
    assert!(f.store.find_by_id("tp-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_missing_record_is_not_found() {
    let f = fixture().await;

    let result = f.store.delete("tp-404", "node-a").await;
    assert!(matches!(result, Err(StoreError::NotFound { .. })));
}
