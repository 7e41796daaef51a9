mod common;

use common::{fixture, process};
use std::time::Duration;
use transfer_process_store::domain::ports::{LeaseManagerBox, TransferProcessStoreBox};
use transfer_process_store::domain::process::TransferProcessState;

#[tokio::test]
async fn test_ports_as_trait_objects() {
    let f = fixture().await;
    let store: TransferProcessStoreBox = Box::new(f.store.clone());
    let leases: LeaseManagerBox = Box::new(f.leases.clone());

    let record = process("tp-1", &f.clock);

    // Verify Send + Sync by spawning tasks
    let store_handle = tokio::spawn(async move {
        store.create(record).await.unwrap();
        store.find_by_id("tp-1").await.unwrap().unwrap()
    });
    let created = store_handle.await.unwrap();
    assert_eq!(created.state, TransferProcessState::Initial);

    let lease_handle = tokio::spawn(async move {
        let token = leases
            .acquire("tp-1", "node-a", Duration::from_secs(30))
            .await
            .unwrap();
        let current = leases.current("tp-1").await.unwrap().unwrap();
        leases.release(&token).await.unwrap();
        current
    });
    let lease = lease_handle.await.unwrap();
    assert_eq!(lease.leased_by, "node-a");
}
