#![allow(dead_code)]

use std::sync::Arc;
use tempfile::{TempDir, tempdir};
use transfer_process_store::domain::process::{ProcessType, TransferProcess};
use transfer_process_store::infrastructure::clock::ManualClock;
use transfer_process_store::infrastructure::sql::connect;
use transfer_process_store::infrastructure::sql::dialect::dialect_for_url;
use transfer_process_store::infrastructure::sql::lease::SqlLeaseManager;
use transfer_process_store::infrastructure::sql::schema::create_schema;
use transfer_process_store::infrastructure::sql::store::SqlTransferProcessStore;

pub const START_MS: i64 = 1_700_000_000_000;

/// A SQLite-backed store in a temporary directory, driven by a manual clock.
pub struct Fixture {
    pub store: SqlTransferProcessStore,
    pub leases: SqlLeaseManager,
    pub clock: ManualClock,
    pub url: String,
    _dir: TempDir,
}

/// Connections in every fixture pool, so concurrent tasks really do run
/// overlapping transactions.
pub const POOL_SIZE: u32 = 5;

pub async fn fixture() -> Fixture {
    fixture_with(3, POOL_SIZE).await
}

pub async fn fixture_with_page_size(page_size: usize) -> Fixture {
    fixture_with(page_size, POOL_SIZE).await
}

pub async fn fixture_with(page_size: usize, max_connections: u32) -> Fixture {
    let dir = tempdir().unwrap();
    let url = sqlite_url(&dir);

    let pool = connect(&url, max_connections).await.unwrap();
    let dialect = dialect_for_url(&url).unwrap();
    create_schema(&pool, dialect.as_ref()).await.unwrap();

    let clock = ManualClock::new(START_MS);
    let store =
        SqlTransferProcessStore::new(pool, dialect, Arc::new(clock.clone())).with_page_size(page_size);
    let leases = store.lease_manager();

    Fixture {
        store,
        leases,
        clock,
        url,
        _dir: dir,
    }
}

pub fn sqlite_url(dir: &TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("store.db").display())
}

pub fn process(id: &str, clock: &ManualClock) -> TransferProcess {
    use transfer_process_store::domain::ports::Clock;
    TransferProcess::new(id, ProcessType::Consumer, clock.now_ms())
}
