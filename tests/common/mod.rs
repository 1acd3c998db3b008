#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use trust_ledger::database::Database;
use trust_ledger::ledger::{
    AuditAggregator, LedgerRecord, LedgerStore, LedgerWriter, RecordPayload, WriterConfig,
};

/// Writer config with short backoffs so contention tests stay fast
pub fn test_writer_config(max_retries: u32) -> WriterConfig {
    WriterConfig {
        max_retries,
        backoff_base_ms: 1,
        backoff_max_ms: 8,
        append_timeout_ms: 10_000,
    }
}

/// In-memory SQLite database with the schema applied
pub async fn setup_test_db() -> Database {
    Database::new_in_memory()
        .await
        .expect("Failed to create test database")
}

/// File-backed SQLite database, so several pooled connections share it
pub async fn setup_file_db(dir: &tempfile::TempDir) -> Database {
    let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
    let db = Database::new(&url).await.expect("Failed to open test database");
    db.run_migrations()
        .await
        .expect("Failed to migrate test database");
    db
}

pub fn ledger_for(db: &Database, max_retries: u32) -> (LedgerWriter, AuditAggregator) {
    let store: Arc<dyn LedgerStore> = Arc::new(db.clone());
    (
        LedgerWriter::new(store.clone(), test_writer_config(max_retries)),
        AuditAggregator::new(store, "USD"),
    )
}

/// Append through the payload's own chain
pub async fn record(writer: &LedgerWriter, actor: &str, payload: RecordPayload) -> LedgerRecord {
    writer
        .append(&payload.chain_key(), actor, &payload)
        .await
        .expect("append failed")
        .record
}

pub fn member_join(trust_id: &str, user_id: &str, name: &str) -> RecordPayload {
    let mut verification_data = BTreeMap::new();
    verification_data.insert("id_document".to_string(), "passport".to_string());
    RecordPayload::member_join(trust_id, user_id, name, verification_data)
}
