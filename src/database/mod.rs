pub mod models;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::ledger::record::{ChainKey, ChainTip, LedgerRecord, NewRecord};
use crate::ledger::store::{BuildRecord, LedgerStore};
use models::{into_records, RecordRow};

const RECORD_COLUMNS: &str = "sequence, id, record_type, trust_id, actor_id, payload, \
                              record_hash, previous_hash, created_at";

/// SQLite-backed ledger store. The `UNIQUE (record_type, trust_id,
/// previous_hash)` constraint is the conditional write that keeps chains
/// linear.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        info!("Connected to {}", database_url);
        Ok(Database { pool })
    }

    /// Private in-memory database on a single long-lived connection
    pub async fn new_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let db = Database { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(schema::LEDGER_RECORDS_SCHEMA)
            .execute(&self.pool)
            .await?;
        debug!("Ledger schema applied");
        Ok(())
    }

    pub async fn record_count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM ledger_records")
            .fetch_one(&self.pool)
            .await
    }

    async fn fetch_records(
        &self,
        filter: &str,
        binds: &[&str],
    ) -> Result<Vec<LedgerRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM ledger_records WHERE {} ORDER BY sequence ASC",
            RECORD_COLUMNS, filter
        );
        let mut query = sqlx::query_as::<_, RecordRow>(&sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        let rows = query.fetch_all(&self.pool).await?;
        into_records(rows)
    }
}

async fn fetch_tip(
    conn: &mut SqliteConnection,
    chain_key: &ChainKey,
) -> Result<Option<ChainTip>, StoreError> {
    let row: Option<(String, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT record_hash, created_at
        FROM ledger_records
        WHERE record_type = ? AND trust_id = ?
        ORDER BY sequence DESC
        LIMIT 1
        "#,
    )
    .bind(chain_key.record_type.as_str())
    .bind(&chain_key.trust_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|(record_hash, created_at)| ChainTip {
        record_hash,
        created_at,
    }))
}

async fn insert_row(conn: &mut SqliteConnection, record: NewRecord) -> Result<LedgerRecord, StoreError> {
    let payload = serde_json::to_string(&record.payload)
        .map_err(|e| StoreError::Corrupt(format!("unserializable payload: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO ledger_records
        (id, record_type, trust_id, actor_id, payload, record_hash, previous_hash, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_string())
    .bind(record.chain_key.record_type.as_str())
    .bind(&record.chain_key.trust_id)
    .bind(&record.actor_id)
    .bind(payload)
    .bind(&record.record_hash)
    .bind(&record.previous_hash)
    .bind(record.created_at)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(done) => Ok(record.into_record(done.last_insert_rowid())),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Err(StoreError::Conflict(record.chain_key))
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl LedgerStore for Database {
    async fn chain_tip(&self, chain_key: &ChainKey) -> Result<Option<ChainTip>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_tip(&mut conn, chain_key).await
    }

    async fn insert_linked(&self, record: NewRecord) -> Result<LedgerRecord, StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_row(&mut conn, record).await
    }

    /// Tip read and insert share one write transaction, so writers on the
    /// same database queue on SQLite's write lock instead of conflicting.
    /// Writers going through `insert_linked` are still held off by the
    /// UNIQUE constraint.
    async fn append_at_tip(
        &self,
        chain_key: &ChainKey,
        build: &BuildRecord<'_>,
    ) -> Result<LedgerRecord, StoreError> {
        let mut tx = self.pool.begin().await?;
        // A no-op write takes the write lock before the tip is read
        sqlx::query("UPDATE ledger_records SET sequence = sequence WHERE 0")
            .execute(&mut *tx)
            .await?;
        let tip = fetch_tip(&mut tx, chain_key).await?;
        let record = build(tip.as_ref())?;
        let stored = insert_row(&mut tx, record).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn records_for_trust(&self, trust_id: &str) -> Result<Vec<LedgerRecord>, StoreError> {
        self.fetch_records("trust_id = ?", &[trust_id]).await
    }

    async fn records_for_actor(
        &self,
        trust_id: &str,
        actor_id: &str,
    ) -> Result<Vec<LedgerRecord>, StoreError> {
        self.fetch_records("trust_id = ? AND actor_id = ?", &[trust_id, actor_id])
            .await
    }

    async fn record_by_id(&self, id: Uuid) -> Result<Option<LedgerRecord>, StoreError> {
        let id = id.to_string();
        let mut records = self.fetch_records("id = ?", &[id.as_str()]).await?;
        Ok(records.pop())
    }

    async fn predecessor_of(&self, record: &LedgerRecord) -> Result<Option<LedgerRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM ledger_records \
             WHERE record_type = ? AND trust_id = ? AND sequence < ? \
             ORDER BY sequence DESC LIMIT 1",
            RECORD_COLUMNS
        );
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(record.chain_key.record_type.as_str())
            .bind(&record.chain_key.trust_id)
            .bind(record.sequence)
            .fetch_optional(&self.pool)
            .await?;
        row.map(LedgerRecord::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::record::{RecordType, GENESIS_HASH};

    fn new_record(key: &ChainKey, previous_hash: &str, record_hash: &str) -> NewRecord {
        NewRecord {
            id: Uuid::new_v4(),
            chain_key: key.clone(),
            actor_id: "u1".to_string(),
            payload: serde_json::json!({"record_type": key.record_type.as_str()}),
            record_hash: record_hash.to_string(),
            previous_hash: previous_hash.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_unique_constraint_reports_conflict() {
        let db = Database::new_in_memory().await.unwrap();
        let key = ChainKey::new(RecordType::Vote, "t1");

        let first = db.insert_linked(new_record(&key, GENESIS_HASH, "h1")).await.unwrap();
        assert_eq!(first.sequence, 1);

        let err = db
            .insert_linked(new_record(&key, GENESIS_HASH, "h2"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(db.record_count().await.unwrap(), 1);

        // Same predecessor in another trust's chain is fine
        let other = ChainKey::new(RecordType::Vote, "t2");
        db.insert_linked(new_record(&other, GENESIS_HASH, "h3")).await.unwrap();
    }

    #[tokio::test]
    async fn test_tip_and_round_trip() {
        let db = Database::new_in_memory().await.unwrap();
        let key = ChainKey::new(RecordType::Contribution, "t1");

        assert!(db.chain_tip(&key).await.unwrap().is_none());
        let a = db.insert_linked(new_record(&key, GENESIS_HASH, "h1")).await.unwrap();
        let b = db.insert_linked(new_record(&key, "h1", "h2")).await.unwrap();

        assert_eq!(db.chain_tip(&key).await.unwrap().unwrap().record_hash, "h2");

        let loaded = db.record_by_id(b.id).await.unwrap().unwrap();
        assert_eq!(loaded.payload, b.payload);
        assert_eq!(loaded.chain_key, key);
        assert_eq!(loaded.created_at, b.created_at);

        let pred = db.predecessor_of(&loaded).await.unwrap().unwrap();
        assert_eq!(pred.id, a.id);
    }

    #[tokio::test]
    async fn test_append_at_tip_reads_tip_inside_transaction() {
        let db = Database::new_in_memory().await.unwrap();
        let key = ChainKey::new(RecordType::LoanApproval, "t1");
        db.insert_linked(new_record(&key, GENESIS_HASH, "h1")).await.unwrap();

        let build = |tip: Option<&ChainTip>| -> Result<NewRecord, StoreError> {
            let previous = tip.map(|t| t.record_hash.as_str()).unwrap_or(GENESIS_HASH);
            Ok(new_record(&key, previous, "h2"))
        };
        let stored = db.append_at_tip(&key, &build).await.unwrap();
        assert_eq!(stored.previous_hash, "h1");
        assert_eq!(db.chain_tip(&key).await.unwrap().unwrap().record_hash, "h2");

        // A build failure rolls back and leaves the chain untouched
        let failing = |_: Option<&ChainTip>| -> Result<NewRecord, StoreError> {
            Err(StoreError::Rejected("bad payload".to_string()))
        };
        let err = db.append_at_tip(&key, &failing).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert_eq!(db.record_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_records_are_append_only() {
        let db = Database::new_in_memory().await.unwrap();
        let key = ChainKey::new(RecordType::Vote, "t1");
        db.insert_linked(new_record(&key, GENESIS_HASH, "h1")).await.unwrap();

        let update = sqlx::query("UPDATE ledger_records SET payload = '{}'")
            .execute(db.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM ledger_records").execute(db.pool()).await;
        assert!(delete.is_err());
        assert_eq!(db.record_count().await.unwrap(), 1);
    }
}
