use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::ledger::record::{ChainKey, LedgerRecord};

/// Row of the `ledger_records` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecordRow {
    pub sequence: i64,
    pub id: String,
    pub record_type: String,
    pub trust_id: String,
    pub actor_id: String,
    pub payload: String,
    pub record_hash: String,
    pub previous_hash: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for LedgerRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| StoreError::Corrupt(format!("record {} has invalid id: {}", row.sequence, e)))?;
        let record_type = row
            .record_type
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("record {}: {}", id, e)))?;
        // A payload that is not even JSON is kept as a string so that the
        // verifier can still flag it instead of the whole read failing.
        let payload = serde_json::from_str(&row.payload)
            .unwrap_or(serde_json::Value::String(row.payload));

        Ok(LedgerRecord {
            id,
            sequence: row.sequence,
            chain_key: ChainKey::new(record_type, row.trust_id),
            actor_id: row.actor_id,
            payload,
            record_hash: row.record_hash,
            previous_hash: row.previous_hash,
            created_at: row.created_at,
        })
    }
}

pub fn into_records(rows: Vec<RecordRow>) -> Result<Vec<LedgerRecord>, StoreError> {
    rows.into_iter().map(LedgerRecord::try_from).collect()
}
