//! Record Store
//!
//! The persistence seam consumed by the writer and the aggregator. Any
//! implementation must make [`LedgerStore::insert_linked`] a compare-and-set
//! on the chain tip: at most one record per chain may name a given
//! `previous_hash`.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::ledger::record::{ChainKey, ChainTip, LedgerRecord, NewRecord};

/// Derives the record to insert from the chain tip current at insert time
pub type BuildRecord<'a> =
    dyn Fn(Option<&ChainTip>) -> Result<NewRecord, StoreError> + Send + Sync + 'a;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Most recently appended record of a chain, if any
    async fn chain_tip(&self, chain_key: &ChainKey) -> Result<Option<ChainTip>, StoreError>;

    /// Persist `record` unless its chain already has a record linked to the
    /// same `previous_hash`, in which case [`StoreError::Conflict`] is
    /// returned and nothing is written.
    async fn insert_linked(&self, record: NewRecord) -> Result<LedgerRecord, StoreError>;

    /// Read the tip of `chain_key`, build the record linked to it and insert
    /// it. Stores that can hold the chain's write lock across both steps
    /// override this so concurrent writers queue instead of conflicting. The
    /// default reads optimistically and relies on
    /// [`LedgerStore::insert_linked`] to reject a stale tip.
    async fn append_at_tip(
        &self,
        chain_key: &ChainKey,
        build: &BuildRecord<'_>,
    ) -> Result<LedgerRecord, StoreError> {
        let tip = self.chain_tip(chain_key).await?;
        let record = build(tip.as_ref())?;
        self.insert_linked(record).await
    }

    /// Every record of a Trust, in insertion order
    async fn records_for_trust(&self, trust_id: &str) -> Result<Vec<LedgerRecord>, StoreError>;

    /// Records a member caused within a Trust, in insertion order
    async fn records_for_actor(
        &self,
        trust_id: &str,
        actor_id: &str,
    ) -> Result<Vec<LedgerRecord>, StoreError>;

    async fn record_by_id(&self, id: Uuid) -> Result<Option<LedgerRecord>, StoreError>;

    /// The record inserted immediately before `record` in the same chain
    async fn predecessor_of(&self, record: &LedgerRecord) -> Result<Option<LedgerRecord>, StoreError>;
}

/// In-process store. Tip check and insert happen under one write guard.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<Vec<LedgerRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Overwrite a stored payload in place, for exercising tamper detection
    #[cfg(test)]
    pub(crate) async fn tamper_payload(&self, id: Uuid, payload: serde_json::Value) -> bool {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.payload = payload;
                true
            }
            None => false,
        }
    }
}

fn tip_of(records: &[LedgerRecord], chain_key: &ChainKey) -> Option<ChainTip> {
    records
        .iter()
        .rev()
        .find(|r| &r.chain_key == chain_key)
        .map(|r| ChainTip {
            record_hash: r.record_hash.clone(),
            created_at: r.created_at,
        })
}

fn push_linked(records: &mut Vec<LedgerRecord>, record: NewRecord) -> Result<LedgerRecord, StoreError> {
    let forked = records
        .iter()
        .any(|r| r.chain_key == record.chain_key && r.previous_hash == record.previous_hash);
    if forked {
        return Err(StoreError::Conflict(record.chain_key));
    }
    let sequence = records.len() as i64 + 1;
    let stored = record.into_record(sequence);
    records.push(stored.clone());
    Ok(stored)
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn chain_tip(&self, chain_key: &ChainKey) -> Result<Option<ChainTip>, StoreError> {
        let records = self.records.read().await;
        Ok(tip_of(&records, chain_key))
    }

    async fn insert_linked(&self, record: NewRecord) -> Result<LedgerRecord, StoreError> {
        let mut records = self.records.write().await;
        push_linked(&mut records, record)
    }

    async fn append_at_tip(
        &self,
        chain_key: &ChainKey,
        build: &BuildRecord<'_>,
    ) -> Result<LedgerRecord, StoreError> {
        let mut records = self.records.write().await;
        let tip = tip_of(&records, chain_key);
        let record = build(tip.as_ref())?;
        push_linked(&mut records, record)
    }

    async fn records_for_trust(&self, trust_id: &str) -> Result<Vec<LedgerRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.chain_key.trust_id == trust_id)
            .cloned()
            .collect())
    }

    async fn records_for_actor(
        &self,
        trust_id: &str,
        actor_id: &str,
    ) -> Result<Vec<LedgerRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.chain_key.trust_id == trust_id && r.actor_id == actor_id)
            .cloned()
            .collect())
    }

    async fn record_by_id(&self, id: Uuid) -> Result<Option<LedgerRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn predecessor_of(&self, record: &LedgerRecord) -> Result<Option<LedgerRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .find(|r| r.chain_key == record.chain_key && r.sequence < record.sequence)
            .cloned())
    }
}
