//! Ledger Writer
//!
//! Appends records to a chain. The store links each record to the tip that
//! is current at insert time and rejects a record whose tip went stale; a
//! lost race re-reads the tip and retries with backoff, up to a fixed number
//! of times.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, StoreError};
use crate::ledger::hasher;
use crate::ledger::payload::RecordPayload;
use crate::ledger::record::{ChainKey, ChainTip, LedgerRecord, NewRecord, GENESIS_HASH};
use crate::ledger::store::LedgerStore;

/// Retry and timeout policy for appends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub append_timeout_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base_ms: 10,
            backoff_max_ms: 200,
            append_timeout_ms: 5_000,
        }
    }
}

impl WriterConfig {
    /// Delay before retry number `retry` (1-based): exponential, capped, plus
    /// up to one base interval of jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = self
            .backoff_base_ms
            .saturating_mul(1u64 << retry.saturating_sub(1).min(16));
        let capped = exp.min(self.backoff_max_ms);
        let jitter = if self.backoff_base_ms > 0 {
            rand::thread_rng().gen_range(0..=self.backoff_base_ms)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }
}

/// Result of a successful append
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendReceipt {
    pub record: LedgerRecord,
    /// Conditional writes attempted, including the successful one
    pub attempts: u32,
}

#[derive(Clone)]
pub struct LedgerWriter {
    store: Arc<dyn LedgerStore>,
    config: WriterConfig,
}

impl LedgerWriter {
    pub fn new(store: Arc<dyn LedgerStore>, config: WriterConfig) -> Self {
        Self { store, config }
    }

    /// Append a domain event to `chain_key`.
    ///
    /// Invalid input is rejected before anything is hashed. On success the
    /// record is linked to the chain tip that was current at insert time.
    /// Exhausting the retries yields [`LedgerError::LedgerContention`] and
    /// nothing is written. Exceeding the configured duration yields
    /// [`LedgerError::AppendTimeout`]; an insert already handed to the store
    /// when the deadline fires may still have landed, so callers should check
    /// the chain before re-submitting.
    pub async fn append(
        &self,
        chain_key: &ChainKey,
        actor_id: &str,
        payload: &RecordPayload,
    ) -> Result<AppendReceipt, LedgerError> {
        if actor_id.trim().is_empty() {
            return Err(LedgerError::validation("Missing required field: actor_id"));
        }
        payload.validate_for(chain_key)?;

        let body = payload.to_value()?;
        // Fail on unhashable payloads before touching the store
        hasher::canonical_bytes(&body, GENESIS_HASH)?;

        let started = Instant::now();
        let limit = Duration::from_millis(self.config.append_timeout_ms);
        match tokio::time::timeout(limit, self.append_with_retry(chain_key, actor_id, &body)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Append to {} timed out after {:?}", chain_key, started.elapsed());
                Err(LedgerError::AppendTimeout {
                    chain_key: chain_key.clone(),
                    elapsed_ms: started.elapsed().as_millis(),
                })
            }
        }
    }

    async fn append_with_retry(
        &self,
        chain_key: &ChainKey,
        actor_id: &str,
        body: &serde_json::Value,
    ) -> Result<AppendReceipt, LedgerError> {
        let build = |tip: Option<&ChainTip>| -> Result<NewRecord, StoreError> {
            let previous_hash = tip
                .map(|t| t.record_hash.clone())
                .unwrap_or_else(|| GENESIS_HASH.to_string());
            let record_hash = hasher::record_hash(body, &previous_hash)
                .map_err(|e| StoreError::Rejected(e.to_string()))?;

            // Keep created_at non-decreasing within the chain even if the
            // wall clock stepped back.
            let now = Utc::now();
            let created_at = match tip {
                Some(t) if t.created_at > now => t.created_at,
                _ => now,
            };

            Ok(NewRecord {
                id: Uuid::new_v4(),
                chain_key: chain_key.clone(),
                actor_id: actor_id.to_string(),
                payload: body.clone(),
                record_hash,
                previous_hash,
                created_at,
            })
        };

        let mut attempts = 0u32;
        loop {
            attempts += 1;

            match self.store.append_at_tip(chain_key, &build).await {
                Ok(stored) => {
                    info!(
                        "Appended {} record {} ({}) after {} attempt(s)",
                        chain_key, stored.id, stored.record_hash, attempts
                    );
                    return Ok(AppendReceipt {
                        record: stored,
                        attempts,
                    });
                }
                Err(StoreError::Conflict(_)) if attempts <= self.config.max_retries => {
                    let delay = self.config.backoff(attempts);
                    debug!(
                        "Lost race on {} (attempt {}), retrying in {:?}",
                        chain_key, attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(StoreError::Conflict(_)) => {
                    warn!("Giving up on {} after {} attempts", chain_key, attempts);
                    return Err(LedgerError::LedgerContention {
                        chain_key: chain_key.clone(),
                        attempts,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::payload::{MinorUnits, VoteValue};
    use crate::ledger::record::RecordType;
    use crate::ledger::store::MemoryStore;
    use crate::ledger::verify::verify_chain;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> WriterConfig {
        WriterConfig {
            max_retries: 5,
            backoff_base_ms: 1,
            backoff_max_ms: 4,
            append_timeout_ms: 2_000,
        }
    }

    /// Store whose conditional insert always loses
    struct AlwaysConflicts {
        inserts: AtomicU32,
    }

    #[async_trait]
    impl LedgerStore for AlwaysConflicts {
        async fn chain_tip(&self, _: &ChainKey) -> Result<Option<ChainTip>, StoreError> {
            Ok(None)
        }

        async fn insert_linked(&self, record: NewRecord) -> Result<LedgerRecord, StoreError> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Conflict(record.chain_key))
        }

        async fn records_for_trust(&self, _: &str) -> Result<Vec<LedgerRecord>, StoreError> {
            Ok(vec![])
        }

        async fn records_for_actor(&self, _: &str, _: &str) -> Result<Vec<LedgerRecord>, StoreError> {
            Ok(vec![])
        }

        async fn record_by_id(&self, _: Uuid) -> Result<Option<LedgerRecord>, StoreError> {
            Ok(None)
        }

        async fn predecessor_of(&self, _: &LedgerRecord) -> Result<Option<LedgerRecord>, StoreError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_append_links_records() {
        let store = MemoryStore::new();
        let writer = LedgerWriter::new(Arc::new(store.clone()), fast_config());
        let key = ChainKey::new(RecordType::Contribution, "t1");

        let mut receipts = Vec::new();
        for amount in [1000, 2000, 3000] {
            let payload = RecordPayload::contribution("t1", "u1", MinorUnits(amount), "USD", None);
            receipts.push(writer.append(&key, "u1", &payload).await.unwrap());
        }

        assert_eq!(receipts[0].record.previous_hash, GENESIS_HASH);
        assert_eq!(receipts[1].record.previous_hash, receipts[0].record.record_hash);
        assert_eq!(receipts[2].record.previous_hash, receipts[1].record.record_hash);
        assert!(receipts.iter().all(|r| r.attempts == 1));

        let records = store.records_for_trust("t1").await.unwrap();
        assert!(verify_chain(&records).iter().all(|v| v.is_valid));
    }

    #[tokio::test]
    async fn test_validation_error_persists_nothing() {
        let store = MemoryStore::new();
        let writer = LedgerWriter::new(Arc::new(store.clone()), fast_config());
        let key = ChainKey::new(RecordType::Vote, "t1");

        let payload = RecordPayload::vote("t1", "m1", "v1", VoteValue::Approve, None);
        let err = writer.append(&key, " ", &payload).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let wrong_chain = ChainKey::new(RecordType::Vote, "t2");
        let err = writer.append(&wrong_chain, "v1", &payload).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_contention_exhausts_retries() {
        let store = Arc::new(AlwaysConflicts {
            inserts: AtomicU32::new(0),
        });
        let writer = LedgerWriter::new(store.clone(), fast_config());
        let key = ChainKey::new(RecordType::Vote, "t1");
        let payload = RecordPayload::vote("t1", "m1", "v1", VoteValue::Reject, None);

        let err = writer.append(&key, "v1", &payload).await.unwrap_err();
        assert!(err.is_retryable());
        match err {
            LedgerError::LedgerContention { attempts, .. } => assert_eq!(attempts, 6),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(store.inserts.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_timeout_is_typed() {
        let store = Arc::new(AlwaysConflicts {
            inserts: AtomicU32::new(0),
        });
        let config = WriterConfig {
            max_retries: 1_000,
            backoff_base_ms: 5,
            backoff_max_ms: 5,
            append_timeout_ms: 30,
        };
        let writer = LedgerWriter::new(store, config);
        let key = ChainKey::new(RecordType::Vote, "t1");
        let payload = RecordPayload::vote("t1", "m1", "v1", VoteValue::Approve, None);

        let err = writer.append(&key, "v1", &payload).await.unwrap_err();
        assert!(matches!(err, LedgerError::AppendTimeout { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_form_single_chain() {
        let store = MemoryStore::new();
        let k = 8u32;
        let config = WriterConfig {
            max_retries: k,
            ..fast_config()
        };
        let writer = LedgerWriter::new(Arc::new(store.clone()), config);
        let key = ChainKey::new(RecordType::Contribution, "t1");

        let mut handles = Vec::new();
        for i in 0..k {
            let writer = writer.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                let actor = format!("u{}", i);
                let payload =
                    RecordPayload::contribution("t1", actor.as_str(), MinorUnits(100), "USD", None);
                writer.append(&key, &actor, &payload).await
            }));
        }
        let mut retries = 0;
        for handle in handles {
            let receipt = handle.await.unwrap().unwrap();
            assert!(receipt.attempts <= k);
            retries += receipt.attempts - 1;
        }
        assert!(retries <= k - 1);

        let records = store.records_for_trust("t1").await.unwrap();
        assert_eq!(records.len(), k as usize);
        assert!(verify_chain(&records).iter().all(|v| v.is_valid));
        assert!(crate::ledger::verify::detect_forks(&records).is_empty());
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = WriterConfig {
            max_retries: 5,
            backoff_base_ms: 10,
            backoff_max_ms: 50,
            append_timeout_ms: 1_000,
        };
        assert!(config.backoff(1) <= Duration::from_millis(20));
        assert!(config.backoff(10) <= Duration::from_millis(60));
        assert!(config.backoff(10) >= Duration::from_millis(50));
    }
}
