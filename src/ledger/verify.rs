//! Record Verification
//!
//! Recomputes record hashes and checks predecessor linkage. Everything here
//! is pure: records are only read, and a failed check is reported as data
//! rather than returned as an error.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::ledger::hasher;
use crate::ledger::record::{ChainKey, LedgerRecord, RecordType, GENESIS_HASH};

/// Outcome of verifying one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordVerification {
    pub record_id: Uuid,
    pub is_valid: bool,
    pub chain_valid: bool,
    pub hash_valid: bool,
    pub verification_details: VerificationDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationDetails {
    pub record_hash: String,
    pub previous_hash: String,
    pub expected_previous_hash: String,
    /// `None` when the stored payload can no longer be canonicalized
    pub recomputed_hash: Option<String>,
    pub record_type: RecordType,
}

impl RecordVerification {
    /// The anomaly this result represents, if it failed
    pub fn violation(&self, chain_key: &ChainKey) -> Option<IntegrityViolation> {
        let kind = match (self.hash_valid, self.chain_valid) {
            (true, true) => return None,
            (false, true) => ViolationKind::HashMismatch,
            (true, false) => ViolationKind::BrokenLink,
            (false, false) => ViolationKind::HashMismatchAndBrokenLink,
        };
        Some(IntegrityViolation {
            record_id: self.record_id,
            chain_key: chain_key.clone(),
            kind,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    HashMismatch,
    BrokenLink,
    HashMismatchAndBrokenLink,
}

/// A record that failed verification, flagged for operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityViolation {
    pub record_id: Uuid,
    pub chain_key: ChainKey,
    pub kind: ViolationKind,
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            ViolationKind::HashMismatch => "hash mismatch",
            ViolationKind::BrokenLink => "broken link",
            ViolationKind::HashMismatchAndBrokenLink => "hash mismatch and broken link",
        };
        write!(f, "{} in {} (record {})", what, self.chain_key, self.record_id)
    }
}

/// Verify a record against its in-chain predecessor (`None` for the first
/// record of a chain).
pub fn verify_record(record: &LedgerRecord, predecessor: Option<&LedgerRecord>) -> RecordVerification {
    let expected_previous_hash = predecessor
        .map(|p| p.record_hash.clone())
        .unwrap_or_else(|| GENESIS_HASH.to_string());
    let chain_valid = record.previous_hash == expected_previous_hash;

    let recomputed_hash = hasher::record_hash(&record.payload, &record.previous_hash).ok();
    let hash_valid = recomputed_hash.as_deref() == Some(record.record_hash.as_str());

    RecordVerification {
        record_id: record.id,
        is_valid: hash_valid && chain_valid,
        chain_valid,
        hash_valid,
        verification_details: VerificationDetails {
            record_hash: record.record_hash.clone(),
            previous_hash: record.previous_hash.clone(),
            expected_previous_hash,
            recomputed_hash,
            record_type: record.chain_key.record_type,
        },
    }
}

/// Verify one chain given in insertion order
pub fn verify_chain(records: &[LedgerRecord]) -> Vec<RecordVerification> {
    let mut results = Vec::with_capacity(records.len());
    let mut predecessor: Option<&LedgerRecord> = None;
    for record in records {
        results.push(verify_record(record, predecessor));
        predecessor = Some(record);
    }
    results
}

/// Pairs of records in one chain that name the same predecessor
pub fn detect_forks(records: &[LedgerRecord]) -> Vec<(Uuid, Uuid)> {
    let mut seen: HashMap<(&ChainKey, &str), Uuid> = HashMap::new();
    let mut forks = Vec::new();
    for record in records {
        match seen.entry((&record.chain_key, record.previous_hash.as_str())) {
            Entry::Occupied(first) => {
                forks.push((*first.get(), record.id));
            }
            Entry::Vacant(slot) => {
                slot.insert(record.id);
            }
        }
    }
    forks
}
