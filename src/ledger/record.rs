//! Ledger Record
//!
//! The immutable unit of the ledger and the key that assigns it to a chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LedgerError;

/// `previous_hash` of the first record in every chain
pub const GENESIS_HASH: &str = "0";

/// Kind of Trust event a record captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    MemberJoin,
    Vote,
    Contribution,
    LoanApproval,
}

impl RecordType {
    pub const ALL: [RecordType; 4] = [
        RecordType::MemberJoin,
        RecordType::Vote,
        RecordType::Contribution,
        RecordType::LoanApproval,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::MemberJoin => "member_join",
            RecordType::Vote => "vote",
            RecordType::Contribution => "contribution",
            RecordType::LoanApproval => "loan_approval",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| LedgerError::validation(format!("Unknown record type: {}", s)))
    }
}

/// Identifies one chain: a record type scoped to a single Trust
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChainKey {
    pub record_type: RecordType,
    pub trust_id: String,
}

impl ChainKey {
    pub fn new(record_type: RecordType, trust_id: impl Into<String>) -> Self {
        Self {
            record_type,
            trust_id: trust_id.into(),
        }
    }
}

impl fmt::Display for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.trust_id, self.record_type)
    }
}

/// A persisted ledger record.
///
/// `payload` holds the exact JSON that was hashed at write time. It is kept
/// untyped here so that a tampered or otherwise unparsable payload can still
/// be loaded and reported on by the verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: Uuid,
    pub sequence: i64,
    pub chain_key: ChainKey,
    pub actor_id: String,
    pub payload: serde_json::Value,
    pub record_hash: String,
    pub previous_hash: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerRecord {
    pub fn summary(&self) -> String {
        format!(
            "{} #{} by {} ({} -> {})",
            self.chain_key, self.sequence, self.actor_id, self.previous_hash, self.record_hash
        )
    }
}

/// A record ready for the store's conditional insert. The store assigns
/// `sequence`.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub id: Uuid,
    pub chain_key: ChainKey,
    pub actor_id: String,
    pub payload: serde_json::Value,
    pub record_hash: String,
    pub previous_hash: String,
    pub created_at: DateTime<Utc>,
}

impl NewRecord {
    pub fn into_record(self, sequence: i64) -> LedgerRecord {
        LedgerRecord {
            id: self.id,
            sequence,
            chain_key: self.chain_key,
            actor_id: self.actor_id,
            payload: self.payload,
            record_hash: self.record_hash,
            previous_hash: self.previous_hash,
            created_at: self.created_at,
        }
    }
}

/// Current head of a chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTip {
    pub record_hash: String,
    pub created_at: DateTime<Utc>,
}
