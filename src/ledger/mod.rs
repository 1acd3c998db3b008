//! Trust Ledger
//!
//! Tamper-evident, append-only record ledger for Trust events. Each
//! `(record_type, trust_id)` pair forms its own SHA-256 hash chain.

pub mod audit;
pub mod hasher;
pub mod payload;
pub mod record;
pub mod store;
pub mod verify;
pub mod writer;

pub use audit::{AuditAggregator, AuditReport, FinancialAnalytics, VerificationStats, VerifiedRecord, VotingAnalytics};
pub use payload::{MinorUnits, RecordPayload, VoteValue};
pub use record::{ChainKey, LedgerRecord, RecordType, GENESIS_HASH};
pub use store::{LedgerStore, MemoryStore};
pub use verify::{verify_chain, verify_record, IntegrityViolation, RecordVerification};
pub use writer::{AppendReceipt, LedgerWriter, WriterConfig};
