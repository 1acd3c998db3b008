use thiserror::Error;

use crate::ledger::record::ChainKey;
use crate::ledger::verify::IntegrityViolation;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreUnavailable(format!("Database error: {}", err))
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            // A bare conflict outside the writer's retry loop is still contention.
            StoreError::Conflict(chain_key) => Self::LedgerContention {
                chain_key,
                attempts: 1,
            },
            StoreError::Corrupt(msg) => Self::StoreUnavailable(format!("Corrupt row: {}", msg)),
            StoreError::Rejected(msg) => Self::Validation(msg),
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
        }
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Ledger contention on {chain_key}: gave up after {attempts} attempts")]
    LedgerContention { chain_key: ChainKey, attempts: u32 },

    #[error("Append to {chain_key} timed out after {elapsed_ms} ms")]
    AppendTimeout { chain_key: ChainKey, elapsed_ms: u128 },

    #[error("Integrity violation in trust {trust_id}: {} invalid record(s)", violations.len())]
    IntegrityViolation {
        trust_id: String,
        violations: Vec<IntegrityViolation>,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether re-submitting the originating event may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LedgerContention { .. } | Self::AppendTimeout { .. } | Self::StoreUnavailable(_)
        )
    }
}

/// Errors surfaced by a [`crate::ledger::store::LedgerStore`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The conditional insert lost: the chain already has a record linked to
    /// the same predecessor.
    #[error("Chain {0} already has a record linked to this predecessor")]
    Conflict(ChainKey),

    #[error("Corrupt record row: {0}")]
    Corrupt(String),

    /// The record could not be built from the tip it was given
    #[error("Record rejected: {0}")]
    Rejected(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable(format!("Database error: {}", err))
    }
}
