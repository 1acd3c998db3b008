//! Record Payload Schemas
//!
//! One closed variant per record type. Money is carried as integer minor
//! units so the hashed form never depends on floating-point formatting.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;
use crate::ledger::record::{ChainKey, RecordType};

/// Largest accepted single amount (100 billion major units)
pub const MAX_AMOUNT_MINOR: i64 = 10_000_000_000_000;

/// Monetary amount in minor currency units (e.g. cents)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinorUnits(pub i64);

impl MinorUnits {
    pub fn zero() -> Self {
        MinorUnits(0)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn saturating_add(self, other: MinorUnits) -> Self {
        MinorUnits(self.0.saturating_add(other.0))
    }

    /// Mean of `total` over `count` items, rounded half away from zero.
    /// Zero when `count` is zero.
    pub fn average(total: MinorUnits, count: usize) -> Self {
        if count == 0 {
            return MinorUnits::zero();
        }
        let total = total.0 as i128;
        let count = count as i128;
        let half = count / 2;
        let rounded = if total >= 0 {
            (total + half) / count
        } else {
            (total - half) / count
        };
        MinorUnits(rounded as i64)
    }
}

impl fmt::Display for MinorUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl FromStr for MinorUnits {
    type Err = LedgerError;

    /// Parse a decimal amount with at most two fractional digits
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || LedgerError::validation(format!("Invalid amount: {:?}", s));

        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (digits, ""),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if digits.ends_with('.') {
            return Err(invalid());
        }

        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        let minor = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(invalid)?;
        Ok(MinorUnits(if negative { -minor } else { minor }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberVerificationStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteValue {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Approved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberJoin {
    pub trust_id: String,
    pub user_id: String,
    pub member_name: String,
    pub verification_status: MemberVerificationStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub verification_data: BTreeMap<String, String>,
    #[serde(default = "event_timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub trust_id: String,
    pub member_id_voted_on: String,
    pub voter_id: String,
    pub vote: VoteValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default = "event_timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub trust_id: String,
    pub contributor_id: String,
    pub amount: MinorUnits,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "event_timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApproval {
    pub trust_id: String,
    pub borrower_id: String,
    pub loan_id: String,
    pub loan_amount: MinorUnits,
    pub currency: String,
    pub status: LoanStatus,
    #[serde(default = "event_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Typed record payload, tagged by `record_type` in its JSON form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum RecordPayload {
    MemberJoin(MemberJoin),
    Vote(Vote),
    Contribution(Contribution),
    LoanApproval(LoanApproval),
}

/// Event timestamp at millisecond precision
pub fn event_timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

impl RecordPayload {
    pub fn member_join(
        trust_id: impl Into<String>,
        user_id: impl Into<String>,
        member_name: impl Into<String>,
        verification_data: BTreeMap<String, String>,
    ) -> Self {
        RecordPayload::MemberJoin(MemberJoin {
            trust_id: trust_id.into(),
            user_id: user_id.into(),
            member_name: member_name.into(),
            verification_status: MemberVerificationStatus::Pending,
            verification_data,
            timestamp: event_timestamp(),
        })
    }

    pub fn vote(
        trust_id: impl Into<String>,
        member_id_voted_on: impl Into<String>,
        voter_id: impl Into<String>,
        vote: VoteValue,
        reason: Option<String>,
    ) -> Self {
        RecordPayload::Vote(Vote {
            trust_id: trust_id.into(),
            member_id_voted_on: member_id_voted_on.into(),
            voter_id: voter_id.into(),
            vote,
            reason: reason.filter(|r| !r.trim().is_empty()),
            timestamp: event_timestamp(),
        })
    }

    pub fn contribution(
        trust_id: impl Into<String>,
        contributor_id: impl Into<String>,
        amount: MinorUnits,
        currency: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        RecordPayload::Contribution(Contribution {
            trust_id: trust_id.into(),
            contributor_id: contributor_id.into(),
            amount,
            currency: currency.into(),
            description: description.filter(|d| !d.trim().is_empty()),
            timestamp: event_timestamp(),
        })
    }

    pub fn loan_approval(
        trust_id: impl Into<String>,
        borrower_id: impl Into<String>,
        loan_id: impl Into<String>,
        loan_amount: MinorUnits,
        currency: impl Into<String>,
    ) -> Self {
        RecordPayload::LoanApproval(LoanApproval {
            trust_id: trust_id.into(),
            borrower_id: borrower_id.into(),
            loan_id: loan_id.into(),
            loan_amount,
            currency: currency.into(),
            status: LoanStatus::Approved,
            timestamp: event_timestamp(),
        })
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            RecordPayload::MemberJoin(_) => RecordType::MemberJoin,
            RecordPayload::Vote(_) => RecordType::Vote,
            RecordPayload::Contribution(_) => RecordType::Contribution,
            RecordPayload::LoanApproval(_) => RecordType::LoanApproval,
        }
    }

    pub fn trust_id(&self) -> &str {
        match self {
            RecordPayload::MemberJoin(p) => &p.trust_id,
            RecordPayload::Vote(p) => &p.trust_id,
            RecordPayload::Contribution(p) => &p.trust_id,
            RecordPayload::LoanApproval(p) => &p.trust_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            RecordPayload::MemberJoin(p) => p.timestamp,
            RecordPayload::Vote(p) => p.timestamp,
            RecordPayload::Contribution(p) => p.timestamp,
            RecordPayload::LoanApproval(p) => p.timestamp,
        }
    }

    /// Replace the event timestamp, e.g. when the event arrives over HTTP
    pub fn restamp(&mut self, at: DateTime<Utc>) {
        let at = at.trunc_subsecs(3);
        match self {
            RecordPayload::MemberJoin(p) => p.timestamp = at,
            RecordPayload::Vote(p) => p.timestamp = at,
            RecordPayload::Contribution(p) => p.timestamp = at,
            RecordPayload::LoanApproval(p) => p.timestamp = at,
        }
    }

    pub fn chain_key(&self) -> ChainKey {
        ChainKey::new(self.record_type(), self.trust_id())
    }

    /// Check the payload is well formed and belongs to `chain_key`
    pub fn validate_for(&self, chain_key: &ChainKey) -> Result<(), LedgerError> {
        if self.record_type() != chain_key.record_type {
            return Err(LedgerError::validation(format!(
                "Payload of type {} cannot be appended to chain {}",
                self.record_type(),
                chain_key
            )));
        }
        if self.trust_id() != chain_key.trust_id {
            return Err(LedgerError::validation(format!(
                "Payload trust {} does not match chain {}",
                self.trust_id(),
                chain_key
            )));
        }
        require_non_empty("trust_id", self.trust_id())?;

        match self {
            RecordPayload::MemberJoin(p) => {
                require_non_empty("user_id", &p.user_id)?;
                require_non_empty("member_name", &p.member_name)?;
            }
            RecordPayload::Vote(p) => {
                require_non_empty("member_id_voted_on", &p.member_id_voted_on)?;
                require_non_empty("voter_id", &p.voter_id)?;
            }
            RecordPayload::Contribution(p) => {
                require_non_empty("contributor_id", &p.contributor_id)?;
                validate_amount("amount", p.amount)?;
                validate_currency(&p.currency)?;
            }
            RecordPayload::LoanApproval(p) => {
                require_non_empty("borrower_id", &p.borrower_id)?;
                require_non_empty("loan_id", &p.loan_id)?;
                validate_amount("loan_amount", p.loan_amount)?;
                validate_currency(&p.currency)?;
            }
        }
        Ok(())
    }

    /// JSON form that gets hashed and persisted
    pub fn to_value(&self) -> Result<serde_json::Value, LedgerError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parse a persisted payload back into its typed form
    pub fn from_value(value: &serde_json::Value) -> Result<Self, LedgerError> {
        Ok(RecordPayload::deserialize(value)?)
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), LedgerError> {
    if value.trim().is_empty() {
        return Err(LedgerError::validation(format!("Missing required field: {}", field)));
    }
    Ok(())
}

fn validate_amount(field: &str, amount: MinorUnits) -> Result<(), LedgerError> {
    if amount.0 <= 0 {
        return Err(LedgerError::validation(format!(
            "{} must be positive, got {}",
            field, amount
        )));
    }
    if amount.0 > MAX_AMOUNT_MINOR {
        return Err(LedgerError::validation(format!(
            "{} exceeds the maximum of {}",
            field,
            MinorUnits(MAX_AMOUNT_MINOR)
        )));
    }
    Ok(())
}

fn validate_currency(currency: &str) -> Result<(), LedgerError> {
    if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(LedgerError::validation(format!(
            "Invalid currency code: {:?}",
            currency
        )));
    }
    Ok(())
}
