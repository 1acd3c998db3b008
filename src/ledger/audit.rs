//! Audit Aggregator
//!
//! Reads a Trust's records once, verifies every chain in that snapshot and
//! derives integrity statistics plus voting and financial analytics. Failed
//! records are reported as anomalies; they never abort the audit.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::ledger::payload::{MinorUnits, RecordPayload, VoteValue};
use crate::ledger::record::{ChainKey, LedgerRecord, RecordType};
use crate::ledger::store::LedgerStore;
use crate::ledger::verify::{verify_chain, verify_record, IntegrityViolation, RecordVerification};

/// Number of votes listed in [`VotingAnalytics::recent_votes`]
pub const RECENT_VOTES_LIMIT: usize = 10;

/// A record together with its verification result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedRecord {
    #[serde(flatten)]
    pub record: LedgerRecord,
    pub verification: RecordVerification,
}

impl VerifiedRecord {
    /// Typed payload, or `None` if the stored JSON no longer parses
    pub fn payload(&self) -> Option<RecordPayload> {
        RecordPayload::from_value(&self.record.payload).ok()
    }

    /// Typed payload, only if it parses and agrees with the chain the record
    /// is stored in (same variant, same Trust)
    pub fn chain_payload(&self) -> Option<RecordPayload> {
        self.payload()
            .filter(|p| p.chain_key() == self.record.chain_key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordTypeCounts {
    pub member_joins: usize,
    pub votes: usize,
    pub contributions: usize,
    pub loan_approvals: usize,
}

impl RecordTypeCounts {
    fn bump(&mut self, record_type: RecordType) {
        match record_type {
            RecordType::MemberJoin => self.member_joins += 1,
            RecordType::Vote => self.votes += 1,
            RecordType::Contribution => self.contributions += 1,
            RecordType::LoanApproval => self.loan_approvals += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationStats {
    pub total_records: usize,
    pub verified_records: usize,
    /// Percentage, two decimal places
    pub verification_rate: f64,
    pub records_by_type: RecordTypeCounts,
    pub chain_integrity: bool,
    pub anomalies: Vec<IntegrityViolation>,
}

impl VerificationStats {
    pub fn from_trail(trail: &[VerifiedRecord]) -> Self {
        let mut records_by_type = RecordTypeCounts::default();
        let mut anomalies = Vec::new();
        let mut verified_records = 0;

        for entry in trail {
            records_by_type.bump(entry.record.chain_key.record_type);
            if entry.verification.is_valid {
                verified_records += 1;
            } else if let Some(violation) = entry.verification.violation(&entry.record.chain_key) {
                anomalies.push(violation);
            }
        }

        Self {
            total_records: trail.len(),
            verified_records,
            verification_rate: percentage(verified_records, trail.len()),
            records_by_type,
            chain_integrity: anomalies.is_empty(),
            anomalies,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSummary {
    pub record_id: Uuid,
    pub voter_id: String,
    pub member_id_voted_on: String,
    pub vote: VoteValue,
    pub reason: Option<String>,
    pub is_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingAnalytics {
    pub total_votes: usize,
    pub approvals: usize,
    pub rejections: usize,
    /// Percentage, two decimal places; zero when there are no votes
    pub approval_rate: f64,
    /// Votes in the analytics that failed verification
    pub unverified_votes: usize,
    /// Newest first
    pub recent_votes: Vec<VoteSummary>,
}

impl VotingAnalytics {
    /// `trail` must be ordered newest-first. Records are selected by their
    /// chain's type; a vote record whose payload no longer parses as a vote
    /// of this Trust counts toward `total_votes` and `unverified_votes` only.
    pub fn from_trail(trail: &[VerifiedRecord]) -> Self {
        let mut total_votes = 0;
        let mut approvals = 0;
        let mut rejections = 0;
        let mut unverified_votes = 0;
        let mut recent_votes = Vec::new();

        for entry in trail {
            if entry.record.chain_key.record_type != RecordType::Vote {
                continue;
            }
            total_votes += 1;
            let Some(RecordPayload::Vote(vote)) = entry.chain_payload() else {
                unverified_votes += 1;
                continue;
            };
            match vote.vote {
                VoteValue::Approve => approvals += 1,
                VoteValue::Reject => rejections += 1,
            }
            if !entry.verification.is_valid {
                unverified_votes += 1;
            }
            if recent_votes.len() < RECENT_VOTES_LIMIT {
                recent_votes.push(VoteSummary {
                    record_id: entry.record.id,
                    voter_id: vote.voter_id,
                    member_id_voted_on: vote.member_id_voted_on,
                    vote: vote.vote,
                    reason: vote.reason,
                    is_valid: entry.verification.is_valid,
                });
            }
        }

        Self {
            total_votes,
            approvals,
            rejections,
            approval_rate: percentage(approvals, total_votes),
            unverified_votes,
            recent_votes,
        }
    }
}

/// Amounts are integer minor units (`6000` is 60.00); `display` carries the
/// same figures as decimal strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialAnalytics {
    pub currency: String,
    pub total_contributed: MinorUnits,
    pub total_loaned: MinorUnits,
    pub contribution_count: usize,
    pub loan_count: usize,
    pub average_contribution: MinorUnits,
    pub average_loan: MinorUnits,
    /// Contribution and loan records that failed verification or whose
    /// payload no longer matches their chain
    pub unverified_records: usize,
    /// Records denominated in another currency, left out of the totals
    pub other_currency_records: usize,
    pub display: FinancialDisplay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialDisplay {
    pub total_contributed: String,
    pub total_loaned: String,
    pub average_contribution: String,
    pub average_loan: String,
}

impl FinancialAnalytics {
    /// Records are selected by their chain's type. One whose payload no
    /// longer parses as that type for this Trust has no trustworthy amount:
    /// it is counted in `unverified_records` and left out of the totals.
    pub fn from_trail(trail: &[VerifiedRecord], currency: &str) -> Self {
        let mut total_contributed = MinorUnits::zero();
        let mut total_loaned = MinorUnits::zero();
        let mut contribution_count = 0;
        let mut loan_count = 0;
        let mut unverified_records = 0;
        let mut other_currency_records = 0;

        for entry in trail {
            let is_loan = match entry.record.chain_key.record_type {
                RecordType::Contribution => false,
                RecordType::LoanApproval => true,
                _ => continue,
            };
            let (amount, record_currency) = match entry.chain_payload() {
                Some(RecordPayload::Contribution(c)) => (c.amount, c.currency),
                Some(RecordPayload::LoanApproval(l)) => (l.loan_amount, l.currency),
                _ => {
                    unverified_records += 1;
                    continue;
                }
            };
            if record_currency != currency {
                other_currency_records += 1;
                continue;
            }
            if !entry.verification.is_valid {
                unverified_records += 1;
            }
            if is_loan {
                total_loaned = total_loaned.saturating_add(amount);
                loan_count += 1;
            } else {
                total_contributed = total_contributed.saturating_add(amount);
                contribution_count += 1;
            }
        }

        let average_contribution = MinorUnits::average(total_contributed, contribution_count);
        let average_loan = MinorUnits::average(total_loaned, loan_count);
        Self {
            currency: currency.to_string(),
            total_contributed,
            total_loaned,
            contribution_count,
            loan_count,
            average_contribution,
            average_loan,
            unverified_records,
            other_currency_records,
            display: FinancialDisplay {
                total_contributed: total_contributed.to_string(),
                total_loaned: total_loaned.to_string(),
                average_contribution: average_contribution.to_string(),
                average_loan: average_loan.to_string(),
            },
        }
    }
}

/// Everything the dashboard shows for one Trust, from a single snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub trust_id: String,
    pub audit_trail: Vec<VerifiedRecord>,
    pub stats: VerificationStats,
    pub voting: VotingAnalytics,
    pub financial: FinancialAnalytics,
}

/// Verify every chain in `records` (insertion order) and return the trail
/// newest-first.
pub fn build_trail(records: Vec<LedgerRecord>) -> Vec<VerifiedRecord> {
    let mut chains: BTreeMap<ChainKey, Vec<LedgerRecord>> = BTreeMap::new();
    for record in records {
        chains.entry(record.chain_key.clone()).or_default().push(record);
    }

    let mut trail: Vec<VerifiedRecord> = chains
        .into_values()
        .flat_map(|chain| {
            let results = verify_chain(&chain);
            chain
                .into_iter()
                .zip(results)
                .map(|(record, verification)| VerifiedRecord {
                    record,
                    verification,
                })
                .collect::<Vec<_>>()
        })
        .collect();

    trail.sort_by(|a, b| b.record.sequence.cmp(&a.record.sequence));
    trail
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Clone)]
pub struct AuditAggregator {
    store: Arc<dyn LedgerStore>,
    currency: String,
}

impl AuditAggregator {
    pub fn new(store: Arc<dyn LedgerStore>, currency: impl Into<String>) -> Self {
        Self {
            store,
            currency: currency.into(),
        }
    }

    /// Snapshot of a Trust's records, verified, newest-first
    pub async fn get_audit_trail(&self, trust_id: &str) -> Result<Vec<VerifiedRecord>, LedgerError> {
        let records = self.store.records_for_trust(trust_id).await?;
        Ok(build_trail(records))
    }

    pub async fn get_verification_stats(&self, trust_id: &str) -> Result<VerificationStats, LedgerError> {
        let trail = self.get_audit_trail(trust_id).await?;
        Ok(VerificationStats::from_trail(&trail))
    }

    pub async fn get_voting_analytics(&self, trust_id: &str) -> Result<VotingAnalytics, LedgerError> {
        let trail = self.get_audit_trail(trust_id).await?;
        Ok(VotingAnalytics::from_trail(&trail))
    }

    pub async fn get_financial_analytics(&self, trust_id: &str) -> Result<FinancialAnalytics, LedgerError> {
        let trail = self.get_audit_trail(trust_id).await?;
        Ok(FinancialAnalytics::from_trail(&trail, &self.currency))
    }

    /// Trail plus every summary, computed from one read
    pub async fn audit_report(&self, trust_id: &str) -> Result<AuditReport, LedgerError> {
        let audit_trail = self.get_audit_trail(trust_id).await?;
        let stats = VerificationStats::from_trail(&audit_trail);
        let voting = VotingAnalytics::from_trail(&audit_trail);
        let financial = FinancialAnalytics::from_trail(&audit_trail, &self.currency);

        if stats.chain_integrity {
            info!(
                "Audit of trust {}: {} records, chain intact",
                trust_id, stats.total_records
            );
        } else {
            warn!(
                "Audit of trust {}: {} of {} records failed verification",
                trust_id,
                stats.anomalies.len(),
                stats.total_records
            );
        }

        Ok(AuditReport {
            trust_id: trust_id.to_string(),
            audit_trail,
            stats,
            voting,
            financial,
        })
    }

    /// Records caused by one member of a Trust, newest-first
    pub async fn get_member_history(
        &self,
        trust_id: &str,
        actor_id: &str,
    ) -> Result<Vec<LedgerRecord>, LedgerError> {
        let mut records = self.store.records_for_actor(trust_id, actor_id).await?;
        records.reverse();
        Ok(records)
    }

    /// Verify a single stored record against its in-chain predecessor
    pub async fn verify_record_by_id(&self, id: Uuid) -> Result<RecordVerification, LedgerError> {
        let record = self
            .store
            .record_by_id(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("record {}", id)))?;
        let predecessor = self.store.predecessor_of(&record).await?;
        Ok(verify_record(&record, predecessor.as_ref()))
    }

    /// Stats for the Trust, or an error listing every failed record
    pub async fn ensure_integrity(&self, trust_id: &str) -> Result<VerificationStats, LedgerError> {
        let stats = self.get_verification_stats(trust_id).await?;
        if !stats.chain_integrity {
            return Err(LedgerError::IntegrityViolation {
                trust_id: trust_id.to_string(),
                violations: stats.anomalies,
            });
        }
        Ok(stats)
    }
}
