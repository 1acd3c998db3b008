//! HTTP surface for the ledger
//!
//! Write API for the workflows that emit Trust events and read API for the
//! audit dashboard.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::ledger::audit::{
    AuditAggregator, AuditReport, FinancialAnalytics, VerificationStats, VerifiedRecord,
    VotingAnalytics,
};
use crate::ledger::payload::RecordPayload;
use crate::ledger::record::LedgerRecord;
use crate::ledger::store::LedgerStore;
use crate::ledger::verify::RecordVerification;
use crate::ledger::writer::{AppendReceipt, LedgerWriter, WriterConfig};

#[derive(Clone)]
pub struct AppState {
    pub writer: LedgerWriter,
    pub aggregator: AuditAggregator,
}

impl AppState {
    pub fn new(store: Arc<dyn LedgerStore>, writer_config: WriterConfig, currency: &str) -> Self {
        Self {
            writer: LedgerWriter::new(store.clone(), writer_config),
            aggregator: AuditAggregator::new(store, currency),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AppendRequest {
    pub actor_id: String,
    pub payload: RecordPayload,
}

pub struct ApiError(LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LedgerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::LedgerContention { .. } => StatusCode::CONFLICT,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::IntegrityViolation { .. } => StatusCode::CONFLICT,
            LedgerError::AppendTimeout { .. } | LedgerError::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            LedgerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        });
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/trusts/:trust_id/records", post(append_record))
        .route("/trusts/:trust_id/audit", get(audit_trail))
        .route("/trusts/:trust_id/stats", get(verification_stats))
        .route("/trusts/:trust_id/voting", get(voting_analytics))
        .route("/trusts/:trust_id/financial", get(financial_analytics))
        .route("/trusts/:trust_id/report", get(audit_report))
        .route("/trusts/:trust_id/members/:actor_id/history", get(member_history))
        .route("/records/:id/verify", get(verify_record))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "trust-ledger",
        "timestamp": Utc::now()
    }))
}

async fn append_record(
    State(state): State<AppState>,
    Path(trust_id): Path<String>,
    Json(request): Json<AppendRequest>,
) -> Result<(StatusCode, Json<AppendReceipt>), ApiError> {
    let mut payload = request.payload;
    if payload.trust_id() != trust_id {
        return Err(LedgerError::validation(format!(
            "Payload trust {} does not match path trust {}",
            payload.trust_id(),
            trust_id
        ))
        .into());
    }
    payload.restamp(Utc::now());
    let receipt = state
        .writer
        .append(&payload.chain_key(), &request.actor_id, &payload)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn audit_trail(
    State(state): State<AppState>,
    Path(trust_id): Path<String>,
) -> Result<Json<Vec<VerifiedRecord>>, ApiError> {
    Ok(Json(state.aggregator.get_audit_trail(&trust_id).await?))
}

async fn verification_stats(
    State(state): State<AppState>,
    Path(trust_id): Path<String>,
) -> Result<Json<VerificationStats>, ApiError> {
    Ok(Json(state.aggregator.get_verification_stats(&trust_id).await?))
}

async fn voting_analytics(
    State(state): State<AppState>,
    Path(trust_id): Path<String>,
) -> Result<Json<VotingAnalytics>, ApiError> {
    Ok(Json(state.aggregator.get_voting_analytics(&trust_id).await?))
}

async fn financial_analytics(
    State(state): State<AppState>,
    Path(trust_id): Path<String>,
) -> Result<Json<FinancialAnalytics>, ApiError> {
    Ok(Json(state.aggregator.get_financial_analytics(&trust_id).await?))
}

async fn audit_report(
    State(state): State<AppState>,
    Path(trust_id): Path<String>,
) -> Result<Json<AuditReport>, ApiError> {
    Ok(Json(state.aggregator.audit_report(&trust_id).await?))
}

async fn member_history(
    State(state): State<AppState>,
    Path((trust_id, actor_id)): Path<(String, String)>,
) -> Result<Json<Vec<LedgerRecord>>, ApiError> {
    Ok(Json(
        state.aggregator.get_member_history(&trust_id, &actor_id).await?,
    ))
}

async fn verify_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RecordVerification>, ApiError> {
    Ok(Json(state.aggregator.verify_record_by_id(id).await?))
}
