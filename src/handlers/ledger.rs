use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    Extension, Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use super::academic_year_for;
use crate::auth::{Actor, Role};
use crate::fees::PaymentMode;
use crate::ledger::{LedgerBalance, LedgerEntry, LedgerFilter, LedgerStatus, ReconciliationReport, TransactionType};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::BackfillReport;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    pub academic_year: Option<String>,
    pub transaction_type: Option<TransactionType>,
    pub status: Option<LedgerStatus>,
    pub payment_mode: Option<PaymentMode>,
    pub section_id: Option<Uuid>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct YearQuery {
    pub academic_year: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub reason: String,
}

/// GET /api/ledger
pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    query: Result<Query<LedgerQuery>, QueryRejection>,
) -> ApiResult<Vec<LedgerEntry>> {
    actor.require(Role::FINANCE)?;
    let Query(query) = query?;
    let filter = LedgerFilter {
        school_id: actor.school_id,
        academic_year: query.academic_year,
        transaction_type: query.transaction_type,
        status: query.status,
        payment_mode: query.payment_mode,
        section_id: query.section_id,
        from_date: query.from_date,
        to_date: query.to_date,
        page: state.page(query.page, query.limit),
    };
    Ok(ApiResponse::page(state.ledger.list_entries(&filter).await?))
}

/// GET /api/ledger/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<LedgerEntry> {
    actor.require(Role::FINANCE)?;
    let Path(id) = path?;
    Ok(ApiResponse::success(state.ledger.get_entry(actor.school_id, id).await?))
}

/// GET /api/ledger/balance
pub async fn balance(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    query: Result<Query<YearQuery>, QueryRejection>,
) -> ApiResult<LedgerBalance> {
    actor.require(Role::FINANCE)?;
    let Query(query) = query?;
    let year = academic_year_for(&state, &actor, query.academic_year).await?;
    Ok(ApiResponse::success(state.ledger.balance(actor.school_id, &year).await?))
}

/// GET /api/ledger/reconcile
pub async fn reconcile(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    query: Result<Query<YearQuery>, QueryRejection>,
) -> ApiResult<ReconciliationReport> {
    actor.require(Role::FINANCE)?;
    let Query(query) = query?;
    let year = academic_year_for(&state, &actor, query.academic_year).await?;
    Ok(ApiResponse::success(state.ledger.reconcile(actor.school_id, &year).await?))
}

/// POST /api/ledger/backfill
pub async fn backfill(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    query: Result<Query<YearQuery>, QueryRejection>,
) -> ApiResult<BackfillReport> {
    actor.require(Role::APPROVERS)?;
    let Query(query) = query?;
    let year = academic_year_for(&state, &actor, query.academic_year).await?;
    Ok(ApiResponse::success(state.ledger.backfill(&actor, &year).await?))
}

/// POST /api/ledger/:id/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<CancelBody>, JsonRejection>,
) -> ApiResult<LedgerEntry> {
    actor.require(Role::APPROVERS)?;
    let Path(id) = path?;
    let Json(body) = body?;
    Ok(ApiResponse::success(
        state.ledger.cancel_ledger_entry(&actor, id, &body.reason).await?,
    ))
}
