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

use crate::auth::{Actor, Role};
use crate::database::store::TransactionFilter;
use crate::fees::{FeeTransaction, PaymentMode, TransactionStatus};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::{CancelTransactionRequest, CollectFeeRequest, CollectionOutcome};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    pub academic_year: Option<String>,
    pub student_id: Option<Uuid>,
    pub record_id: Option<Uuid>,
    pub status: Option<TransactionStatus>,
    pub payment_mode: Option<PaymentMode>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// POST /api/fees/collect
pub async fn collect(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    body: Result<Json<CollectFeeRequest>, JsonRejection>,
) -> ApiResult<CollectionOutcome> {
    actor.require(Role::FINANCE)?;
    let Json(request) = body?;
    let outcome = state.collections.collect_fee(&actor, request).await?;
    Ok(ApiResponse::created(outcome))
}

/// GET /api/fees/transactions
pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    query: Result<Query<TransactionQuery>, QueryRejection>,
) -> ApiResult<Vec<FeeTransaction>> {
    let Query(query) = query?;
    let filter = TransactionFilter {
        school_id: actor.school_id,
        academic_year: query.academic_year,
        student_id: query.student_id,
        record_id: query.record_id,
        status: query.status,
        payment_mode: query.payment_mode,
        from_date: query.from_date,
        to_date: query.to_date,
        page: state.page(query.page, query.limit),
    };
    let page = state.collections.list_transactions(&filter).await?;
    Ok(ApiResponse::page(page))
}

/// GET /api/fees/transactions/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<FeeTransaction> {
    let Path(id) = path?;
    Ok(ApiResponse::success(
        state.collections.get_transaction(actor.school_id, id).await?,
    ))
}

/// POST /api/fees/transactions/:id/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<CancelTransactionRequest>, JsonRejection>,
) -> ApiResult<FeeTransaction> {
    actor.require(Role::APPROVERS)?;
    let Path(id) = path?;
    let Json(request) = body?;
    let cancelled = state.collections.cancel_transaction(&actor, id, request).await?;
    Ok(ApiResponse::success(cancelled))
}
