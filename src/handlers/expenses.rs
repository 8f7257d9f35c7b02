use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    Extension, Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use super::InlineFile;
use crate::auth::{Actor, Role};
use crate::fees::PaymentMode;
use crate::ledger::Expense;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::RecordExpenseRequest;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseBody {
    pub academic_year: Option<String>,
    pub amount: Decimal,
    pub category: String,
    pub description: Option<String>,
    pub payment_mode: PaymentMode,
    pub expense_date: Option<NaiveDate>,
    pub bill: Option<InlineFile>,
}

#[derive(Debug, Deserialize)]
pub struct ExpenseQuery {
    pub academic_year: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub reason: String,
}

/// POST /api/expenses
pub async fn create(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    body: Result<Json<ExpenseBody>, JsonRejection>,
) -> ApiResult<Expense> {
    actor.require(Role::FINANCE)?;
    let Json(body) = body?;
    let request = RecordExpenseRequest {
        academic_year: body.academic_year,
        amount: body.amount,
        category: body.category,
        description: body.description,
        payment_mode: body.payment_mode,
        expense_date: body.expense_date,
        bill: body.bill.map(InlineFile::decode).transpose()?,
    };
    Ok(ApiResponse::created(state.expenses.record_expense(&actor, request).await?))
}

/// GET /api/expenses
pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    query: Result<Query<ExpenseQuery>, QueryRejection>,
) -> ApiResult<Vec<Expense>> {
    actor.require(Role::FINANCE)?;
    let Query(query) = query?;
    let expenses = state
        .expenses
        .list_expenses(actor.school_id, query.academic_year.as_deref())
        .await?;
    Ok(ApiResponse::success(expenses))
}

/// GET /api/expenses/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Expense> {
    actor.require(Role::FINANCE)?;
    let Path(id) = path?;
    Ok(ApiResponse::success(state.expenses.get_expense(actor.school_id, id).await?))
}

/// POST /api/expenses/:id/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<CancelBody>, JsonRejection>,
) -> ApiResult<Expense> {
    actor.require(Role::APPROVERS)?;
    let Path(id) = path?;
    let Json(body) = body?;
    Ok(ApiResponse::success(
        state.expenses.cancel_expense(&actor, id, &body.reason).await?,
    ))
}
