use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    Extension, Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::InlineFile;
use crate::auth::{Actor, Role};
use crate::database::store::RecordFilter;
use crate::error::ApiError;
use crate::fees::{ConcessionType, FeeHead, StudentRecord};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::{ApplyConcessionRequest, AssignRequest};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub academic_year: Option<String>,
    pub class_id: Option<Uuid>,
    pub section_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveQuery {
    pub academic_year: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcessionBody {
    #[serde(rename = "type")]
    pub concession_type: ConcessionType,
    pub value: Decimal,
    pub remark: String,
    pub target_heads: Option<Vec<FeeHead>>,
    pub proof: Option<InlineFile>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeBody {
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofLink {
    pub url: String,
    pub expires_in_seconds: u64,
}

/// POST /api/enrollments
pub async fn assign(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    body: Result<Json<AssignRequest>, JsonRejection>,
) -> ApiResult<StudentRecord> {
    actor.require(Role::FINANCE)?;
    let Json(request) = body?;
    let record = state.enrollments.assign(&actor, request).await?;
    Ok(ApiResponse::success(record))
}

/// DELETE /api/enrollments/:student_id
pub async fn remove(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<RemoveQuery>, QueryRejection>,
) -> ApiResult<StudentRecord> {
    actor.require(Role::FINANCE)?;
    let Path(student_id) = path?;
    let Query(query) = query?;
    let removed = state
        .enrollments
        .remove(&actor, student_id, query.academic_year, query.reason)
        .await?;
    Ok(ApiResponse::success(removed))
}

/// GET /api/enrollments
pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Vec<StudentRecord>> {
    let Query(query) = query?;
    let filter = RecordFilter {
        school_id: actor.school_id,
        academic_year: query.academic_year,
        class_id: query.class_id,
        section_id: query.section_id,
    };
    Ok(ApiResponse::success(state.enrollments.list_records(&filter).await?))
}

/// GET /api/enrollments/:record_id
pub async fn get(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<StudentRecord> {
    let Path(record_id) = path?;
    Ok(ApiResponse::success(
        state.enrollments.get_record(actor.school_id, record_id).await?,
    ))
}

/// POST /api/enrollments/:record_id/concession
pub async fn apply_concession(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<ConcessionBody>, JsonRejection>,
) -> ApiResult<StudentRecord> {
    actor.require(Role::APPROVERS)?;
    let Path(record_id) = path?;
    let Json(body) = body?;
    let request = ApplyConcessionRequest {
        concession_type: body.concession_type,
        value: body.value,
        remark: body.remark,
        target_heads: body.target_heads,
        proof: body.proof.map(InlineFile::decode).transpose()?,
    };
    let record = state.concessions.apply_concession(&actor, record_id, request).await?;
    Ok(ApiResponse::success(record))
}

/// DELETE /api/enrollments/:record_id/concession
pub async fn revoke_concession(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<RevokeBody>, JsonRejection>,
) -> ApiResult<StudentRecord> {
    actor.require(Role::APPROVERS)?;
    let Path(record_id) = path?;
    let Json(body) = body?;
    let record = state
        .concessions
        .revoke_concession(&actor, record_id, &body.reason)
        .await?;
    Ok(ApiResponse::success(record))
}

/// GET /api/enrollments/:record_id/concession/proof
pub async fn concession_proof(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<ProofLink> {
    let Path(record_id) = path?;
    let record = state.enrollments.get_record(actor.school_id, record_id).await?;
    let proof_ref = record
        .concession
        .proof_ref
        .ok_or_else(|| ApiError::not_found("No concession proof on this record"))?;
    Ok(ApiResponse::success(ProofLink {
        url: state.concessions.proof_url(&proof_ref),
        expires_in_seconds: 15 * 60,
    }))
}
