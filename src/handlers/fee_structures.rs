use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, State},
    Extension, Json,
};
use uuid::Uuid;

use crate::auth::{Actor, Role};
use crate::fees::{FeeHeads, FeeStructure};
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetFeeStructureBody {
    pub fee_head: FeeHeads,
}

/// PUT /api/fee-structures/:class_id
pub async fn put(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<SetFeeStructureBody>, JsonRejection>,
) -> ApiResult<FeeStructure> {
    actor.require(Role::FINANCE)?;
    let Path(class_id) = path?;
    let Json(body) = body?;
    let structure = state
        .fee_structures
        .set_fee_structure(&actor, class_id, body.fee_head)
        .await?;
    Ok(ApiResponse::success(structure))
}

/// GET /api/fee-structures/:class_id
pub async fn get(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<FeeStructure> {
    let Path(class_id) = path?;
    let structure = state
        .fee_structures
        .get_fee_structure_by_class(actor.school_id, class_id)
        .await?;
    Ok(ApiResponse::success(structure))
}

/// GET /api/fee-structures
pub async fn list(State(state): State<AppState>, Extension(actor): Extension<Actor>) -> ApiResult<Vec<FeeStructure>> {
    let structures = state.fee_structures.list_fee_structures(actor.school_id).await?;
    Ok(ApiResponse::success(structures))
}
