use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::collaborators::mime_for_key;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

/// GET /files/:key
///
/// Public, but only for links minted by `ObjectStorage::sign` that have not
/// expired.
pub async fn download(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<SignedQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Path(key) = path?;
    let Query(query) = query.map_err(|_| ApiError::forbidden("Link is invalid or has expired"))?;
    if !state.storage.verify(&key, query.expires, &query.signature) {
        return Err(ApiError::forbidden("Link is invalid or has expired"));
    }
    let bytes = state.storage.fetch(&key).await?;
    Ok(([(header::CONTENT_TYPE, mime_for_key(&key))], bytes).into_response())
}
