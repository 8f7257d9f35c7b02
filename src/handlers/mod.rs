//! HTTP handlers. Each one pulls the `Actor` placed by the auth middleware,
//! checks the role, and hands a typed request to a service.

pub mod collection;
pub mod enrollments;
pub mod expenses;
pub mod fee_structures;
pub mod files;
pub mod ledger;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::auth::Actor;
use crate::error::ApiError;
use crate::services::{load_school, resolve_academic_year, ProofUpload};
use crate::state::AppState;

/// A document sent inline as base64
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineFile {
    pub content_base64: String,
    pub mime_type: String,
}

impl InlineFile {
    pub fn decode(self) -> Result<ProofUpload, ApiError> {
        let bytes = STANDARD
            .decode(self.content_base64.trim())
            .map_err(|e| ApiError::validation_error(format!("File content is not valid base64: {}", e)))?;
        if bytes.is_empty() {
            return Err(ApiError::validation_error("File content is empty"));
        }
        Ok(ProofUpload {
            bytes,
            mime: self.mime_type,
        })
    }
}

/// Requested year, or the school's current one
pub(crate) async fn academic_year_for(
    state: &AppState,
    actor: &Actor,
    requested: Option<String>,
) -> Result<String, ApiError> {
    let school = load_school(state.store.as_ref(), actor.school_id).await?;
    Ok(resolve_academic_year(&school, requested)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_files_decode() {
        let file = InlineFile {
            content_base64: "JVBERi0xLjQ=".into(),
            mime_type: "application/pdf".into(),
        };
        let upload = file.decode().unwrap();
        assert_eq!(upload.bytes, b"%PDF-1.4");

        let bad = InlineFile {
            content_base64: "not base64!".into(),
            mime_type: "application/pdf".into(),
        };
        assert_eq!(bad.decode().unwrap_err().status_code(), 400);
    }
}
