use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::database::store::Page;

/// Wrapper for API responses that adds the `{ success, data }` envelope
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub status_code: StatusCode,
    /// Pagination block emitted next to `data` for list endpoints
    pub meta: Option<Value>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a successful API response with default 200 status
    pub fn success(data: T) -> Self {
        Self {
            data,
            status_code: StatusCode::OK,
            meta: None,
        }
    }

    /// Create a 201 Created response
    pub fn created(data: T) -> Self {
        Self {
            data,
            status_code: StatusCode::CREATED,
            meta: None,
        }
    }
}

impl<T: Serialize> ApiResponse<Vec<T>> {
    pub fn page(page: Page<T>) -> Self {
        Self {
            meta: Some(json!({
                "total": page.total,
                "page": page.page,
                "limit": page.limit,
            })),
            data: page.items,
            status_code: StatusCode::OK,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let data_value = match serde_json::to_value(&self.data) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to serialize response data: {}", e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": true,
                        "message": "Failed to serialize response data",
                        "code": "INTERNAL_SERVER_ERROR"
                    })),
                )
                    .into_response();
            }
        };

        let mut envelope = json!({
            "success": true,
            "data": data_value
        });
        if let Some(meta) = self.meta {
            envelope["meta"] = meta;
        }

        (self.status_code, Json(envelope)).into_response()
    }
}

pub type ApiResult<T> = Result<ApiResponse<T>, crate::error::ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::PageRequest;

    #[test]
    fn pages_carry_meta() {
        let response = ApiResponse::page(Page::slice(vec![1, 2, 3], PageRequest { page: 1, limit: 2 }));
        assert_eq!(response.data, vec![1, 2]);
        let meta = response.meta.unwrap();
        assert_eq!(meta["total"], 3);
        assert_eq!(meta["limit"], 2);
    }
}
