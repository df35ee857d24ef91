use crate::errors::{ApiError, ServiceError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// `{success: true, <key>: data}`
pub fn envelope<T: Serialize>(key: &str, data: T) -> Result<Response, ApiError> {
    let value = serde_json::to_value(data).map_err(ServiceError::from)?;
    let mut body = serde_json::Map::new();
    body.insert("success".into(), Value::Bool(true));
    body.insert(key.into(), value);
    Ok(success_response(Value::Object(body)))
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::ValidationError(format!("Validation failed: {}", e)))
}

/// Map service errors to API errors
pub fn map_service_error(err: ServiceError) -> ApiError {
    ApiError::ServiceError(err)
}

/// Pagination parameters for list operations
#[derive(Debug, Default, Deserialize, Serialize, IntoParams)]
pub struct PaginationParams {
    /// 1-based page number
    pub page: Option<u64>,
    /// Page size, clamped to the configured maximum
    pub limit: Option<u64>,
    /// Status filter (admin listing only)
    pub status: Option<String>,
}

impl PaginationParams {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }
}

/// Standard pagination response metadata
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaginationMeta {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
}

impl PaginationMeta {
    pub fn new(page: u64, limit: u64, total: u64) -> Self {
        let total_pages = if total == 0 || limit == 0 {
            0
        } else {
            total.div_ceil(limit)
        };
        Self {
            page,
            limit,
            total,
            total_pages,
        }
    }
}

pub fn paginated<T: Serialize>(
    key: &str,
    items: T,
    meta: PaginationMeta,
) -> Result<Response, ApiError> {
    let mut body = serde_json::Map::new();
    body.insert("success".into(), Value::Bool(true));
    body.insert(key.into(), serde_json::to_value(items).map_err(ServiceError::from)?);
    body.insert(
        "pagination".into(),
        json!({
            "page": meta.page,
            "limit": meta.limit,
            "total": meta.total,
            "total_pages": meta.total_pages,
        }),
    );
    Ok(success_response(Value::Object(body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 20, 0)]
    #[case(1, 20, 1)]
    #[case(20, 20, 1)]
    #[case(21, 20, 2)]
    fn total_pages_round_up(#[case] total: u64, #[case] limit: u64, #[case] pages: u64) {
        assert_eq!(PaginationMeta::new(1, limit, total).total_pages, pages);
    }

    #[test]
    fn page_defaults_to_first() {
        assert_eq!(PaginationParams::default().page(), 1);
        let zero = PaginationParams {
            page: Some(0),
            ..Default::default()
        };
        assert_eq!(zero.page(), 1);
    }
}
