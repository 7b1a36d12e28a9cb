// JSON error body for the 400 and 404 answers

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// `{ "error": "<message>" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "Missing id")]
    pub error: String,
}

impl ErrorResponse {
    pub fn reply(status: StatusCode, message: impl Into<String>) -> Response {
        let body = Self {
            error: message.into(),
        };
        (status, Json(body)).into_response()
    }

    pub fn not_found() -> Response {
        Self::reply(StatusCode::NOT_FOUND, "Not found")
    }
}
