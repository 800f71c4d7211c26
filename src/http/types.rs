use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;

use crate::application::task_sync::SyncError;

#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        let status = match err {
            SyncError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::Remote(_) => StatusCode::BAD_GATEWAY,
        };
        Self { status, message: err.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response { (self.status, axum::Json(self)).into_response() }
}
