// HTTP mapping for tracker errors
use crate::application::error::TrackerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

impl TrackerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            TrackerError::UnauthenticatedConnection(_) => StatusCode::UNAUTHORIZED,
            TrackerError::Forbidden(_) | TrackerError::UnauthorizedFix(_) => StatusCode::FORBIDDEN,
            TrackerError::UnknownVehicle(_) => StatusCode::NOT_FOUND,
            TrackerError::MalformedFix(_) => StatusCode::BAD_REQUEST,
            TrackerError::PersistenceUnavailable(_) | TrackerError::RegistryLoadFailure(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for TrackerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
