use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::scheduling::{
    availability::SlotError, intake::FieldErrors, status::TransitionError,
};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    Validation(FieldErrors),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    PayloadTooLarge(String),
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Username or password is incorrect".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    pub fn appointment_not_found() -> Self {
        ApiError::NotFound("NOT_FOUND", "appointment not found".into())
    }

    pub fn slot_taken() -> Self {
        ApiError::Conflict(
            "SLOT_TAKEN",
            "This time was just booked by someone else; pick another slot".into(),
        )
    }

    /// Logs the database error and hides its text from the client.
    pub fn db(e: sqlx::Error) -> Self {
        tracing::error!(error = %e, "database error");
        ApiError::Internal("db error".into())
    }

    fn to_error_response(
        code: &str,
        message: &str,
        fields: Option<BTreeMap<String, String>>,
    ) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
                fields,
            },
        })
    }
}

impl From<TransitionError> for ApiError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::Closed(_) => ApiError::Conflict("APPOINTMENT_CLOSED", e.to_string()),
            TransitionError::NotAllowed { .. } => {
                ApiError::Conflict("INVALID_TRANSITION", e.to_string())
            }
            TransitionError::UseReschedule => ApiError::BadRequest("VALIDATION_ERROR", e.to_string()),
        }
    }
}

impl ApiError {
    /// Maps a slot check failure onto the request's own field names. A slot the
    /// pre-check finds booked is a field error; only a write that loses the race
    /// on the unique index becomes `SLOT_TAKEN`.
    pub fn from_slot(e: SlotError, date_field: &'static str, time_field: &'static str) -> Self {
        let field = match e {
            SlotError::DateInPast => date_field,
            SlotError::Booked(_) | SlotError::InPast => time_field,
            SlotError::BadInterval(_) => {
                return ApiError::BadRequest("VALIDATION_ERROR", e.to_string());
            }
        };
        let mut fields = FieldErrors::default();
        fields.insert(field, e.to_string());
        ApiError::Validation(fields)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(code, msg) => (
                StatusCode::UNAUTHORIZED,
                ApiError::to_error_response(code, &msg, None),
            )
                .into_response(),
            ApiError::Forbidden(code, msg) => (
                StatusCode::FORBIDDEN,
                ApiError::to_error_response(code, &msg, None),
            )
                .into_response(),
            ApiError::BadRequest(code, msg) => (
                StatusCode::BAD_REQUEST,
                ApiError::to_error_response(code, &msg, None),
            )
                .into_response(),
            ApiError::Validation(fields) => (
                StatusCode::BAD_REQUEST,
                ApiError::to_error_response(
                    "VALIDATION_ERROR",
                    "Some fields are missing or invalid",
                    Some(fields.into_map()),
                ),
            )
                .into_response(),
            ApiError::NotFound(code, msg) => (
                StatusCode::NOT_FOUND,
                ApiError::to_error_response(code, &msg, None),
            )
                .into_response(),
            ApiError::Conflict(code, msg) => (
                StatusCode::CONFLICT,
                ApiError::to_error_response(code, &msg, None),
            )
                .into_response(),
            ApiError::PayloadTooLarge(msg) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                ApiError::to_error_response("PAYLOAD_TOO_LARGE", &msg, None),
            )
                .into_response(),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::to_error_response("INTERNAL", &msg, None),
            )
                .into_response(),
        }
    }
}
