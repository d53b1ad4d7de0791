use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::AttemptError;
use crate::middlewares::auth::JwtClaims;
use crate::services::AppState;

type ApiError = (StatusCode, Json<Value>);

fn api_error(e: AttemptError) -> ApiError {
    let status = match &e {
        AttemptError::AttemptNotFound(_) | AttemptError::AssessmentNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        AttemptError::NotAttemptOwner { .. } => StatusCode::FORBIDDEN,
        AttemptError::AlreadyCompleted(_) => StatusCode::CONFLICT,
        AttemptError::Grading { .. }
        | AttemptError::UnknownReviewPolicy(_)
        | AttemptError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %e, "Attempt request failed");
    } else {
        tracing::warn!(error = %e, "Attempt request rejected");
    }
    (
        status,
        Json(json!({ "error": e.code(), "message": e.to_string() })),
    )
}

pub async fn end_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Ending attempt {} for user {}", attempt_id, claims.sub);

    let response = state
        .engine
        .end_attempt(&attempt_id, &claims.sub)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::OK, Json(response)))
}

pub async fn get_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let attempt = state
        .engine
        .attempt_for_user(&attempt_id, &claims.sub)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::OK, Json(attempt)))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Lists preview attempts instead of real ones.
    #[serde(default)]
    pub preview: bool,
}

pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((draft_id, assessment_id)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let history = state
        .engine
        .history(&claims.sub, &draft_id, &assessment_id, query.preview)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::OK, Json(history)))
}
