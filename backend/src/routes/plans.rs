use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::state::AppState;

// GET /api/plans
pub async fn list_plans(State(app_state): State<AppState>) -> Response {
    match app_state.plans.list_active().await {
        Ok(plans) => (
            StatusCode::OK,
            Json(json!({ "success": true, "plans": plans })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
