use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::models::subscription::{
    CancelSubscriptionRequest, CreateCheckoutRequest, CreateSubscriptionRequest,
    PauseSubscriptionRequest, ResumeSubscriptionRequest, Subscription, SubscriptionQuery,
    UpdateSubscriptionRequest,
};
use crate::routes::auth::AuthSession;
use crate::services::billing::{subscriptions::parse_id, BillingResult};
use crate::state::AppState;

fn subscription_response(status: StatusCode, result: BillingResult<Subscription>) -> Response {
    match result {
        Ok(subscription) => (
            status,
            Json(json!({
                "success": true,
                "subscription": subscription,
            })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

// POST /api/subscriptions
pub async fn create_subscription(
    State(app_state): State<AppState>,
    session: AuthSession,
    Json(payload): Json<CreateSubscriptionRequest>,
) -> Response {
    let result = app_state
        .subscriptions
        .create(&session.identity, payload, session.is_privileged())
        .await;
    subscription_response(StatusCode::CREATED, result)
}

// POST /api/subscriptions/checkout
pub async fn create_checkout_session(
    State(app_state): State<AppState>,
    session: AuthSession,
    Json(payload): Json<CreateCheckoutRequest>,
) -> Response {
    match app_state
        .subscriptions
        .create_checkout_session(&session.identity, payload)
        .await
    {
        Ok(checkout) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "checkout_url": checkout.url,
                "session_id": checkout.id,
            })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

// GET /api/subscriptions
pub async fn list_subscriptions(
    State(app_state): State<AppState>,
    session: AuthSession,
    Query(query): Query<SubscriptionQuery>,
) -> Response {
    match app_state
        .subscriptions
        .find_all(&query, session.is_privileged())
        .await
    {
        Ok(page) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "subscriptions": page.items,
                "total": page.total,
                "page": page.page,
                "page_size": page.page_size,
            })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

// GET /api/subscriptions/me
pub async fn list_my_subscriptions(
    State(app_state): State<AppState>,
    session: AuthSession,
) -> Response {
    match app_state.subscriptions.find_mine(&session.identity).await {
        Ok(subscriptions) => (
            StatusCode::OK,
            Json(json!({ "success": true, "subscriptions": subscriptions })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

// GET /api/subscriptions/me/active
pub async fn get_my_active_subscription(
    State(app_state): State<AppState>,
    session: AuthSession,
) -> Response {
    match app_state
        .subscriptions
        .find_active_mine(&session.identity)
        .await
    {
        Ok(subscription) => (
            StatusCode::OK,
            Json(json!({ "success": true, "subscription": subscription })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

// GET /api/subscriptions/user/{user_id}
pub async fn list_user_subscriptions(
    State(app_state): State<AppState>,
    session: AuthSession,
    Path(user_id): Path<String>,
) -> Response {
    let user_id = match parse_id(&user_id, "user id") {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    match app_state
        .subscriptions
        .find_by_user(user_id, &session.identity, session.is_privileged())
        .await
    {
        Ok(subscriptions) => (
            StatusCode::OK,
            Json(json!({ "success": true, "subscriptions": subscriptions })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

// GET /api/subscriptions/{id}
pub async fn get_subscription(
    State(app_state): State<AppState>,
    session: AuthSession,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id, "subscription id") {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let result = app_state
        .subscriptions
        .find_one(id, &session.identity, session.is_privileged())
        .await;
    subscription_response(StatusCode::OK, result)
}

// PATCH /api/subscriptions/{id}
pub async fn update_subscription(
    State(app_state): State<AppState>,
    session: AuthSession,
    Path(id): Path<String>,
    Json(payload): Json<UpdateSubscriptionRequest>,
) -> Response {
    let id = match parse_id(&id, "subscription id") {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let result = app_state
        .subscriptions
        .update(id, &session.identity, payload, session.is_privileged())
        .await;
    subscription_response(StatusCode::OK, result)
}

// POST /api/subscriptions/{id}/pause
pub async fn pause_subscription(
    State(app_state): State<AppState>,
    session: AuthSession,
    Path(id): Path<String>,
    payload: Option<Json<PauseSubscriptionRequest>>,
) -> Response {
    let id = match parse_id(&id, "subscription id") {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let dto = payload.map(|Json(p)| p).unwrap_or_default();
    let result = app_state
        .subscriptions
        .pause(id, &session.identity, dto, session.is_privileged())
        .await;
    subscription_response(StatusCode::OK, result)
}

// POST /api/subscriptions/{id}/resume
pub async fn resume_subscription(
    State(app_state): State<AppState>,
    session: AuthSession,
    Path(id): Path<String>,
    payload: Option<Json<ResumeSubscriptionRequest>>,
) -> Response {
    let id = match parse_id(&id, "subscription id") {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let dto = payload.map(|Json(p)| p).unwrap_or_default();
    let result = app_state
        .subscriptions
        .resume(id, &session.identity, dto, session.is_privileged())
        .await;
    subscription_response(StatusCode::OK, result)
}

// POST /api/subscriptions/{id}/cancel
pub async fn cancel_subscription(
    State(app_state): State<AppState>,
    session: AuthSession,
    Path(id): Path<String>,
    payload: Option<Json<CancelSubscriptionRequest>>,
) -> Response {
    let id = match parse_id(&id, "subscription id") {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let dto = payload.map(|Json(p)| p).unwrap_or_default();
    let result = app_state
        .subscriptions
        .cancel(id, &session.identity, dto, session.is_privileged())
        .await;
    subscription_response(StatusCode::OK, result)
}

// DELETE /api/subscriptions/{id}
pub async fn delete_subscription(
    State(app_state): State<AppState>,
    session: AuthSession,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id, "subscription id") {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    match app_state
        .subscriptions
        .remove(id, &session.identity, session.is_privileged())
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}
