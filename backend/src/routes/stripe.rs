use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::responses::JsonResponse;
use crate::services::billing::BillingEvent;
use crate::state::AppState;

fn received() -> Response {
    Json(json!({ "received": true })).into_response()
}

// POST /api/stripe/webhook
pub async fn webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let sig = match headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
    {
        Some(s) => s,
        None => return JsonResponse::bad_request("Missing Stripe-Signature").into_response(),
    };

    let evt = match app_state.stripe.verify_webhook(&body, sig) {
        Ok(e) => e,
        Err(err) => {
            warn!(?err, "stripe webhook verification failed");
            return JsonResponse::bad_request("Invalid webhook signature").into_response();
        }
    };

    match app_state
        .stripe_event_log_repo
        .has_processed_event(&evt.id)
        .await
    {
        Ok(true) => {
            info!(event_id = %evt.id, event_type = %evt.r#type, "stripe event already processed");
            return received();
        }
        Ok(false) => {}
        Err(err) => {
            error!(?err, event_id = %evt.id, "failed to check stripe event log");
            return JsonResponse::server_error("Failed to process webhook").into_response();
        }
    }

    let event = match BillingEvent::decode(&evt) {
        Ok(event) => event,
        Err(err) => {
            warn!(%err, event_id = %evt.id, event_type = %evt.r#type, "malformed stripe event");
            return JsonResponse::bad_request("Malformed webhook payload").into_response();
        }
    };

    if let Err(err) = app_state.subscriptions.handle_event(event).await {
        // A 5xx makes Stripe redeliver; reconciliation is safe to repeat.
        error!(%err, event_id = %evt.id, event_type = %evt.r#type, "stripe event processing failed");
        return JsonResponse::server_error("Failed to process webhook").into_response();
    }

    if let Err(err) = app_state
        .stripe_event_log_repo
        .record_event(&evt.id, &evt.r#type)
        .await
    {
        warn!(?err, event_id = %evt.id, "failed to record processed stripe event");
    }

    info!(event_id = %evt.id, event_type = %evt.r#type, "stripe event processed");
    received()
}
