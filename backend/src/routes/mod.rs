pub mod auth;
pub mod plans;
pub mod stripe;
pub mod subscriptions;


use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;
use subscriptions::{
    cancel_subscription, create_checkout_session, create_subscription, delete_subscription,
    get_my_active_subscription, get_subscription, list_my_subscriptions, list_subscriptions,
    list_user_subscriptions, pause_subscription, resume_subscription, update_subscription,
};

/// Every API route, without the rate-limit, CORS and tracing layers added at start-up.
pub fn api_router(state: AppState) -> Router {
    let subscription_routes = Router::new()
        .route("/", post(create_subscription).get(list_subscriptions))
        .route("/checkout", post(create_checkout_session))
        .route("/me", get(list_my_subscriptions))
        .route("/me/active", get(get_my_active_subscription))
        .route("/user/{user_id}", get(list_user_subscriptions))
        .route(
            "/{id}",
            get(get_subscription)
                .patch(update_subscription)
                .delete(delete_subscription),
        )
        .route("/{id}/pause", post(pause_subscription))
        .route("/{id}/resume", post(resume_subscription))
        .route("/{id}/cancel", post(cancel_subscription));

    Router::new()
        .nest("/api/subscriptions", subscription_routes)
        .route("/api/plans", get(plans::list_plans))
        // Public webhook route (Stripe signature, no bearer auth)
        .route("/api/stripe/webhook", post(stripe::webhook))
        .with_state(state)
}
