use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::services::stripe::{StripeCheckoutSession, StripeEvent, StripeSubscription};

use super::error::{BillingError, BillingResult};
use super::subscriptions::SubscriptionManager;

/// The closed set of webhook events the billing core reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    SubscriptionChanged(StripeSubscription),
    CheckoutCompleted(StripeCheckoutSession),
    Ignored,
}

fn data_object<T: DeserializeOwned>(event: &StripeEvent) -> BillingResult<T> {
    let object = event
        .payload
        .get("data")
        .and_then(|d| d.get("object"))
        .cloned()
        .unwrap_or(Value::Null);
    serde_json::from_value(object).map_err(|err| {
        BillingError::Validation(format!(
            "malformed {} payload in event {}: {err}",
            event.r#type, event.id
        ))
    })
}

impl BillingEvent {
    pub fn decode(event: &StripeEvent) -> BillingResult<Self> {
        match event.r#type.as_str() {
            "customer.subscription.created"
            | "customer.subscription.updated"
            | "customer.subscription.deleted"
            | "customer.subscription.paused"
            | "customer.subscription.resumed" => {
                Ok(BillingEvent::SubscriptionChanged(data_object(event)?))
            }
            "checkout.session.completed"
            | "checkout.session.async_payment_succeeded"
            | "checkout.session.async_payment_failed" => {
                Ok(BillingEvent::CheckoutCompleted(data_object(event)?))
            }
            _ => Ok(BillingEvent::Ignored),
        }
    }
}

impl SubscriptionManager {
    pub async fn handle_event(&self, event: BillingEvent) -> BillingResult<()> {
        match event {
            BillingEvent::SubscriptionChanged(remote) => {
                self.sync_from_stripe(&remote, None).await?;
            }
            BillingEvent::CheckoutCompleted(session) => {
                if let Some(sub) = self.handle_checkout_completion(&session).await? {
                    info!(
                        session_id = %session.id,
                        subscription_id = %sub.id,
                        "checkout completion reconciled"
                    );
                }
            }
            BillingEvent::Ignored => debug!("ignoring unhandled stripe event"),
        }
        Ok(())
    }
}
