use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::plan::Plan;
use crate::models::subscription::{Subscription, SubscriptionStatus};
use crate::services::stripe::{Expandable, StripeCheckoutSession, StripeSubscription};

use super::error::BillingResult;
use super::subscriptions::SubscriptionManager;

fn timestamp(secs: Option<i64>) -> Option<OffsetDateTime> {
    secs.and_then(|s| OffsetDateTime::from_unix_timestamp(s).ok())
}

fn parse_user_hint(raw: Option<&str>) -> Option<Uuid> {
    raw.and_then(|s| Uuid::parse_str(s.trim()).ok())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `custom` keeps what we own and overlays `extra`; `stripe` is always the raw
/// Stripe metadata, replaced wholesale.
fn merge_metadata(
    previous: Option<&Subscription>,
    remote: &StripeSubscription,
    extra: Option<&Map<String, Value>>,
) -> Value {
    let mut custom = previous.map(|s| s.custom_metadata()).unwrap_or_default();
    if let Some(extra) = extra {
        for (k, v) in extra {
            custom.insert(k.clone(), v.clone());
        }
    }
    let stripe: Map<String, Value> = remote
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    let mut root = Map::new();
    root.insert("custom".to_string(), Value::Object(custom));
    root.insert("stripe".to_string(), Value::Object(stripe));
    Value::Object(root)
}

fn plan_label(
    plan: Option<&Plan>,
    remote: &StripeSubscription,
    previous: Option<&Subscription>,
) -> String {
    let price = remote.first_price();
    plan.map(|p| p.name.clone())
        .or_else(|| non_empty(remote.metadata.get("plan_name").map(String::as_str)))
        .or_else(|| {
            price
                .and_then(|p| p.product.as_ref())
                .and_then(|prod| prod.as_object())
                .and_then(|prod| non_empty(prod.name.as_deref()))
        })
        .or_else(|| price.and_then(|p| non_empty(p.nickname.as_deref())))
        .or_else(|| previous.map(|s| s.plan.clone()))
        .or_else(|| price.map(|p| p.id.clone()))
        .unwrap_or_else(|| "unknown".to_string())
}

impl SubscriptionManager {
    /// Writes the local record for a Stripe subscription snapshot. Re-applying the
    /// same snapshot yields the same row apart from `last_synced_at`.
    ///
    /// Returns `Ok(None)` when the snapshot cannot be attributed to any user.
    pub async fn sync_from_stripe(
        &self,
        remote: &StripeSubscription,
        extra: Option<&Map<String, Value>>,
    ) -> BillingResult<Option<Subscription>> {
        let existing = self
            .subscriptions
            .find_by_stripe_subscription_id(&remote.id)
            .await?;

        let Some(user_id) = self.resolve_owner(existing.as_ref(), remote).await? else {
            warn!(
                stripe_subscription_id = %remote.id,
                customer_id = remote.customer_id().unwrap_or_default(),
                "cannot attribute stripe subscription to a user; dropping"
            );
            return Ok(None);
        };

        let plan = self.resolve_plan(remote).await?;
        let status = SubscriptionStatus::from_stripe(&remote.status, remote.collection_paused());
        let invoice_url = self.resolve_invoice_url(remote, existing.as_ref()).await;
        let metadata = merge_metadata(existing.as_ref(), remote, extra);

        let now = OffsetDateTime::now_utc();
        let (period_start, period_end) = remote.period_bounds();
        let canceled = status == SubscriptionStatus::Canceled;
        let mut canceled_at = timestamp(remote.canceled_at);
        if canceled && canceled_at.is_none() {
            canceled_at = timestamp(remote.ended_at.or(remote.cancel_at));
        }
        let mut ended_at = timestamp(remote.ended_at);
        if canceled && ended_at.is_none() {
            ended_at = canceled_at;
        }

        let label = plan_label(plan.as_ref(), remote, existing.as_ref());
        let plan_id = plan.as_ref().map(|p| p.id).or_else(|| {
            remote
                .metadata
                .get("plan_id")
                .and_then(|raw| Uuid::parse_str(raw).ok())
        });

        let mut row = existing
            .clone()
            .unwrap_or_else(|| Subscription::new_local(user_id, &label, now));
        row.plan = label;
        row.plan_id = plan_id;
        row.stripe_subscription_id = Some(remote.id.clone());
        row.stripe_customer_id = remote.customer_id().map(str::to_string);
        row.status = status;
        row.started_at = timestamp(remote.start_date).or(row.started_at);
        row.current_period_start = timestamp(period_start);
        row.current_period_end = timestamp(period_end);
        row.ended_at = ended_at;
        row.cancel_at = timestamp(remote.cancel_at);
        row.canceled_at = canceled_at;
        row.latest_invoice_url = invoice_url;
        row.metadata = metadata;
        row.last_synced_at = Some(now);

        let saved = match existing {
            Some(_) => self.subscriptions.update(&row).await?,
            None => self.subscriptions.upsert_by_stripe_id(&row).await?,
        };

        info!(
            subscription_id = %saved.id,
            stripe_subscription_id = %remote.id,
            user_id = %saved.user_id,
            status = %saved.status,
            "synced subscription from stripe"
        );
        Ok(Some(saved))
    }

    /// Reconciles the subscription created by a finished hosted checkout.
    pub async fn handle_checkout_completion(
        &self,
        session: &StripeCheckoutSession,
    ) -> BillingResult<Option<Subscription>> {
        if session.mode.as_deref() != Some("subscription") {
            debug!(session_id = %session.id, mode = ?session.mode, "ignoring non-subscription checkout");
            return Ok(None);
        }
        let Some(stripe_subscription_id) = session.subscription.as_ref().map(|s| s.id()) else {
            warn!(session_id = %session.id, "subscription checkout completed without a subscription");
            return Ok(None);
        };

        let user_hint = parse_user_hint(session.metadata.get("user_id").map(String::as_str))
            .or_else(|| parse_user_hint(session.client_reference_id.as_deref()));
        if let (Some(user_id), Some(customer)) = (user_hint, session.customer.as_ref()) {
            self.customers.link_customer(user_id, customer.id()).await?;
        }

        let remote = self
            .stripe
            .retrieve_subscription(stripe_subscription_id)
            .await?;
        let extra: Map<String, Value> = session
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        self.sync_from_stripe(&remote, Some(&extra)).await
    }

    async fn resolve_owner(
        &self,
        existing: Option<&Subscription>,
        remote: &StripeSubscription,
    ) -> BillingResult<Option<Uuid>> {
        if let Some(existing) = existing {
            return Ok(Some(existing.user_id));
        }
        if let Some(customer_id) = remote.customer_id() {
            if let Some(user_id) = self
                .customers
                .find_user_id_by_stripe_customer_id(customer_id)
                .await?
            {
                return Ok(Some(user_id));
            }
        }
        Ok(parse_user_hint(
            remote.metadata.get("user_id").map(String::as_str),
        ))
    }

    async fn resolve_plan(&self, remote: &StripeSubscription) -> BillingResult<Option<Plan>> {
        let Some(price) = remote.first_price() else {
            return Ok(None);
        };
        if let Some(plan) = self.plans.find_by_stripe_price(&price.id).await? {
            return Ok(Some(plan));
        }
        match price.product.as_ref() {
            Some(product) => self.plans.find_by_stripe_product(product.id()).await,
            None => Ok(None),
        }
    }

    /// Failure to fetch a referenced invoice keeps whatever URL was stored before.
    async fn resolve_invoice_url(
        &self,
        remote: &StripeSubscription,
        existing: Option<&Subscription>,
    ) -> Option<String> {
        let previous = existing.and_then(|s| s.latest_invoice_url.clone());
        match remote.latest_invoice.as_ref() {
            Some(Expandable::Object(invoice)) => invoice.best_url().or(previous),
            Some(Expandable::Id(invoice_id)) => {
                match self.stripe.retrieve_invoice(invoice_id).await {
                    Ok(invoice) => invoice.best_url().or(previous),
                    Err(err) => {
                        warn!(
                            %invoice_id,
                            stripe_subscription_id = %remote.id,
                            ?err,
                            "failed to fetch latest invoice; keeping previous url"
                        );
                        previous
                    }
                }
            }
            None => previous,
        }
    }
}
