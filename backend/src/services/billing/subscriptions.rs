use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::subscription_repository::SubscriptionRepository;
use crate::models::identity::VerifiedIdentity;
use crate::models::plan::Plan;
use crate::models::subscription::{
    CancelSubscriptionRequest, CreateCheckoutRequest, CreateSubscriptionRequest,
    PauseSubscriptionRequest, ResumeSubscriptionRequest, Subscription, SubscriptionBacking,
    SubscriptionPage, SubscriptionQuery, SubscriptionStatus, UpdateSubscriptionRequest,
};
use crate::services::stripe::{
    CheckoutLineItem, CheckoutMode, CheckoutSession, CreateCheckoutSessionRequest,
    CreateSubscriptionParams, PauseCollection, StripeService, StripeSubscription,
    SubscriptionUpdate,
};

use super::customers::{stringify_metadata, CustomerManager};
use super::error::{BillingError, BillingResult};
use super::plans::PlanCatalog;

const DELETED_VIA_API: &str = "deleted via API";

/// Parses a path or body identifier, reporting malformed input as a validation error.
pub fn parse_id(raw: &str, what: &str) -> BillingResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| BillingError::Validation(format!("invalid {what}")))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// A plan reference resolved to something Stripe can bill.
struct BillablePrice {
    price_id: String,
    plan: Option<Plan>,
}

/// Owns every write to the subscriptions table. Each operation takes the caller
/// and whether they are privileged explicitly.
#[derive(Clone)]
pub struct SubscriptionManager {
    pub(super) subscriptions: Arc<dyn SubscriptionRepository>,
    pub(super) plans: PlanCatalog,
    pub(super) customers: CustomerManager,
    pub(super) stripe: Arc<dyn StripeService>,
}

impl SubscriptionManager {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        plans: PlanCatalog,
        customers: CustomerManager,
        stripe: Arc<dyn StripeService>,
    ) -> Self {
        Self {
            subscriptions,
            plans,
            customers,
            stripe,
        }
    }

    pub fn plans(&self) -> &PlanCatalog {
        &self.plans
    }

    pub async fn create(
        &self,
        requester: &VerifiedIdentity,
        req: CreateSubscriptionRequest,
        is_privileged: bool,
    ) -> BillingResult<Subscription> {
        let target = match non_empty(req.user_id.as_deref()) {
            Some(raw) => parse_id(raw, "user id")?,
            None => requester.user_id,
        };
        if target != requester.user_id && !is_privileged {
            return Err(BillingError::Forbidden(
                "Cannot create a subscription for another user".into(),
            ));
        }

        self.ensure_no_current(target).await?;

        let label = non_empty(req.plan.as_deref()).map(str::to_string);
        let Some(billable) = self
            .resolve_price(req.plan_id.as_deref(), req.stripe_price_id.as_deref())
            .await?
        else {
            return match label {
                Some(label) if is_privileged => {
                    self.create_local(target, &label, req.metadata.as_ref()).await
                }
                _ => Err(BillingError::Validation("plan required".into())),
            };
        };

        let (email, name) = if target == requester.user_id {
            (requester.email.as_deref(), requester.name.as_deref())
        } else {
            (None, None)
        };
        let customer = self
            .customers
            .ensure_customer(target, email, name, None)
            .await?;

        let plan_name = billable
            .plan
            .as_ref()
            .map(|p| p.name.clone())
            .or(label);
        let metadata = subscription_tags(
            target,
            billable.plan.as_ref(),
            plan_name.as_deref(),
            req.metadata.as_ref(),
        );

        let remote = self
            .stripe
            .create_subscription(CreateSubscriptionParams {
                customer_id: customer.stripe_customer_id.clone(),
                price_id: billable.price_id.clone(),
                trial_period_days: req.trial_period_days,
                metadata,
            })
            .await?;

        let created = self
            .sync_from_stripe(&remote, req.metadata.as_ref())
            .await?
            .ok_or_else(|| {
                BillingError::Internal(format!(
                    "stripe subscription {} was not materialized locally",
                    remote.id
                ))
            })?;

        info!(
            subscription_id = %created.id,
            user_id = %target,
            stripe_subscription_id = %remote.id,
            status = %created.status,
            "created subscription"
        );
        Ok(created)
    }

    /// Starts a hosted checkout for the caller instead of creating the
    /// subscription server-side. The subscription is materialized when the
    /// checkout completion webhook arrives.
    pub async fn create_checkout_session(
        &self,
        requester: &VerifiedIdentity,
        req: CreateCheckoutRequest,
    ) -> BillingResult<CheckoutSession> {
        let success_url = non_empty(Some(req.success_url.as_str()))
            .ok_or_else(|| BillingError::Validation("success_url is required".into()))?
            .to_string();
        let cancel_url = non_empty(Some(req.cancel_url.as_str()))
            .ok_or_else(|| BillingError::Validation("cancel_url is required".into()))?
            .to_string();

        self.ensure_no_current(requester.user_id).await?;

        let billable = self
            .resolve_price(req.plan_id.as_deref(), req.stripe_price_id.as_deref())
            .await?
            .ok_or_else(|| BillingError::Validation("plan required".into()))?;

        let customer = self
            .customers
            .ensure_customer(
                requester.user_id,
                requester.email.as_deref(),
                requester.name.as_deref(),
                None,
            )
            .await?;

        let plan_name = billable.plan.as_ref().map(|p| p.name.as_str());
        let metadata: BTreeMap<String, String> = subscription_tags(
            requester.user_id,
            billable.plan.as_ref(),
            plan_name,
            req.metadata.as_ref(),
        )
        .into_iter()
        .collect();

        let session = self
            .stripe
            .create_checkout_session(CreateCheckoutSessionRequest {
                success_url,
                cancel_url,
                mode: CheckoutMode::Subscription,
                line_items: vec![CheckoutLineItem {
                    price: billable.price_id,
                    quantity: 1,
                }],
                client_reference_id: Some(requester.user_id.to_string()),
                customer: Some(customer.stripe_customer_id),
                metadata: Some(metadata),
            })
            .await?;

        info!(user_id = %requester.user_id, session_id = %session.id, "created checkout session");
        Ok(session)
    }

    pub async fn find_one(
        &self,
        id: Uuid,
        requester: &VerifiedIdentity,
        is_privileged: bool,
    ) -> BillingResult<Subscription> {
        self.load_for(id, requester, is_privileged).await
    }

    pub async fn find_mine(&self, requester: &VerifiedIdentity) -> BillingResult<Vec<Subscription>> {
        Ok(self.subscriptions.list_for_user(requester.user_id).await?)
    }

    pub async fn find_active_mine(
        &self,
        requester: &VerifiedIdentity,
    ) -> BillingResult<Option<Subscription>> {
        Ok(self
            .subscriptions
            .find_current_for_user(requester.user_id)
            .await?)
    }

    pub async fn find_by_user(
        &self,
        user_id: Uuid,
        requester: &VerifiedIdentity,
        is_privileged: bool,
    ) -> BillingResult<Vec<Subscription>> {
        if user_id != requester.user_id && !is_privileged {
            return Err(BillingError::Forbidden(
                "Cannot view another user's subscriptions".into(),
            ));
        }
        Ok(self.subscriptions.list_for_user(user_id).await?)
    }

    pub async fn find_all(
        &self,
        query: &SubscriptionQuery,
        is_privileged: bool,
    ) -> BillingResult<SubscriptionPage> {
        if !is_privileged {
            return Err(BillingError::Forbidden(
                "Only administrators can list all subscriptions".into(),
            ));
        }
        if let (Some(from), Some(to)) = (query.started_from, query.started_to) {
            if from > to {
                return Err(BillingError::Validation(
                    "started_from must not be after started_to".into(),
                ));
            }
        }
        Ok(self.subscriptions.search(query).await?)
    }

    pub async fn update(
        &self,
        id: Uuid,
        requester: &VerifiedIdentity,
        patch: UpdateSubscriptionRequest,
        is_privileged: bool,
    ) -> BillingResult<Subscription> {
        let current = self.load_for(id, requester, is_privileged).await?;

        let mut row = match current.backing() {
            SubscriptionBacking::Stripe(stripe_id) => {
                if let Some(status) = patch.status {
                    debug!(
                        subscription_id = %id,
                        requested = %status,
                        "ignoring status change on stripe-backed subscription"
                    );
                }
                self.push_stripe_update(&current, stripe_id, &patch).await?
            }
            SubscriptionBacking::Local => {
                let changes_grant = patch.status.is_some()
                    || non_empty(patch.plan_id.as_deref()).is_some()
                    || non_empty(patch.stripe_price_id.as_deref()).is_some()
                    || non_empty(patch.plan.as_deref()).is_some();
                if changes_grant && !is_privileged {
                    return Err(BillingError::Forbidden(
                        "Only administrators can change the status or plan of a local subscription"
                            .into(),
                    ));
                }
                let mut row = current.clone();
                if let Some(status) = patch.status {
                    if status.is_current() && !current.status.is_current() {
                        self.ensure_no_current(current.user_id).await?;
                    }
                    row.status = status;
                }
                if let Some(billable) = self
                    .resolve_local_plan(patch.plan_id.as_deref(), patch.stripe_price_id.as_deref())
                    .await?
                {
                    row.plan_id = Some(billable.id);
                    row.plan = billable.name;
                }
                if let Some(label) = non_empty(patch.plan.as_deref()) {
                    row.plan = label.to_string();
                }
                if let Some(extra) = patch.metadata.as_ref() {
                    let mut custom = row.custom_metadata();
                    custom.extend(extra.clone());
                    row.set_custom_metadata(custom);
                }
                row
            }
        };

        if patch.started_at.is_some() {
            row.started_at = patch.started_at;
        }
        if patch.ended_at.is_some() {
            row.ended_at = patch.ended_at;
        }
        if patch.pause_reason.is_some() {
            row.pause_reason = patch.pause_reason;
        }
        if patch.cancel_reason.is_some() {
            row.cancel_reason = patch.cancel_reason;
        }
        if patch.latest_invoice_url.is_some() {
            row.latest_invoice_url = patch.latest_invoice_url;
        }
        row.user_id = current.user_id;

        let saved = self.subscriptions.update(&row).await?;
        info!(subscription_id = %saved.id, "updated subscription");
        Ok(saved)
    }

    pub async fn pause(
        &self,
        id: Uuid,
        requester: &VerifiedIdentity,
        dto: PauseSubscriptionRequest,
        is_privileged: bool,
    ) -> BillingResult<Subscription> {
        let current = self.load_for(id, requester, is_privileged).await?;
        if !current.status.is_active_like() {
            return Err(BillingError::BusinessRule(
                "only active subscriptions can be paused".into(),
            ));
        }
        let reason = non_empty(dto.reason.as_deref()).map(str::to_string);
        let now = OffsetDateTime::now_utc();

        let mut row = match current.backing() {
            SubscriptionBacking::Stripe(stripe_id) => {
                let metadata = reason
                    .as_ref()
                    .map(|r| HashMap::from([("pause_reason".to_string(), r.clone())]));
                let remote = self
                    .stripe
                    .update_subscription(
                        stripe_id,
                        SubscriptionUpdate {
                            pause_collection: Some(PauseCollection::Void),
                            metadata,
                            ..Default::default()
                        },
                    )
                    .await?;
                let extra = reason_extra("pause_reason", reason.as_deref());
                self.require_synced(&extra, &remote).await?
            }
            SubscriptionBacking::Local => {
                let mut row = current.clone();
                row.status = SubscriptionStatus::Paused;
                row.ended_at = Some(now);
                row
            }
        };

        if reason.is_some() {
            row.pause_reason = reason;
        }
        row.last_synced_at = Some(now);
        let saved = self.subscriptions.update(&row).await?;
        info!(subscription_id = %saved.id, status = %saved.status, "paused subscription");
        Ok(saved)
    }

    pub async fn resume(
        &self,
        id: Uuid,
        requester: &VerifiedIdentity,
        dto: ResumeSubscriptionRequest,
        is_privileged: bool,
    ) -> BillingResult<Subscription> {
        let current = self.load_for(id, requester, is_privileged).await?;
        if current.status != SubscriptionStatus::Paused {
            return Err(BillingError::BusinessRule(
                "only paused subscriptions can be resumed".into(),
            ));
        }
        let now = OffsetDateTime::now_utc();

        let mut row = match current.backing() {
            SubscriptionBacking::Stripe(stripe_id) => {
                let remote = self
                    .stripe
                    .update_subscription(
                        stripe_id,
                        SubscriptionUpdate {
                            pause_collection: Some(PauseCollection::Clear),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.require_synced(&Map::new(), &remote).await?
            }
            SubscriptionBacking::Local => {
                let mut row = current.clone();
                row.status = SubscriptionStatus::Active;
                row.ended_at = None;
                row.started_at.get_or_insert(now);
                row
            }
        };

        if let Some(label) = non_empty(dto.plan.as_deref()) {
            row.plan = label.to_string();
        }
        if dto.latest_invoice_url.is_some() {
            row.latest_invoice_url = dto.latest_invoice_url;
        }
        row.last_synced_at = Some(now);
        let saved = self.subscriptions.update(&row).await?;
        info!(subscription_id = %saved.id, status = %saved.status, "resumed subscription");
        Ok(saved)
    }

    pub async fn cancel(
        &self,
        id: Uuid,
        requester: &VerifiedIdentity,
        dto: CancelSubscriptionRequest,
        is_privileged: bool,
    ) -> BillingResult<Subscription> {
        let current = self.load_for(id, requester, is_privileged).await?;
        self.apply_cancel(
            current,
            non_empty(dto.reason.as_deref()).map(str::to_string),
            dto.latest_invoice_url,
        )
        .await
    }

    /// Hard-deletes the local row only. For a Stripe-backed record the later
    /// `customer.subscription.deleted` event re-materializes it as canceled.
    pub async fn remove(
        &self,
        id: Uuid,
        requester: &VerifiedIdentity,
        is_privileged: bool,
    ) -> BillingResult<()> {
        let current = self.load_for(id, requester, is_privileged).await?;
        let terminal = matches!(
            current.status,
            SubscriptionStatus::Canceled | SubscriptionStatus::Expired
        );
        if !is_privileged && !terminal {
            return Err(BillingError::BusinessRule(
                "only canceled or expired subscriptions can be deleted".into(),
            ));
        }

        if matches!(current.backing(), SubscriptionBacking::Stripe(_))
            && current.status != SubscriptionStatus::Canceled
        {
            self.apply_cancel(current, Some(DELETED_VIA_API.to_string()), None)
                .await?;
        }

        if !self.subscriptions.delete(id).await? {
            return Err(BillingError::NotFound("Subscription not found".into()));
        }
        info!(subscription_id = %id, user_id = %requester.user_id, "deleted subscription");
        Ok(())
    }

    async fn apply_cancel(
        &self,
        current: Subscription,
        reason: Option<String>,
        invoice_url: Option<String>,
    ) -> BillingResult<Subscription> {
        if current.status == SubscriptionStatus::Canceled {
            return Err(BillingError::BusinessRule(
                "subscription is already canceled".into(),
            ));
        }
        let now = OffsetDateTime::now_utc();

        let mut row = match current.backing() {
            SubscriptionBacking::Stripe(stripe_id) => {
                let remote = self.stripe.cancel_subscription(stripe_id).await?;
                let extra = reason_extra("cancel_reason", reason.as_deref());
                self.require_synced(&extra, &remote).await?
            }
            SubscriptionBacking::Local => {
                let mut row = current.clone();
                row.status = SubscriptionStatus::Canceled;
                row.ended_at = Some(now);
                row.canceled_at = Some(now);
                row
            }
        };

        if reason.is_some() {
            row.cancel_reason = reason;
        }
        if invoice_url.is_some() {
            row.latest_invoice_url = invoice_url;
        }
        row.last_synced_at = Some(now);
        let saved = self.subscriptions.update(&row).await?;
        info!(subscription_id = %saved.id, "canceled subscription");
        Ok(saved)
    }

    async fn push_stripe_update(
        &self,
        current: &Subscription,
        stripe_id: &str,
        patch: &UpdateSubscriptionRequest,
    ) -> BillingResult<Subscription> {
        let remote = self.stripe.retrieve_subscription(stripe_id).await?;
        let mut update = SubscriptionUpdate::default();
        let mut tags = HashMap::new();

        if let Some(billable) = self
            .resolve_price(patch.plan_id.as_deref(), patch.stripe_price_id.as_deref())
            .await?
        {
            let item = remote.first_item().ok_or_else(|| {
                BillingError::BusinessRule("subscription has no line item to change".into())
            })?;
            let current_price = item.price.as_ref().map(|p| p.id.as_str());
            if current_price != Some(billable.price_id.as_str()) {
                update.swap_price = Some((item.id.clone(), billable.price_id.clone()));
                if let Some(plan) = billable.plan.as_ref() {
                    tags.insert("plan_id".to_string(), plan.id.to_string());
                    tags.insert("plan_name".to_string(), plan.name.clone());
                }
            }
        }

        if let Some(extra) = patch.metadata.as_ref() {
            tags.extend(stringify_metadata(extra));
        }
        tags.retain(|k, v| remote.metadata.get(k) != Some(&*v));
        if !tags.is_empty() {
            update.metadata = Some(tags);
        }

        let snapshot = if update.is_empty() {
            debug!(subscription_id = %current.id, "no stripe change needed; refreshing local copy");
            remote
        } else {
            self.stripe.update_subscription(stripe_id, update).await?
        };

        let extra = patch.metadata.clone().unwrap_or_default();
        self.require_synced(&extra, &snapshot).await
    }

    async fn require_synced(
        &self,
        extra: &Map<String, Value>,
        remote: &StripeSubscription,
    ) -> BillingResult<Subscription> {
        let extra = (!extra.is_empty()).then_some(extra);
        self.sync_from_stripe(remote, extra).await?.ok_or_else(|| {
            BillingError::Internal(format!(
                "stripe subscription {} could not be reconciled",
                remote.id
            ))
        })
    }

    async fn load_for(
        &self,
        id: Uuid,
        requester: &VerifiedIdentity,
        is_privileged: bool,
    ) -> BillingResult<Subscription> {
        let sub = self
            .subscriptions
            .find_by_id(id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Subscription not found".into()))?;
        if sub.user_id != requester.user_id && !is_privileged {
            warn!(
                subscription_id = %id,
                owner = %sub.user_id,
                requester = %requester.user_id,
                "subscription access denied"
            );
            return Err(BillingError::Forbidden(
                "You do not have access to this subscription".into(),
            ));
        }
        Ok(sub)
    }

    async fn ensure_no_current(&self, user_id: Uuid) -> BillingResult<()> {
        if let Some(existing) = self.subscriptions.find_current_for_user(user_id).await? {
            info!(
                %user_id,
                subscription_id = %existing.id,
                status = %existing.status,
                "rejecting second subscription"
            );
            return Err(BillingError::BusinessRule(
                "active subscription already exists".into(),
            ));
        }
        Ok(())
    }

    /// Plan id wins over a raw price id. A raw price id is used as-is and only
    /// best-effort matched against the catalog for its display name.
    async fn resolve_price(
        &self,
        plan_id: Option<&str>,
        price_id: Option<&str>,
    ) -> BillingResult<Option<BillablePrice>> {
        if let Some(raw) = non_empty(plan_id) {
            let plan = self.plans.find_one(parse_id(raw, "plan id")?).await?;
            let price_id = plan.stripe_price_id.clone().ok_or_else(|| {
                BillingError::Validation(format!("plan {} has no billable price", plan.name))
            })?;
            return Ok(Some(BillablePrice {
                price_id,
                plan: Some(plan),
            }));
        }
        if let Some(price_id) = non_empty(price_id) {
            let plan = self.plans.find_by_stripe_price(price_id).await?;
            return Ok(Some(BillablePrice {
                price_id: price_id.to_string(),
                plan,
            }));
        }
        Ok(None)
    }

    async fn resolve_local_plan(
        &self,
        plan_id: Option<&str>,
        price_id: Option<&str>,
    ) -> BillingResult<Option<Plan>> {
        if let Some(raw) = non_empty(plan_id) {
            return Ok(Some(self.plans.find_one(parse_id(raw, "plan id")?).await?));
        }
        match non_empty(price_id) {
            Some(price_id) => self.plans.find_by_stripe_price(price_id).await,
            None => Ok(None),
        }
    }

    async fn create_local(
        &self,
        user_id: Uuid,
        label: &str,
        metadata: Option<&Map<String, Value>>,
    ) -> BillingResult<Subscription> {
        let mut row = Subscription::new_local(user_id, label, OffsetDateTime::now_utc());
        if let Some(metadata) = metadata {
            row.set_custom_metadata(metadata.clone());
        }
        let saved = self.subscriptions.insert(&row).await?;
        info!(subscription_id = %saved.id, %user_id, plan = %saved.plan, "granted local subscription");
        Ok(saved)
    }
}

/// Stripe metadata attached to every subscription we create.
fn subscription_tags(
    user_id: Uuid,
    plan: Option<&Plan>,
    plan_name: Option<&str>,
    extra: Option<&Map<String, Value>>,
) -> HashMap<String, String> {
    let mut tags = extra.map(stringify_metadata).unwrap_or_default();
    tags.insert("user_id".to_string(), user_id.to_string());
    if let Some(plan) = plan {
        tags.insert("plan_id".to_string(), plan.id.to_string());
    }
    if let Some(name) = plan_name {
        tags.insert("plan_name".to_string(), name.to_string());
    }
    tags
}

fn reason_extra(key: &str, value: Option<&str>) -> Map<String, Value> {
    let mut extra = Map::new();
    if let Some(value) = value {
        extra.insert(key.to_string(), Value::String(value.to_string()));
    }
    extra
}
