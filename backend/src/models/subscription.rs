use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{FromRow, Type};
use time::OffsetDateTime;
use uuid::Uuid;

pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Paused,
    Canceled,
    Expired,
    Incomplete,
    IncompleteExpired,
    Unpaid,
}

impl SubscriptionStatus {
    /// Statuses in which the user currently holds their one subscription slot.
    pub const ACTIVE_LIKE: [SubscriptionStatus; 5] = [
        SubscriptionStatus::Active,
        SubscriptionStatus::Trialing,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Unpaid,
        SubscriptionStatus::Incomplete,
    ];

    /// Active-like plus paused: a user in any of these cannot start another subscription.
    pub const CURRENT: [SubscriptionStatus; 6] = [
        SubscriptionStatus::Active,
        SubscriptionStatus::Trialing,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Unpaid,
        SubscriptionStatus::Incomplete,
        SubscriptionStatus::Paused,
    ];

    pub fn is_active_like(&self) -> bool {
        Self::ACTIVE_LIKE.contains(self)
    }

    pub fn is_current(&self) -> bool {
        Self::CURRENT.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Unpaid => "unpaid",
        }
    }

    /// Canonical status for a raw Stripe status. A pause-collection setting on the
    /// Stripe object always wins over the raw status.
    pub fn from_stripe(raw: &str, collection_paused: bool) -> Self {
        if collection_paused {
            return SubscriptionStatus::Paused;
        }
        match raw {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            "incomplete" => SubscriptionStatus::Incomplete,
            "incomplete_expired" => SubscriptionStatus::IncompleteExpired,
            "unpaid" => SubscriptionStatus::Unpaid,
            _ => SubscriptionStatus::Expired,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which system of record drives a subscription's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionBacking<'a> {
    /// No Stripe subscription; status transitions are applied locally.
    Local,
    /// Status and period fields come from the Stripe subscription only.
    Stripe(&'a str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan: String,
    pub plan_id: Option<Uuid>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancel_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub canceled_at: Option<OffsetDateTime>,
    pub latest_invoice_url: Option<String>,
    pub pause_reason: Option<String>,
    pub cancel_reason: Option<String>,
    pub metadata: Value,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_synced_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    pub fn backing(&self) -> SubscriptionBacking<'_> {
        match self.stripe_subscription_id.as_deref() {
            Some(id) => SubscriptionBacking::Stripe(id),
            None => SubscriptionBacking::Local,
        }
    }

    /// A fresh local subscription with no Stripe counterpart.
    pub fn new_local(user_id: Uuid, plan: &str, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            plan: plan.to_string(),
            plan_id: None,
            stripe_subscription_id: None,
            stripe_customer_id: None,
            status: SubscriptionStatus::Active,
            started_at: Some(now),
            current_period_start: None,
            current_period_end: None,
            ended_at: None,
            cancel_at: None,
            canceled_at: None,
            latest_invoice_url: None,
            pause_reason: None,
            cancel_reason: None,
            metadata: Value::Object(Map::new()),
            last_synced_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// The `custom` portion of the metadata map (everything we own, as opposed to
    /// the verbatim Stripe copy under `stripe`).
    pub fn custom_metadata(&self) -> Map<String, Value> {
        self.metadata
            .get("custom")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_custom_metadata(&mut self, custom: Map<String, Value>) {
        if !self.metadata.is_object() {
            self.metadata = Value::Object(Map::new());
        }
        if let Some(root) = self.metadata.as_object_mut() {
            root.insert("custom".to_string(), Value::Object(custom));
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSubscriptionRequest {
    /// Target user; defaults to the caller. Only privileged callers may set another user.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub stripe_price_id: Option<String>,
    /// Free-text plan label.
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub trial_period_days: Option<u32>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateCheckoutRequest {
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub stripe_price_id: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSubscriptionRequest {
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub stripe_price_id: Option<String>,
    /// Honoured for local subscriptions only.
    #[serde(default)]
    pub status: Option<SubscriptionStatus>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub pause_reason: Option<String>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub latest_invoice_url: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PauseSubscriptionRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResumeSubscriptionRequest {
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub latest_invoice_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelSubscriptionRequest {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub latest_invoice_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionSortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    StartedAt,
    CurrentPeriodEnd,
    Status,
    Plan,
}

impl SubscriptionSortField {
    pub fn column(&self) -> &'static str {
        match self {
            SubscriptionSortField::CreatedAt => "created_at",
            SubscriptionSortField::UpdatedAt => "updated_at",
            SubscriptionSortField::StartedAt => "started_at",
            SubscriptionSortField::CurrentPeriodEnd => "current_period_end",
            SubscriptionSortField::Status => "status",
            SubscriptionSortField::Plan => "plan",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Admin listing filters, as received from the query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionQuery {
    #[serde(default)]
    pub status: Option<SubscriptionStatus>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub plan_id: Option<Uuid>,
    #[serde(default)]
    pub stripe_subscription_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_from: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_to: Option<OffsetDateTime>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub sort_by: Option<SubscriptionSortField>,
    #[serde(default)]
    pub sort_dir: Option<SortDirection>,
}

impl SubscriptionQuery {
    /// 1-based page number.
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.page_size())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionPage {
    pub items: Vec<Subscription>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}
