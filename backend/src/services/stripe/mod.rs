// NOTE: async-stripe is compiled with a minimal feature set (runtime-tokio-hyper, checkout,
// billing, webhook-events, and connect to satisfy webhook payload types). Touching APIs outside
// those features will require updating backend/Cargo.toml explicitly so we keep compile times and
// binary size in check.
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StripeServiceError {
    #[error("stripe api error: {0}")]
    Api(String),
    #[error("stripe request timed out after {0:?}")]
    Timeout(Duration),
    #[error("webhook verification failed: {0}")]
    Webhook(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("other error: {0}")]
    Other(String),
}

/// Bounds a single gateway call. The underlying hyper client has no deadline of its own.
pub async fn with_timeout<T, E, F>(limit: Duration, call: F) -> Result<T, StripeServiceError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<StripeServiceError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(StripeServiceError::Timeout(limit)),
    }
}

impl From<stripe::StripeError> for StripeServiceError {
    fn from(err: stripe::StripeError) -> Self {
        StripeServiceError::Api(err.to_string())
    }
}

impl From<stripe::WebhookError> for StripeServiceError {
    fn from(err: stripe::WebhookError) -> Self {
        StripeServiceError::Webhook(err.to_string())
    }
}

impl From<serde_json::Error> for StripeServiceError {
    fn from(err: serde_json::Error) -> Self {
        StripeServiceError::Serde(err.to_string())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    Payment,
    Subscription,
    Setup,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutLineItem {
    pub price: String,
    pub quantity: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateCheckoutSessionRequest {
    pub success_url: String,
    pub cancel_url: String,
    pub mode: CheckoutMode,
    pub line_items: Vec<CheckoutLineItem>,
    pub client_reference_id: Option<String>,
    pub customer: Option<String>,
    pub metadata: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    pub r#type: String,
    pub payload: serde_json::Value,
}

/// A Stripe field that is either a bare id or the expanded object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

impl<T: HasId> Expandable<T> {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object(obj) => obj.object_id(),
        }
    }

    pub fn as_object(&self) -> Option<&T> {
        match self {
            Expandable::Id(_) => None,
            Expandable::Object(obj) => Some(obj),
        }
    }
}

pub trait HasId {
    fn object_id(&self) -> &str;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: String,
}

impl HasId for ObjectRef {
    fn object_id(&self) -> &str {
        &self.id
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StripeProduct {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl HasId for StripeProduct {
    fn object_id(&self) -> &str {
        &self.id
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StripePrice {
    pub id: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub product: Option<Expandable<StripeProduct>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StripeSubscriptionItem {
    pub id: String,
    #[serde(default)]
    pub price: Option<StripePrice>,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct StripeList<T> {
    #[serde(default)]
    pub data: Vec<T>,
}

impl<T> Default for StripeList<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    #[serde(default)]
    pub hosted_invoice_url: Option<String>,
    #[serde(default)]
    pub invoice_pdf: Option<String>,
}

impl HasId for StripeInvoice {
    fn object_id(&self) -> &str {
        &self.id
    }
}

impl StripeInvoice {
    pub fn best_url(&self) -> Option<String> {
        self.hosted_invoice_url
            .clone()
            .or_else(|| self.invoice_pdf.clone())
    }
}

/// The subset of a Stripe subscription object that reconciliation reads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    #[serde(default)]
    pub customer: Option<Expandable<ObjectRef>>,
    pub status: String,
    #[serde(default)]
    pub start_date: Option<i64>,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub cancel_at: Option<i64>,
    #[serde(default)]
    pub canceled_at: Option<i64>,
    #[serde(default)]
    pub pause_collection: Option<serde_json::Value>,
    #[serde(default)]
    pub latest_invoice: Option<Expandable<StripeInvoice>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: HashMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: StripeList<StripeSubscriptionItem>,
}

impl StripeSubscription {
    pub fn customer_id(&self) -> Option<&str> {
        self.customer.as_ref().map(|c| c.id())
    }

    pub fn first_item(&self) -> Option<&StripeSubscriptionItem> {
        self.items.data.first()
    }

    pub fn first_price(&self) -> Option<&StripePrice> {
        self.first_item().and_then(|item| item.price.as_ref())
    }

    pub fn collection_paused(&self) -> bool {
        self.pause_collection
            .as_ref()
            .map(|v| !v.is_null())
            .unwrap_or(false)
    }

    /// Period bounds live on the subscription in older API versions and on the
    /// items in newer ones.
    pub fn period_bounds(&self) -> (Option<i64>, Option<i64>) {
        let item = self.first_item();
        (
            self.current_period_start
                .or_else(|| item.and_then(|i| i.current_period_start)),
            self.current_period_end
                .or_else(|| item.and_then(|i| i.current_period_end)),
        )
    }
}

/// The subset of a Checkout Session the completion handler needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub customer: Option<Expandable<ObjectRef>>,
    #[serde(default)]
    pub subscription: Option<Expandable<ObjectRef>>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: HashMap<String, String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateSubscriptionParams {
    pub customer_id: String,
    pub price_id: String,
    pub trial_period_days: Option<u32>,
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PauseCollection {
    /// Stop collecting; invoices raised while paused are voided.
    Void,
    Clear,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubscriptionUpdate {
    /// `(subscription item id, new price id)`
    pub swap_price: Option<(String, String)>,
    pub metadata: Option<HashMap<String, String>>,
    pub pause_collection: Option<PauseCollection>,
}

impl SubscriptionUpdate {
    pub fn is_empty(&self) -> bool {
        self.swap_price.is_none() && self.metadata.is_none() && self.pause_collection.is_none()
    }
}

#[async_trait]
pub trait StripeService: Send + Sync {
    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError>;

    async fn create_customer(
        &self,
        email: Option<&str>,
        name: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> Result<String, StripeServiceError>;

    async fn update_customer(
        &self,
        customer_id: &str,
        email: Option<&str>,
        metadata: Option<&HashMap<String, String>>,
    ) -> Result<(), StripeServiceError>;

    async fn delete_customer(&self, customer_id: &str) -> Result<(), StripeServiceError>;

    async fn create_subscription(
        &self,
        params: CreateSubscriptionParams,
    ) -> Result<StripeSubscription, StripeServiceError>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<StripeSubscription, StripeServiceError>;

    async fn update_subscription(
        &self,
        subscription_id: &str,
        update: SubscriptionUpdate,
    ) -> Result<StripeSubscription, StripeServiceError>;

    /// Cancels immediately without prorating or invoicing.
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<StripeSubscription, StripeServiceError>;

    async fn retrieve_invoice(&self, invoice_id: &str)
        -> Result<StripeInvoice, StripeServiceError>;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError>;
}

mod live;
mod mock;

pub use live::LiveStripeService;
#[allow(unused_imports)]
pub use mock::MockStripeService;
