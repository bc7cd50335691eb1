#![allow(dead_code)]
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{
    CheckoutSession, CreateCheckoutSessionRequest, CreateSubscriptionParams, Expandable,
    PauseCollection, StripeEvent, StripeInvoice, StripeList, StripePrice,
    StripeService, StripeServiceError, StripeSubscription, StripeSubscriptionItem,
    SubscriptionUpdate,
};
use async_trait::async_trait;
use time::OffsetDateTime;

const THIRTY_DAYS: i64 = 30 * 24 * 60 * 60;

/// In-memory stand-in for Stripe. Every call is appended to `calls` so tests can
/// assert that no gateway traffic happened.
#[derive(Clone, Default)]
pub struct MockStripeService {
    pub created_sessions: Arc<Mutex<Vec<CheckoutSession>>>,
    pub last_create_requests: Arc<Mutex<Vec<CreateCheckoutSessionRequest>>>,
    pub events: Arc<Mutex<Vec<StripeEvent>>>,
    pub customers: Arc<Mutex<HashMap<String, Option<String>>>>,
    pub subscriptions: Arc<Mutex<HashMap<String, StripeSubscription>>>,
    pub invoices: Arc<Mutex<HashMap<String, StripeInvoice>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail_requests: Arc<AtomicBool>,
}

impl MockStripeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_subscription(&self, sub: StripeSubscription) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(sub.id.clone(), sub);
    }

    pub fn subscription(&self, id: &str) -> Option<StripeSubscription> {
        self.subscriptions.lock().unwrap().get(id).cloned()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == name)
            .count()
    }

    /// Makes every subsequent gateway call fail with an API error.
    pub fn fail_all_requests(&self) {
        self.fail_requests.store(true, Ordering::SeqCst);
    }

    fn record(&self, name: &str) -> Result<(), StripeServiceError> {
        self.calls.lock().unwrap().push(name.to_string());
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(StripeServiceError::Api(format!("{name} failed")));
        }
        Ok(())
    }
}

fn make_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

#[async_trait]
impl StripeService for MockStripeService {
    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError> {
        self.record("create_checkout_session")?;
        self.last_create_requests.lock().unwrap().push(req.clone());

        let session = CheckoutSession {
            id: make_id("cs_test"),
            url: Some("https://example.test/checkout".into()),
        };
        self.created_sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    async fn create_customer(
        &self,
        email: Option<&str>,
        _name: Option<&str>,
        _metadata: &HashMap<String, String>,
    ) -> Result<String, StripeServiceError> {
        self.record("create_customer")?;
        let id = make_id("cus_test");
        self.customers
            .lock()
            .unwrap()
            .insert(id.clone(), email.map(str::to_string));
        Ok(id)
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        email: Option<&str>,
        _metadata: Option<&HashMap<String, String>>,
    ) -> Result<(), StripeServiceError> {
        self.record("update_customer")?;
        let mut customers = self.customers.lock().unwrap();
        let entry = customers
            .get_mut(customer_id)
            .ok_or_else(|| StripeServiceError::NotFound(customer_id.to_string()))?;
        if email.is_some() {
            *entry = email.map(str::to_string);
        }
        Ok(())
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<(), StripeServiceError> {
        self.record("delete_customer")?;
        self.customers.lock().unwrap().remove(customer_id);
        Ok(())
    }

    async fn create_subscription(
        &self,
        params: CreateSubscriptionParams,
    ) -> Result<StripeSubscription, StripeServiceError> {
        self.record("create_subscription")?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let trialing = params.trial_period_days.unwrap_or(0) > 0;

        let invoice = StripeInvoice {
            id: make_id("in_test"),
            hosted_invoice_url: Some("https://invoice.example.test/hosted".into()),
            invoice_pdf: None,
        };
        self.invoices
            .lock()
            .unwrap()
            .insert(invoice.id.clone(), invoice.clone());

        let sub = StripeSubscription {
            id: make_id("sub_test"),
            customer: Some(Expandable::Id(params.customer_id.clone())),
            status: if trialing { "trialing" } else { "active" }.to_string(),
            start_date: Some(now),
            current_period_start: Some(now),
            current_period_end: Some(now + THIRTY_DAYS),
            ended_at: None,
            cancel_at: None,
            canceled_at: None,
            pause_collection: None,
            latest_invoice: Some(Expandable::Id(invoice.id)),
            metadata: params.metadata.clone(),
            items: StripeList {
                data: vec![StripeSubscriptionItem {
                    id: make_id("si_test"),
                    price: Some(StripePrice {
                        id: params.price_id.clone(),
                        nickname: None,
                        product: None,
                    }),
                    current_period_start: None,
                    current_period_end: None,
                }],
            },
        };
        self.insert_subscription(sub.clone());
        Ok(sub)
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<StripeSubscription, StripeServiceError> {
        self.record("retrieve_subscription")?;
        self.subscription(subscription_id)
            .ok_or_else(|| StripeServiceError::NotFound(subscription_id.to_string()))
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        update: SubscriptionUpdate,
    ) -> Result<StripeSubscription, StripeServiceError> {
        self.record("update_subscription")?;
        let mut subs = self.subscriptions.lock().unwrap();
        let sub = subs
            .get_mut(subscription_id)
            .ok_or_else(|| StripeServiceError::NotFound(subscription_id.to_string()))?;

        if let Some((item_id, price_id)) = update.swap_price {
            if let Some(item) = sub.items.data.iter_mut().find(|i| i.id == item_id) {
                item.price = Some(StripePrice {
                    id: price_id,
                    nickname: None,
                    product: None,
                });
            }
        }
        if let Some(metadata) = update.metadata {
            // Stripe merges metadata keys on update.
            sub.metadata.extend(metadata);
        }
        match update.pause_collection {
            Some(PauseCollection::Void) => {
                sub.pause_collection = Some(serde_json::json!({ "behavior": "void" }));
            }
            Some(PauseCollection::Clear) => sub.pause_collection = None,
            None => {}
        }
        Ok(sub.clone())
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<StripeSubscription, StripeServiceError> {
        self.record("cancel_subscription")?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut subs = self.subscriptions.lock().unwrap();
        let sub = subs
            .get_mut(subscription_id)
            .ok_or_else(|| StripeServiceError::NotFound(subscription_id.to_string()))?;
        sub.status = "canceled".into();
        sub.canceled_at = Some(now);
        sub.ended_at = Some(now);
        Ok(sub.clone())
    }

    async fn retrieve_invoice(
        &self,
        invoice_id: &str,
    ) -> Result<StripeInvoice, StripeServiceError> {
        self.record("retrieve_invoice")?;
        self.invoices
            .lock()
            .unwrap()
            .get(invoice_id)
            .cloned()
            .ok_or_else(|| StripeServiceError::NotFound(format!("invoice {} not found", invoice_id)))
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        if !signature_header.starts_with("t=") {
            return Err(StripeServiceError::Webhook("malformed signature".into()));
        }
        let val: serde_json::Value = serde_json::from_slice(payload)?;
        let id = match val.get("id").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => make_id("evt"),
        };
        let ty = val
            .get("type")
            .or_else(|| val.get("type_"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let evt = StripeEvent {
            id,
            r#type: ty,
            payload: val,
        };
        self.events.lock().unwrap().push(evt.clone());
        Ok(evt)
    }
}

