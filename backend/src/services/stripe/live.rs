use std::collections::HashMap;
use std::time::Duration;

use super::{
    CheckoutLineItem, CheckoutMode, CheckoutSession, CreateCheckoutSessionRequest,
    CreateSubscriptionParams, PauseCollection, StripeEvent, StripeInvoice, StripeService,
    StripeServiceError, StripeSubscription, SubscriptionUpdate, with_timeout,
};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// Every subscription we read back is expanded far enough to resolve the plan and
/// the hosted invoice without a second round trip.
const SUBSCRIPTION_EXPAND: [&str; 2] = ["items.data.price.product", "latest_invoice"];

pub struct LiveStripeService {
    client: stripe::Client,
    webhook_secret: String,
    timeout: Duration,
}

impl LiveStripeService {
    pub fn new(
        secret_key: impl Into<String>,
        webhook_secret: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = stripe::Client::new(secret_key);
        Self {
            client,
            webhook_secret: webhook_secret.into(),
            timeout,
        }
    }

    pub fn from_settings(settings: &crate::config::StripeSettings) -> Self {
        Self::new(
            settings.secret_key.clone(),
            settings.webhook_secret.clone(),
            settings.request_timeout,
        )
    }
}

fn map_mode(mode: CheckoutMode) -> stripe::CheckoutSessionMode {
    match mode {
        CheckoutMode::Payment => stripe::CheckoutSessionMode::Payment,
        CheckoutMode::Subscription => stripe::CheckoutSessionMode::Subscription,
        CheckoutMode::Setup => stripe::CheckoutSessionMode::Setup,
    }
}

fn map_line_items(items: &[CheckoutLineItem]) -> Vec<stripe::CreateCheckoutSessionLineItems> {
    items
        .iter()
        .map(|li| stripe::CreateCheckoutSessionLineItems {
            price: Some(li.price.clone()),
            quantity: Some(li.quantity),
            ..Default::default()
        })
        .collect()
}

fn parse_customer_id(id: &str) -> Result<stripe::CustomerId, StripeServiceError> {
    id.parse::<stripe::CustomerId>()
        .map_err(|e| StripeServiceError::Other(e.to_string()))
}

fn parse_subscription_id(id: &str) -> Result<stripe::SubscriptionId, StripeServiceError> {
    id.parse::<stripe::SubscriptionId>()
        .map_err(|e| StripeServiceError::Other(e.to_string()))
}

/// Re-reads an async-stripe object through its JSON form into our own snapshot type.
fn snapshot<T: Serialize, U: DeserializeOwned>(value: &T) -> Result<U, StripeServiceError> {
    let json = serde_json::to_value(value)?;
    Ok(serde_json::from_value(json)?)
}

#[derive(Serialize)]
struct SubscriptionItemForm<'a> {
    id: &'a str,
    price: &'a str,
}

// async-stripe cannot express clearing `pause_collection`, which Stripe expects as an
// empty string, so updates go through a hand-built form.
#[derive(Serialize)]
#[serde(untagged)]
enum PauseCollectionForm {
    Set { behavior: &'static str },
    Clear(&'static str),
}

#[derive(Serialize)]
struct UpdateSubscriptionForm<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    items: Vec<SubscriptionItemForm<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pause_collection: Option<PauseCollectionForm>,
    expand: &'a [&'a str],
}

#[async_trait]
impl StripeService for LiveStripeService {
    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError> {
        let mut params = stripe::CreateCheckoutSession::new();
        params.mode = Some(map_mode(req.mode));
        params.success_url = Some(&req.success_url);
        params.cancel_url = Some(&req.cancel_url);
        if let Some(ref id) = req.client_reference_id {
            params.client_reference_id = Some(id);
        }
        if let Some(ref customer) = req.customer {
            params.customer = Some(parse_customer_id(customer)?);
        }
        if let Some(ref meta) = req.metadata {
            let m: HashMap<String, String> =
                meta.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            params.metadata = Some(m);
        }
        if !req.line_items.is_empty() {
            params.line_items = Some(map_line_items(&req.line_items));
        }

        let session =
            with_timeout(self.timeout, stripe::CheckoutSession::create(&self.client, params))
                .await?;
        Ok(CheckoutSession {
            id: session.id.to_string(),
            url: session.url.clone(),
        })
    }

    async fn create_customer(
        &self,
        email: Option<&str>,
        name: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> Result<String, StripeServiceError> {
        let mut params = stripe::CreateCustomer::new();
        params.email = email;
        params.name = name;
        if !metadata.is_empty() {
            params.metadata = Some(metadata.clone());
        }
        let customer =
            with_timeout(self.timeout, stripe::Customer::create(&self.client, params)).await?;
        Ok(customer.id.to_string())
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        email: Option<&str>,
        metadata: Option<&HashMap<String, String>>,
    ) -> Result<(), StripeServiceError> {
        let id = parse_customer_id(customer_id)?;
        let mut params = stripe::UpdateCustomer::new();
        params.email = email;
        params.metadata = metadata.cloned();
        with_timeout(self.timeout, stripe::Customer::update(&self.client, &id, params)).await?;
        Ok(())
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<(), StripeServiceError> {
        let id = parse_customer_id(customer_id)?;
        with_timeout(self.timeout, stripe::Customer::delete(&self.client, &id)).await?;
        Ok(())
    }

    async fn create_subscription(
        &self,
        params: CreateSubscriptionParams,
    ) -> Result<StripeSubscription, StripeServiceError> {
        let customer_id = parse_customer_id(&params.customer_id)?;
        let mut create = stripe::CreateSubscription::new(customer_id);
        create.items = Some(vec![stripe::CreateSubscriptionItems {
            price: Some(params.price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        create.trial_period_days = params.trial_period_days.filter(|days| *days > 0);
        create.metadata = Some(params.metadata.clone());
        create.expand = &SUBSCRIPTION_EXPAND;

        let sub =
            with_timeout(self.timeout, stripe::Subscription::create(&self.client, create)).await?;
        snapshot(&sub)
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<StripeSubscription, StripeServiceError> {
        let id = parse_subscription_id(subscription_id)?;
        let sub = with_timeout(
            self.timeout,
            stripe::Subscription::retrieve(&self.client, &id, &SUBSCRIPTION_EXPAND),
        )
        .await?;
        snapshot(&sub)
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        update: SubscriptionUpdate,
    ) -> Result<StripeSubscription, StripeServiceError> {
        let id = parse_subscription_id(subscription_id)?;
        let form = UpdateSubscriptionForm {
            items: update
                .swap_price
                .as_ref()
                .map(|(item, price)| {
                    vec![SubscriptionItemForm {
                        id: item.as_str(),
                        price: price.as_str(),
                    }]
                })
                .unwrap_or_default(),
            metadata: update.metadata.as_ref(),
            pause_collection: update.pause_collection.map(|p| match p {
                PauseCollection::Void => PauseCollectionForm::Set { behavior: "void" },
                PauseCollection::Clear => PauseCollectionForm::Clear(""),
            }),
            expand: &SUBSCRIPTION_EXPAND,
        };
        let path = format!("/subscriptions/{}", id);
        let sub: stripe::Subscription =
            with_timeout(self.timeout, self.client.post_form(&path, form)).await?;
        snapshot(&sub)
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<StripeSubscription, StripeServiceError> {
        let id = parse_subscription_id(subscription_id)?;
        let params = stripe::CancelSubscription {
            invoice_now: Some(false),
            prorate: Some(false),
            ..Default::default()
        };
        let sub = with_timeout(
            self.timeout,
            stripe::Subscription::cancel(&self.client, &id, params),
        )
        .await?;
        snapshot(&sub)
    }

    async fn retrieve_invoice(
        &self,
        invoice_id: &str,
    ) -> Result<StripeInvoice, StripeServiceError> {
        let id = invoice_id
            .parse::<stripe::InvoiceId>()
            .map_err(|e| StripeServiceError::Other(e.to_string()))?;
        let invoice =
            with_timeout(self.timeout, stripe::Invoice::retrieve(&self.client, &id, &[])).await?;
        snapshot(&invoice)
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        let payload_str =
            std::str::from_utf8(payload).map_err(|e| StripeServiceError::Serde(e.to_string()))?;
        let event =
            stripe::Webhook::construct_event(payload_str, signature_header, &self.webhook_secret)?;
        let payload = serde_json::to_value(&event)?;
        Ok(StripeEvent {
            id: event.id.to_string(),
            r#type: event.type_.to_string(),
            payload,
        })
    }
}
