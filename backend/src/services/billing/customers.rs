use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::billing_customer_repository::BillingCustomerRepository;
use crate::models::billing_customer::BillingCustomer;
use crate::services::stripe::StripeService;

use super::error::{BillingError, BillingResult};

/// Owns the user ↔ Stripe customer mapping.
#[derive(Clone)]
pub struct CustomerManager {
    repo: Arc<dyn BillingCustomerRepository>,
    stripe: Arc<dyn StripeService>,
}

pub(crate) fn stringify_metadata(metadata: &Map<String, Value>) -> HashMap<String, String> {
    metadata
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

impl CustomerManager {
    pub fn new(repo: Arc<dyn BillingCustomerRepository>, stripe: Arc<dyn StripeService>) -> Self {
        Self { repo, stripe }
    }

    /// Returns the user's mapping, creating the Stripe customer on first use. An
    /// existing mapping has its email refreshed on both sides when it changed.
    pub async fn ensure_customer(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        name: Option<&str>,
        metadata: Option<&Map<String, Value>>,
    ) -> BillingResult<BillingCustomer> {
        if let Some(existing) = self.repo.find_by_user_id(user_id).await? {
            let Some(email) = email.filter(|e| existing.email.as_deref() != Some(*e)) else {
                return Ok(existing);
            };
            self.stripe
                .update_customer(&existing.stripe_customer_id, Some(email), None)
                .await?;
            let updated = self.repo.update_email(user_id, email).await?;
            info!(%user_id, customer_id = %updated.stripe_customer_id, "refreshed billing customer email");
            return Ok(updated);
        }

        let mut stripe_metadata = metadata.map(stringify_metadata).unwrap_or_default();
        stripe_metadata.insert("user_id".to_string(), user_id.to_string());

        let customer_id = self
            .stripe
            .create_customer(email, name, &stripe_metadata)
            .await?;
        let local_metadata = Value::Object(metadata.cloned().unwrap_or_default());
        let created = self
            .repo
            .insert(user_id, &customer_id, email, local_metadata)
            .await?;
        info!(%user_id, %customer_id, "created billing customer");
        Ok(created)
    }

    pub async fn find_by_user_id(&self, user_id: Uuid) -> BillingResult<Option<BillingCustomer>> {
        Ok(self.repo.find_by_user_id(user_id).await?)
    }

    pub async fn find_user_id_by_stripe_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> BillingResult<Option<Uuid>> {
        Ok(self
            .repo
            .find_by_stripe_customer_id(stripe_customer_id)
            .await?
            .map(|c| c.user_id))
    }

    /// Records a mapping for a customer Stripe created on our behalf (hosted
    /// checkout). Existing mappings for either side are left untouched.
    pub async fn link_customer(
        &self,
        user_id: Uuid,
        stripe_customer_id: &str,
    ) -> BillingResult<Option<BillingCustomer>> {
        if self.repo.find_by_user_id(user_id).await?.is_some() {
            return Ok(None);
        }
        if let Some(other) = self
            .repo
            .find_by_stripe_customer_id(stripe_customer_id)
            .await?
        {
            warn!(
                %user_id,
                owner = %other.user_id,
                customer_id = %stripe_customer_id,
                "stripe customer already mapped to another user"
            );
            return Ok(None);
        }
        let linked = self
            .repo
            .insert(
                user_id,
                stripe_customer_id,
                None,
                Value::Object(Map::new()),
            )
            .await?;
        info!(%user_id, customer_id = %stripe_customer_id, "linked checkout customer");
        Ok(Some(linked))
    }

    /// Replaces the stored metadata and mirrors it onto the Stripe customer.
    pub async fn update_metadata(
        &self,
        user_id: Uuid,
        metadata: Map<String, Value>,
    ) -> BillingResult<BillingCustomer> {
        let existing = self
            .repo
            .find_by_user_id(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Billing customer not found".into()))?;

        let mut stripe_metadata = stringify_metadata(&metadata);
        stripe_metadata.insert("user_id".to_string(), user_id.to_string());
        self.stripe
            .update_customer(&existing.stripe_customer_id, None, Some(&stripe_metadata))
            .await?;

        Ok(self
            .repo
            .update_metadata(user_id, Value::Object(metadata))
            .await?)
    }

    pub async fn delete_customer(&self, user_id: Uuid) -> BillingResult<()> {
        let existing = self
            .repo
            .find_by_user_id(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Billing customer not found".into()))?;

        self.stripe
            .delete_customer(&existing.stripe_customer_id)
            .await?;
        self.repo.delete(user_id).await?;
        info!(%user_id, customer_id = %existing.stripe_customer_id, "deleted billing customer");
        Ok(())
    }
}
