use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::models::billing_customer::BillingCustomer;

#[async_trait]
pub trait BillingCustomerRepository: Send + Sync {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<BillingCustomer>, sqlx::Error>;

    async fn find_by_stripe_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<BillingCustomer>, sqlx::Error>;

    async fn insert(
        &self,
        user_id: Uuid,
        stripe_customer_id: &str,
        email: Option<&str>,
        metadata: Value,
    ) -> Result<BillingCustomer, sqlx::Error>;

    async fn update_email(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> Result<BillingCustomer, sqlx::Error>;

    async fn update_metadata(
        &self,
        user_id: Uuid,
        metadata: Value,
    ) -> Result<BillingCustomer, sqlx::Error>;

    async fn delete(&self, user_id: Uuid) -> Result<bool, sqlx::Error>;
}
