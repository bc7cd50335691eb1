use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// One user's Stripe customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BillingCustomer {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stripe_customer_id: String,
    pub email: Option<String>,
    pub metadata: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
