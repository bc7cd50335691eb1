use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Cached read model of a Stripe product + price pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub interval: String,
    pub interval_count: i32,
    pub stripe_product_id: Option<String>,
    pub stripe_price_id: Option<String>,
    pub features: Vec<String>,
    pub active: bool,
    pub metadata: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
