use async_trait::async_trait;
use uuid::Uuid;

use crate::models::plan::Plan;

/// Read side of the plan catalog. Plans are written by the catalog sync job, not here.
#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Plan>, sqlx::Error>;

    async fn find_by_stripe_price_id(&self, price_id: &str) -> Result<Option<Plan>, sqlx::Error>;

    async fn find_by_stripe_product_id(
        &self,
        product_id: &str,
    ) -> Result<Option<Plan>, sqlx::Error>;

    async fn list_active(&self) -> Result<Vec<Plan>, sqlx::Error>;
}
