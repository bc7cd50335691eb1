use std::sync::Arc;

use uuid::Uuid;

use crate::db::plan_repository::PlanRepository;
use crate::models::plan::Plan;

use super::error::{BillingError, BillingResult};

/// Read-only view of the plan catalog.
#[derive(Clone)]
pub struct PlanCatalog {
    repo: Arc<dyn PlanRepository>,
}

impl PlanCatalog {
    pub fn new(repo: Arc<dyn PlanRepository>) -> Self {
        Self { repo }
    }

    pub async fn find_one(&self, id: Uuid) -> BillingResult<Plan> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Plan not found".into()))
    }

    pub async fn find_by_stripe_price(&self, price_id: &str) -> BillingResult<Option<Plan>> {
        Ok(self.repo.find_by_stripe_price_id(price_id).await?)
    }

    pub async fn find_by_stripe_product(&self, product_id: &str) -> BillingResult<Option<Plan>> {
        Ok(self.repo.find_by_stripe_product_id(product_id).await?)
    }

    pub async fn list_active(&self) -> BillingResult<Vec<Plan>> {
        Ok(self.repo.list_active().await?)
    }
}
