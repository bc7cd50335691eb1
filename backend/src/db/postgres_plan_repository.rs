use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::plan_repository::PlanRepository;
use crate::models::plan::Plan;

const COLUMNS: &str = r#"
    id, name, description, amount, currency, "interval", interval_count,
    stripe_product_id, stripe_price_id, features, active, metadata, created_at, updated_at
"#;

pub struct PostgresPlanRepository {
    pub pool: PgPool,
}

#[async_trait]
impl PlanRepository for PostgresPlanRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Plan>, sqlx::Error> {
        sqlx::query_as::<_, Plan>(&format!("SELECT {COLUMNS} FROM plans WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_by_stripe_price_id(&self, price_id: &str) -> Result<Option<Plan>, sqlx::Error> {
        sqlx::query_as::<_, Plan>(&format!(
            "SELECT {COLUMNS} FROM plans WHERE stripe_price_id = $1"
        ))
        .bind(price_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_by_stripe_product_id(
        &self,
        product_id: &str,
    ) -> Result<Option<Plan>, sqlx::Error> {
        sqlx::query_as::<_, Plan>(&format!(
            r#"
            SELECT {COLUMNS} FROM plans
            WHERE stripe_product_id = $1
            ORDER BY active DESC, created_at DESC
            LIMIT 1
            "#
        ))
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_active(&self) -> Result<Vec<Plan>, sqlx::Error> {
        sqlx::query_as::<_, Plan>(&format!(
            "SELECT {COLUMNS} FROM plans WHERE active = true ORDER BY amount ASC, name ASC"
        ))
        .fetch_all(&self.pool)
        .await
    }
}
