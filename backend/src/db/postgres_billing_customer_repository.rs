use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::billing_customer_repository::BillingCustomerRepository;
use crate::models::billing_customer::BillingCustomer;

const COLUMNS: &str =
    "id, user_id, stripe_customer_id, email, metadata, created_at, updated_at";

pub struct PostgresBillingCustomerRepository {
    pub pool: PgPool,
}

#[async_trait]
impl BillingCustomerRepository for PostgresBillingCustomerRepository {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<BillingCustomer>, sqlx::Error> {
        sqlx::query_as::<_, BillingCustomer>(&format!(
            "SELECT {COLUMNS} FROM billing_customers WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_by_stripe_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<BillingCustomer>, sqlx::Error> {
        sqlx::query_as::<_, BillingCustomer>(&format!(
            "SELECT {COLUMNS} FROM billing_customers WHERE stripe_customer_id = $1"
        ))
        .bind(stripe_customer_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn insert(
        &self,
        user_id: Uuid,
        stripe_customer_id: &str,
        email: Option<&str>,
        metadata: Value,
    ) -> Result<BillingCustomer, sqlx::Error> {
        sqlx::query_as::<_, BillingCustomer>(&format!(
            r#"
            INSERT INTO billing_customers (id, user_id, stripe_customer_id, email, metadata)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(stripe_customer_id)
        .bind(email)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await
    }

    async fn update_email(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> Result<BillingCustomer, sqlx::Error> {
        sqlx::query_as::<_, BillingCustomer>(&format!(
            r#"
            UPDATE billing_customers
            SET email = $2, updated_at = now()
            WHERE user_id = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await
    }

    async fn update_metadata(
        &self,
        user_id: Uuid,
        metadata: Value,
    ) -> Result<BillingCustomer, sqlx::Error> {
        sqlx::query_as::<_, BillingCustomer>(&format!(
            r#"
            UPDATE billing_customers
            SET metadata = $2, updated_at = now()
            WHERE user_id = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await
    }

    async fn delete(&self, user_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM billing_customers WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
