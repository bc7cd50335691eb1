use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::models::subscription::{
    Subscription, SubscriptionPage, SubscriptionQuery, SubscriptionStatus,
};

use super::subscription_repository::SubscriptionRepository;

const COLUMNS: &str = r#"
    id, user_id, plan, plan_id, stripe_subscription_id, stripe_customer_id, status,
    started_at, current_period_start, current_period_end, ended_at, cancel_at, canceled_at,
    latest_invoice_url, pause_reason, cancel_reason, metadata, last_synced_at,
    created_at, updated_at
"#;

pub struct PostgresSubscriptionRepository {
    pub pool: PgPool,
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &SubscriptionQuery) {
    builder.push(" WHERE 1 = 1");
    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status);
    }
    if let Some(plan) = query.plan.as_ref() {
        builder
            .push(" AND plan ILIKE ")
            .push_bind(format!("%{}%", plan.trim()));
    }
    if let Some(plan_id) = query.plan_id {
        builder.push(" AND plan_id = ").push_bind(plan_id);
    }
    if let Some(stripe_id) = query.stripe_subscription_id.as_ref() {
        builder
            .push(" AND stripe_subscription_id = ")
            .push_bind(stripe_id.clone());
    }
    if let Some(user_id) = query.user_id {
        builder.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(from) = query.started_from {
        builder.push(" AND started_at >= ").push_bind(from);
    }
    if let Some(to) = query.started_to {
        builder.push(" AND started_at <= ").push_bind(to);
    }
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {COLUMNS} FROM subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {COLUMNS} FROM subscriptions WHERE stripe_subscription_id = $1"
        ))
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {COLUMNS} FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn find_current_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {COLUMNS} FROM subscriptions
            WHERE user_id = $1 AND status = ANY($2)
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .bind(SubscriptionStatus::CURRENT.to_vec())
        .fetch_optional(&self.pool)
        .await
    }

    async fn search(&self, query: &SubscriptionQuery) -> Result<SubscriptionPage, sqlx::Error> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM subscriptions");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let sort = query.sort_by.unwrap_or_default();
        let dir = query.sort_dir.unwrap_or_default();
        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM subscriptions"));
        push_filters(&mut select, query);
        select
            .push(format!(" ORDER BY {} {}, id ASC", sort.column(), dir.keyword()))
            .push(" LIMIT ")
            .push_bind(i64::from(query.page_size()))
            .push(" OFFSET ")
            .push_bind(query.offset() as i64);

        let items = select
            .build_query_as::<Subscription>()
            .fetch_all(&self.pool)
            .await?;

        Ok(SubscriptionPage {
            items,
            total,
            page: query.page(),
            page_size: query.page_size(),
        })
    }

    async fn insert(&self, s: &Subscription) -> Result<Subscription, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, now(), now())
            RETURNING {COLUMNS}
            "#
        ))
        .bind(s.id)
        .bind(s.user_id)
        .bind(&s.plan)
        .bind(s.plan_id)
        .bind(&s.stripe_subscription_id)
        .bind(&s.stripe_customer_id)
        .bind(s.status)
        .bind(s.started_at)
        .bind(s.current_period_start)
        .bind(s.current_period_end)
        .bind(s.ended_at)
        .bind(s.cancel_at)
        .bind(s.canceled_at)
        .bind(&s.latest_invoice_url)
        .bind(&s.pause_reason)
        .bind(&s.cancel_reason)
        .bind(&s.metadata)
        .bind(s.last_synced_at)
        .fetch_one(&self.pool)
        .await
    }

    async fn update(&self, s: &Subscription) -> Result<Subscription, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET plan = $2,
                plan_id = $3,
                stripe_subscription_id = $4,
                stripe_customer_id = $5,
                status = $6,
                started_at = $7,
                current_period_start = $8,
                current_period_end = $9,
                ended_at = $10,
                cancel_at = $11,
                canceled_at = $12,
                latest_invoice_url = $13,
                pause_reason = $14,
                cancel_reason = $15,
                metadata = $16,
                last_synced_at = $17,
                updated_at = now()
            WHERE id = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(s.id)
        .bind(&s.plan)
        .bind(s.plan_id)
        .bind(&s.stripe_subscription_id)
        .bind(&s.stripe_customer_id)
        .bind(s.status)
        .bind(s.started_at)
        .bind(s.current_period_start)
        .bind(s.current_period_end)
        .bind(s.ended_at)
        .bind(s.cancel_at)
        .bind(s.canceled_at)
        .bind(&s.latest_invoice_url)
        .bind(&s.pause_reason)
        .bind(&s.cancel_reason)
        .bind(&s.metadata)
        .bind(s.last_synced_at)
        .fetch_one(&self.pool)
        .await
    }

    async fn upsert_by_stripe_id(&self, s: &Subscription) -> Result<Subscription, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, now(), now())
            ON CONFLICT (stripe_subscription_id) DO UPDATE
            SET plan = EXCLUDED.plan,
                plan_id = EXCLUDED.plan_id,
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                status = EXCLUDED.status,
                started_at = EXCLUDED.started_at,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                ended_at = EXCLUDED.ended_at,
                cancel_at = EXCLUDED.cancel_at,
                canceled_at = EXCLUDED.canceled_at,
                latest_invoice_url = EXCLUDED.latest_invoice_url,
                metadata = EXCLUDED.metadata,
                last_synced_at = EXCLUDED.last_synced_at,
                updated_at = now()
            RETURNING {COLUMNS}
            "#
        ))
        .bind(s.id)
        .bind(s.user_id)
        .bind(&s.plan)
        .bind(s.plan_id)
        .bind(&s.stripe_subscription_id)
        .bind(&s.stripe_customer_id)
        .bind(s.status)
        .bind(s.started_at)
        .bind(s.current_period_start)
        .bind(s.current_period_end)
        .bind(s.ended_at)
        .bind(s.cancel_at)
        .bind(s.canceled_at)
        .bind(&s.latest_invoice_url)
        .bind(&s.pause_reason)
        .bind(&s.cancel_reason)
        .bind(&s.metadata)
        .bind(s.last_synced_at)
        .fetch_one(&self.pool)
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
