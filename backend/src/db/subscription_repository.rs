use async_trait::async_trait;
use uuid::Uuid;

use crate::models::subscription::{Subscription, SubscriptionPage, SubscriptionQuery};

/// Persistence for subscription records. Only the billing core writes through this.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Subscription>, sqlx::Error>;

    async fn find_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Subscription>, sqlx::Error>;

    /// Most recent subscription for the user whose status is active-like or paused.
    async fn find_current_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    async fn search(&self, query: &SubscriptionQuery) -> Result<SubscriptionPage, sqlx::Error>;

    async fn insert(&self, subscription: &Subscription) -> Result<Subscription, sqlx::Error>;

    /// Full-row replace keyed by `subscription.id`.
    async fn update(&self, subscription: &Subscription) -> Result<Subscription, sqlx::Error>;

    /// Insert keyed on the Stripe subscription id; a concurrent insert for the same
    /// Stripe id turns into an update of the existing row.
    async fn upsert_by_stripe_id(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, sqlx::Error>;

    async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error>;
}
