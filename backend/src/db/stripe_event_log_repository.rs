use async_trait::async_trait;

/// Records Stripe webhook event ids that were fully processed.
#[async_trait]
pub trait StripeEventLogRepository: Send + Sync {
    async fn has_processed_event(&self, event_id: &str) -> Result<bool, sqlx::Error>;

    async fn record_event(&self, event_id: &str, event_type: &str) -> Result<(), sqlx::Error>;
}
