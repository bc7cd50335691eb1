use crate::db::stripe_event_log_repository::StripeEventLogRepository;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct MockStripeEventLogRepository {
    events: Arc<Mutex<HashMap<String, String>>>,
    pub checks: Arc<Mutex<usize>>,
    pub inserts: Arc<Mutex<usize>>,
}

impl MockStripeEventLogRepository {
    pub fn recorded_events(&self) -> Vec<String> {
        self.events.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl StripeEventLogRepository for MockStripeEventLogRepository {
    async fn has_processed_event(&self, event_id: &str) -> Result<bool, sqlx::Error> {
        *self.checks.lock().unwrap() += 1;
        Ok(self.events.lock().unwrap().contains_key(event_id))
    }

    async fn record_event(&self, event_id: &str, event_type: &str) -> Result<(), sqlx::Error> {
        *self.inserts.lock().unwrap() += 1;
        self.events
            .lock()
            .unwrap()
            .insert(event_id.to_string(), event_type.to_string());
        Ok(())
    }
}
