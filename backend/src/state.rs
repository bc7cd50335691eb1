use std::sync::Arc;

use crate::config::Config;
use crate::db::stripe_event_log_repository::StripeEventLogRepository;
use crate::services::billing::{PlanCatalog, SubscriptionManager};
use crate::services::identity::IdentityVerifier;
use crate::services::stripe::StripeService;

#[derive(Clone)]
pub struct AppState {
    pub subscriptions: Arc<SubscriptionManager>,
    pub plans: PlanCatalog,
    pub identity: Arc<dyn IdentityVerifier>,
    pub stripe: Arc<dyn StripeService>,
    pub stripe_event_log_repo: Arc<dyn StripeEventLogRepository>,
    pub config: Arc<Config>,
}
