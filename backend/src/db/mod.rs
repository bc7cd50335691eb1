pub mod billing_customer_repository;
pub mod plan_repository;
pub mod postgres_billing_customer_repository;
pub mod postgres_plan_repository;
pub mod postgres_stripe_event_log_repository;
pub mod postgres_subscription_repository;
pub mod stripe_event_log_repository;
pub mod subscription_repository;

#[cfg(test)]
pub mod mock_db;
#[cfg(test)]
pub mod mock_stripe_event_log_repository;
