pub mod customers;
pub mod error;
pub mod events;
pub mod plans;
pub mod subscriptions;
pub mod sync;


pub use customers::CustomerManager;
pub use error::{BillingError, BillingResult, ErrorKind};
pub use events::BillingEvent;
pub use plans::PlanCatalog;
pub use subscriptions::SubscriptionManager;
