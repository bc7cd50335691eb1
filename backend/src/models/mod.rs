pub mod billing_customer;
pub mod identity;
pub mod plan;
pub mod subscription;
