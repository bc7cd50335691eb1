pub mod billing;
pub mod identity;
pub mod stripe;
