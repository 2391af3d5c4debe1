//! Task status management: lifecycle rules, the single-writer status
//! manager and scope-keyed notifications

pub mod machine;
pub mod manager;
pub mod notifier;

pub use machine::{can_transition, check_transition};
pub use manager::{Claim, StatusManager};
pub use notifier::{Notifier, Subscription};
