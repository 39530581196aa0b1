pub mod account_router;
pub mod rules;
pub mod strategies;

pub use account_router::{AccountRouter, RoutedAccount};
pub use rules::RoutingRule;
pub use strategies::Candidate;
