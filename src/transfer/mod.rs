pub mod manager;
pub mod rules;

pub use manager::TransferManager;
pub use rules::{BalanceDistribution, ConsolidateDust, MaintainMinimumBalance, RebalanceRule, Schedule};
