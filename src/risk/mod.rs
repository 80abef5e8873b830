pub mod allocation;
pub mod correlation;
pub mod costs;
pub mod drawdown;
pub mod kelly;
pub mod sizing;
pub mod stops;
