//! Strategy contract and registry.
//!
//! Strategies are enumerated at startup by explicit discovery — no dynamic
//! loading. Each exposes a stable name and a default weight in [0, 1]; the
//! composite fuser may override weights per regime or from learned data.

pub mod composite;
pub mod macro_cycle;
pub mod manager_alpha;
pub mod mean_reversion;
pub mod momentum;
pub mod monte_carlo;
pub mod trend_following;
pub mod valuation;
pub mod walk_forward;

use std::sync::Arc;

use thiserror::Error;

use crate::models::{FundBook, MarketData, Signal};

/// A signal-generating strategy. `generate` must be deterministic for the
/// same inputs and free of shared mutable state so strategies can run on
/// parallel workers.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Default weight used when neither regime defaults nor learned weights
    /// cover this strategy.
    fn default_weight(&self) -> f64;

    fn generate(&self, market: &MarketData, funds: &FundBook) -> Vec<Signal>;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate strategy name: {0}")]
    DuplicateName(String),
}

/// Ordered strategy registry. Registration order is the execution order.
#[derive(Default)]
pub struct StrategyRegistry {
    entries: Vec<Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) -> Result<(), RegistryError> {
        if self.entries.iter().any(|s| s.name() == strategy.name()) {
            return Err(RegistryError::DuplicateName(strategy.name().to_string()));
        }
        self.entries.push(strategy);
        Ok(())
    }

    /// Explicit discovery of the built-in strategy set.
    pub fn discover() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register(Arc::new(trend_following::TrendFollowing))?;
        registry.register(Arc::new(mean_reversion::MeanReversion))?;
        registry.register(Arc::new(momentum::Momentum::default()))?;
        registry.register(Arc::new(valuation::ValuationTiming))?;
        registry.register(Arc::new(macro_cycle::MacroCycle))?;
        registry.register(Arc::new(manager_alpha::ManagerAlpha))?;
        Ok(registry)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|s| s.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Strategy>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
