use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Step size for the per-choice gradient update. Session-fixed, not annealed.
    pub learning_rate: f64,
    pub context_dim: usize,
    pub embedding_dim: usize,
    /// Pool size at or below which a catalog refill is requested.
    pub replenish_threshold: usize,
    /// Fraction of the ranked pool eligible for duel sampling (at least 2 entries).
    pub top_tier_fraction: f64,
    pub min_tags: usize,
    pub max_tags: usize,
    /// Fixed seed for duel sampling; None seeds from entropy.
    pub rng_seed: Option<u64>,
    /// Sessions idle longer than this many seconds are dropped by pruning.
    pub session_idle_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.8,
            context_dim: 43,
            embedding_dim: 384,
            replenish_threshold: 10,
            top_tier_fraction: 0.2,
            min_tags: 3,
            max_tags: 8,
            rng_seed: None,
            session_idle_secs: 1800,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DUEL_LEARNING_RATE") {
            config.learning_rate = val.parse().unwrap_or(config.learning_rate);
        }
        if let Ok(val) = std::env::var("DUEL_REPLENISH_THRESHOLD") {
            config.replenish_threshold = val.parse().unwrap_or(config.replenish_threshold);
        }
        if let Ok(val) = std::env::var("DUEL_TOP_TIER_FRACTION") {
            config.top_tier_fraction = val.parse().unwrap_or(config.top_tier_fraction);
        }
        if let Ok(val) = std::env::var("DUEL_SESSION_IDLE_SECS") {
            config.session_idle_secs = val.parse().unwrap_or(config.session_idle_secs);
        }

        config
    }
}
