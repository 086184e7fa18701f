//! Per-session duel state machine.
//!
//! A session owns a private copy of the base model, the candidate pool, and
//! the currently presented pair. It is driven strictly sequentially by the
//! engine: resolve one choice, update the model, re-rank, draw the next pair.
//! Replenishment is the only thing that happens concurrently, and it is
//! single-flight: `refill_in_flight` arms at most one fetch at a time.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::engine::context;
use crate::engine::model::{self, ModelParameters};
use crate::engine::pool::CandidatePool;
use crate::engine::types::{
    Activity, DuelState, SessionPhase, SessionSnapshot, WinnerSide,
};

/// What a resolution did, from the engine's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Stale or duplicate event: the duel had a missing slot. Nothing changed.
    Ignored,
    Resolved {
        winner_id: i64,
        /// Pool dropped to the replenishment threshold and no fetch is
        /// already in flight.
        refill_needed: bool,
    },
}

pub struct DuelSession {
    id: String,
    context_tags: Vec<String>,
    context: Vec<f64>,
    params: Option<ModelParameters>,
    learning_rate: f64,
    top_tier_fraction: f64,
    replenish_threshold: usize,
    pool: CandidatePool,
    duel: DuelState,
    phase: SessionPhase,
    refill_in_flight: bool,
    last_activity: DateTime<Utc>,
    rng: StdRng,
}

impl DuelSession {
    /// Seeds the session: deep-copies the base weights (ownership of the
    /// deserialized value, so later updates never touch the upstream model),
    /// encodes the context, ranks the initial candidates, draws the first
    /// pair. The only seeding point; never re-run mid-session.
    pub fn new(
        id: String,
        context_tags: Vec<String>,
        base_weights: Option<ModelParameters>,
        initial_candidates: Vec<Activity>,
        config: &EngineConfig,
    ) -> Self {
        let context = context::encode(&context_tags);
        let mut rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut pool = CandidatePool::new(initial_candidates);
        pool.rank(base_weights.as_ref(), &context);
        let duel = pool.draw_duel(config.top_tier_fraction, &mut rng);
        let phase = if duel.is_ready() {
            SessionPhase::AwaitingChoice
        } else {
            SessionPhase::CannotDuel
        };

        Self {
            id,
            context_tags,
            context,
            params: base_weights,
            learning_rate: config.learning_rate,
            top_tier_fraction: config.top_tier_fraction,
            replenish_threshold: config.replenish_threshold,
            pool,
            duel,
            phase,
            refill_in_flight: false,
            last_activity: Utc::now(),
            rng,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context_tags(&self) -> &[String] {
        &self.context_tags
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    pub fn refill_in_flight(&self) -> bool {
        self.refill_in_flight
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    #[cfg(test)]
    pub fn params(&self) -> Option<&ModelParameters> {
        self.params.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            phase: self.phase,
            left: self.duel.left.clone(),
            right: self.duel.right.clone(),
            pool_size: self.pool.len(),
            refill_in_flight: self.refill_in_flight,
        }
    }

    /// Resolves the presented duel: evicts the loser, takes one gradient step
    /// for the winner, re-ranks, and draws the next pair with the winner
    /// pinned in its former slot.
    pub fn resolve(&mut self, winner_side: WinnerSide) -> ResolveOutcome {
        let (winner, loser) = match (&self.duel.left, &self.duel.right) {
            (Some(left), Some(right)) => match winner_side {
                WinnerSide::Left => (left.clone(), right.clone()),
                WinnerSide::Right => (right.clone(), left.clone()),
            },
            _ => return ResolveOutcome::Ignored,
        };

        self.last_activity = Utc::now();
        self.pool.evict(loser.id);

        match self.params.as_mut() {
            Some(params) if winner.has_embedding() => {
                let embedding = winner.embedding.as_deref().unwrap_or_default();
                model::update(params, &self.context, embedding, 1.0, self.learning_rate);
            }
            Some(_) => {
                // Ranking quality degrades for this one event; the session
                // keeps going.
                warn!(
                    session_id = %self.id,
                    activity_id = winner.id,
                    "winner has no embedding, skipping session model update"
                );
            }
            None => {}
        }

        self.pool.rank(self.params.as_ref(), &self.context);

        let refill_needed =
            self.pool.len() <= self.replenish_threshold && !self.refill_in_flight;

        if self.pool.len() >= 2 {
            match self
                .pool
                .draw_opponent(winner.id, self.top_tier_fraction, &mut self.rng)
            {
                Some(opponent) => {
                    self.duel = match winner_side {
                        WinnerSide::Left => DuelState {
                            left: Some(winner.clone()),
                            right: Some(opponent),
                        },
                        WinnerSide::Right => DuelState {
                            left: Some(opponent),
                            right: Some(winner.clone()),
                        },
                    };
                    self.phase = SessionPhase::AwaitingChoice;
                }
                None => {
                    self.duel = DuelState {
                        left: Some(winner.clone()),
                        right: None,
                    };
                    self.phase = SessionPhase::CannotDuel;
                }
            }
        } else {
            self.duel = DuelState {
                left: Some(winner.clone()),
                right: None,
            };
            self.phase = SessionPhase::CannotDuel;
        }

        ResolveOutcome::Resolved {
            winner_id: winner.id,
            refill_needed,
        }
    }

    /// Marks a replenishment fetch as in flight. Caller must hold the session
    /// exclusively (the engine's write lock).
    pub fn begin_refill(&mut self) {
        self.refill_in_flight = true;
    }

    /// Merges a completed refill: appends (deduplicated), re-ranks, and, only
    /// if the session had no ready pair, draws a fresh one, keeping a
    /// surviving left-slot winner pinned. A ready pair is never replaced by a
    /// refill.
    pub fn complete_refill(&mut self, incoming: Vec<Activity>) -> usize {
        self.refill_in_flight = false;
        let added = self.pool.append(incoming);
        self.pool.rank(self.params.as_ref(), &self.context);

        if !self.duel.is_ready() && self.pool.len() >= 2 {
            let pinned = self
                .duel
                .left
                .clone()
                .filter(|winner| self.pool.contains(winner.id));
            self.duel = match pinned {
                Some(winner) => {
                    let opponent = self.pool.draw_opponent(
                        winner.id,
                        self.top_tier_fraction,
                        &mut self.rng,
                    );
                    DuelState {
                        left: Some(winner),
                        right: opponent,
                    }
                }
                None => self.pool.draw_duel(self.top_tier_fraction, &mut self.rng),
            };
        }
        self.phase = if self.duel.is_ready() {
            SessionPhase::AwaitingChoice
        } else {
            SessionPhase::CannotDuel
        };

        debug!(session_id = %self.id, added, pool = self.pool.len(), "refill merged");
        added
    }

    /// Clears the single-flight flag after a failed fetch so the next
    /// resolution can re-arm replenishment. The session keeps its last good
    /// state.
    pub fn abort_refill(&mut self) {
        self.refill_in_flight = false;
    }
}
