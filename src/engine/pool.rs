//! Working set of duel candidates.
//!
//! The pool is re-ranked under the session model after every resolution; duel
//! participants are sampled from the top tier of the ranking rather than the
//! literal top two, so near-top candidates still face each other. Randomness
//! lives only in duel selection; the sort itself is stable and deterministic.

use std::cmp::Ordering;

use rand::Rng;

use crate::engine::model::{self, ModelParameters};
use crate::engine::types::{Activity, DuelState};

#[derive(Debug, Clone, Default)]
pub struct CandidatePool {
    activities: Vec<Activity>,
}

/// Score of one activity under the session model: its embedding against the
/// context, or the neutral 0.0 when either the embedding or a fitted model is
/// missing.
pub fn activity_score(
    params: Option<&ModelParameters>,
    context: &[f64],
    activity: &Activity,
) -> f64 {
    match (params, activity.embedding.as_deref()) {
        (Some(p), Some(embedding)) if !embedding.is_empty() => {
            model::score(p, context, embedding)
        }
        _ => 0.0,
    }
}

impl CandidatePool {
    pub fn new(activities: Vec<Activity>) -> Self {
        Self { activities }
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    pub fn contains(&self, id: i64) -> bool {
        self.activities.iter().any(|a| a.id == id)
    }

    /// Appends refill candidates, skipping ids already pooled so a repeated
    /// catalog batch cannot double-count an activity.
    pub fn append(&mut self, incoming: Vec<Activity>) -> usize {
        let mut added = 0;
        for activity in incoming {
            if !self.contains(activity.id) {
                self.activities.push(activity);
                added += 1;
            }
        }
        added
    }

    /// Re-sorts descending by score. Stable: equal scores keep their prior
    /// relative order, so an unfitted model leaves the catalog order intact.
    pub fn rank(&mut self, params: Option<&ModelParameters>, context: &[f64]) {
        let mut scored: Vec<(f64, Activity)> = self
            .activities
            .drain(..)
            .map(|activity| (activity_score(params, context, &activity), activity))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        self.activities = scored.into_iter().map(|(_, activity)| activity).collect();
    }

    /// Number of ranked entries eligible for duel sampling:
    /// `max(2, floor(len * fraction))`, clamped to the pool size.
    pub fn top_tier_len(&self, fraction: f64) -> usize {
        let scaled = (self.activities.len() as f64 * fraction).floor() as usize;
        scaled.max(2).min(self.activities.len())
    }

    /// Draws the next duel pair from the top tier of the ranked pool.
    ///
    /// Fewer than 2 candidates is an expected, recoverable condition: the
    /// degenerate state comes back with an empty right slot (or both empty)
    /// and the caller surfaces "cannot duel".
    pub fn draw_duel<R: Rng>(&self, fraction: f64, rng: &mut R) -> DuelState {
        if self.activities.len() < 2 {
            return DuelState {
                left: self.activities.first().cloned(),
                right: None,
            };
        }

        let tier = self.top_tier_len(fraction);
        let left_index = rng.gen_range(0..tier);
        let mut right_index = rng.gen_range(0..tier);
        while right_index == left_index && tier > 1 {
            right_index = rng.gen_range(0..tier);
        }

        DuelState {
            left: Some(self.activities[left_index].clone()),
            right: Some(self.activities[right_index].clone()),
        }
    }

    /// Draws a fresh opponent from the top tier, excluding the pinned winner.
    /// Falls back to the rest of the pool if the tier holds only the winner.
    pub fn draw_opponent<R: Rng>(
        &self,
        exclude_id: i64,
        fraction: f64,
        rng: &mut R,
    ) -> Option<Activity> {
        let tier = self.top_tier_len(fraction);
        let tier_candidates: Vec<&Activity> = self.activities[..tier]
            .iter()
            .filter(|a| a.id != exclude_id)
            .collect();
        if !tier_candidates.is_empty() {
            return Some(tier_candidates[rng.gen_range(0..tier_candidates.len())].clone());
        }

        let rest: Vec<&Activity> = self
            .activities
            .iter()
            .filter(|a| a.id != exclude_id)
            .collect();
        if rest.is_empty() {
            return None;
        }
        Some(rest[rng.gen_range(0..rest.len())].clone())
    }

    /// Removes exactly the loser by id; the winner stays pooled. Returns
    /// whether anything was removed (false for a stale eviction).
    pub fn evict(&mut self, loser_id: i64) -> bool {
        let before = self.activities.len();
        self.activities.retain(|a| a.id != loser_id);
        self.activities.len() != before
    }
}
