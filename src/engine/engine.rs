//! Process-wide duel engine: owns every live session and the external
//! collaborators.
//!
//! All session mutation happens under the write lock, so per-session updates
//! are strictly sequential. The two background effects a resolution can spawn
//! (the training notification and the pool refill) re-acquire the lock on
//! their own and never block the caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::session::{DuelSession, ResolveOutcome};
use crate::engine::types::{SelectedTags, SessionPhase, SessionSnapshot, WinnerSide};
use crate::error::EngineError;
use crate::services::catalog::CatalogProvider;
use crate::services::trainer::TrainingSink;

pub struct DuelEngine {
    config: EngineConfig,
    catalog: Arc<dyn CatalogProvider>,
    trainer: Arc<dyn TrainingSink>,
    sessions: Arc<RwLock<HashMap<String, DuelSession>>>,
}

impl DuelEngine {
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn CatalogProvider>,
        trainer: Arc<dyn TrainingSink>,
    ) -> Self {
        Self {
            config,
            catalog,
            trainer,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Starts a session: validates the tag selection, fetches the initial
    /// batch (plus the base model snapshot) from the catalog, and seeds the
    /// session-local state.
    pub async fn start_session(
        &self,
        selection: &SelectedTags,
    ) -> Result<SessionSnapshot, EngineError> {
        let count = selection.count();
        if count < self.config.min_tags || count > self.config.max_tags {
            return Err(EngineError::InvalidTagSelection {
                count,
                min: self.config.min_tags,
                max: self.config.max_tags,
            });
        }

        let tags = selection.flatten();
        let batch = self.catalog.fetch_batch(&tags).await?;
        let session_id = batch
            .session_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if !batch.base_weights.as_ref().is_some_and(|w| w.is_fitted) {
            debug!(
                %session_id,
                "no fitted base model yet; ranking falls back to catalog order"
            );
        }

        let session = DuelSession::new(
            session_id.clone(),
            tags,
            batch.base_weights,
            batch.activities,
            &self.config,
        );
        let snapshot = session.snapshot();
        self.sessions.write().await.insert(session_id.clone(), session);

        info!(
            %session_id,
            pool = snapshot.pool_size,
            phase = ?snapshot.phase,
            "duel session started"
        );
        Ok(snapshot)
    }

    /// Resolves one duel choice. Spawns the fire-and-forget trainer
    /// notification and, when the pool drops to the threshold with no fetch
    /// already outstanding, the single-flight replenishment task. A choice
    /// against a session stuck without a pair doubles as the retry signal:
    /// it re-issues the catalog fetch instead of resolving anything.
    pub async fn resolve_choice(
        &self,
        session_id: &str,
        winner_side: WinnerSide,
    ) -> Result<SessionSnapshot, EngineError> {
        let (outcome, refill_armed, snapshot, tags) = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

            let outcome = session.resolve(winner_side);
            let refill_armed = match outcome {
                ResolveOutcome::Resolved {
                    refill_needed: true,
                    ..
                } => {
                    session.begin_refill();
                    true
                }
                // no pair to resolve: the session can only leave "cannot
                // duel" through a successful fetch, so arm one unless a
                // fetch is already outstanding
                ResolveOutcome::Ignored
                    if session.phase() == SessionPhase::CannotDuel
                        && !session.refill_in_flight() =>
                {
                    session.begin_refill();
                    true
                }
                _ => false,
            };
            (
                outcome,
                refill_armed,
                session.snapshot(),
                session.context_tags().to_vec(),
            )
        };

        match outcome {
            ResolveOutcome::Ignored => {
                debug!(session_id, "stale choice ignored");
            }
            ResolveOutcome::Resolved { winner_id, .. } => {
                self.spawn_training_notify(session_id.to_string(), winner_id, tags.clone());
            }
        }
        if refill_armed {
            self.spawn_refill(session_id.to_string(), tags);
        }

        Ok(snapshot)
    }

    pub async fn session_snapshot(
        &self,
        session_id: &str,
    ) -> Result<SessionSnapshot, EngineError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|s| s.snapshot())
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))
    }

    /// Discards a session and its local model. Returns whether it existed.
    pub async fn end_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            info!(session_id, "duel session ended");
        }
        removed
    }

    /// Drops sessions idle longer than the configured TTL. Returns how many
    /// were pruned.
    pub async fn prune_idle_sessions(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.session_idle_secs);
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.last_activity() >= cutoff);
        let pruned = before - sessions.len();
        if pruned > 0 {
            info!(pruned, "idle session cleanup completed");
        }
        pruned
    }

    fn spawn_training_notify(&self, session_id: String, winner_id: i64, tags: Vec<String>) {
        let trainer = Arc::clone(&self.trainer);
        tokio::spawn(async move {
            if let Err(err) = trainer.notify_choice(&session_id, winner_id, &tags).await {
                warn!(error = %err, %session_id, "base model training notification failed");
            }
        });
    }

    fn spawn_refill(&self, session_id: String, tags: Vec<String>) {
        let catalog = Arc::clone(&self.catalog);
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            let result = catalog.fetch_batch(&tags).await;
            let mut sessions = sessions.write().await;
            let Some(session) = sessions.get_mut(&session_id) else {
                // session ended while the fetch was in flight
                return;
            };
            match result {
                Ok(batch) => {
                    let added = session.complete_refill(batch.activities);
                    debug!(%session_id, added, "pool replenished");
                }
                Err(err) => {
                    session.abort_refill();
                    warn!(error = %err, %session_id, "replenishment fetch failed");
                }
            }
        });
    }
}
