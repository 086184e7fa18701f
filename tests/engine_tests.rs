//! End-to-end tests for the duel engine with mock catalog and trainer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use whatnow_engine::config::EngineConfig;
use whatnow_engine::engine::model::ModelParameters;
use whatnow_engine::engine::types::{Activity, SelectedTags, SessionPhase, WinnerSide};
use whatnow_engine::engine::DuelEngine;
use whatnow_engine::error::EngineError;
use whatnow_engine::services::catalog::{CatalogBatch, CatalogError, CatalogProvider};
use whatnow_engine::services::trainer::{TrainerError, TrainingSink};

fn activity(id: i64, value: f64) -> Activity {
    Activity {
        id,
        name: format!("activity-{id}"),
        embedding: Some(vec![value; 8]),
    }
}

fn fitted_base() -> ModelParameters {
    let mut params = ModelParameters::new(384);
    params.coef[0][0] = 1.0;
    params.is_fitted = true;
    params
}

fn selection() -> SelectedTags {
    SelectedTags {
        weather: Some("sunny".to_string()),
        time: Some("morning".to_string()),
        season: None,
        intensity: Some("chill".to_string()),
        mood: Vec::new(),
    }
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        rng_seed: Some(7),
        ..EngineConfig::default()
    }
}

struct MockCatalog {
    calls: AtomicUsize,
    initial: Mutex<VecDeque<CatalogBatch>>,
    refill: Vec<Activity>,
    refill_gate: Option<Arc<Notify>>,
    fail_next_refills: AtomicUsize,
}

impl MockCatalog {
    fn new(initial_activities: Vec<Activity>, refill: Vec<Activity>) -> Self {
        let first = CatalogBatch {
            session_id: Some("sess-1".to_string()),
            activities: initial_activities,
            base_weights: Some(fitted_base()),
        };
        Self {
            calls: AtomicUsize::new(0),
            initial: Mutex::new(VecDeque::from([first])),
            refill,
            refill_gate: None,
            fail_next_refills: AtomicUsize::new(0),
        }
    }

    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.refill_gate = Some(gate);
        self
    }

    fn failing_refills(self, count: usize) -> Self {
        self.fail_next_refills.store(count, Ordering::SeqCst);
        self
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogProvider for MockCatalog {
    async fn fetch_batch(&self, _context_tags: &[String]) -> Result<CatalogBatch, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(first) = self.initial.lock().unwrap().pop_front() {
            return Ok(first);
        }
        if let Some(gate) = &self.refill_gate {
            gate.notified().await;
        }
        let failures_left = self.fail_next_refills.load(Ordering::SeqCst);
        if failures_left > 0 {
            self.fail_next_refills.store(failures_left - 1, Ordering::SeqCst);
            return Err(CatalogError::HttpStatus {
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                body: "mock failure".to_string(),
            });
        }
        Ok(CatalogBatch {
            session_id: None,
            activities: self.refill.clone(),
            base_weights: None,
        })
    }
}

#[derive(Default)]
struct MockTrainer {
    notifications: Mutex<Vec<(String, i64)>>,
}

#[async_trait]
impl TrainingSink for MockTrainer {
    async fn notify_choice(
        &self,
        session_id: &str,
        chosen_activity_id: i64,
        _context_tags: &[String],
    ) -> Result<(), TrainerError> {
        self.notifications
            .lock()
            .unwrap()
            .push((session_id.to_string(), chosen_activity_id));
        Ok(())
    }
}

fn build_engine(
    catalog: Arc<MockCatalog>,
    trainer: Arc<MockTrainer>,
) -> DuelEngine {
    DuelEngine::new(engine_config(), catalog, trainer)
}

async fn wait_for_refill_settled(engine: &DuelEngine, session_id: &str) {
    for _ in 0..400 {
        let snapshot = engine.session_snapshot(session_id).await.unwrap();
        if !snapshot.refill_in_flight {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("refill never settled");
}

#[tokio::test]
async fn start_session_draws_from_the_top_tier() {
    // 12 candidates with strictly increasing scores: the tier is
    // max(2, floor(12 * 0.2)) = 2, so the first pair comes from ids {11, 10}.
    let catalog = Arc::new(MockCatalog::new(
        (0..12).map(|id| activity(id, id as f64 / 100.0)).collect(),
        Vec::new(),
    ));
    let engine = build_engine(Arc::clone(&catalog), Arc::new(MockTrainer::default()));

    let snapshot = engine.start_session(&selection()).await.unwrap();
    assert_eq!(snapshot.session_id, "sess-1");
    assert_eq!(snapshot.phase, SessionPhase::AwaitingChoice);
    assert_eq!(snapshot.pool_size, 12);

    let left = snapshot.left.unwrap();
    let right = snapshot.right.unwrap();
    assert_ne!(left.id, right.id);
    for id in [left.id, right.id] {
        assert!(id == 11 || id == 10, "duelist {id} outside the top tier");
    }
}

#[tokio::test]
async fn tag_selection_bounds_are_enforced() {
    let catalog = Arc::new(MockCatalog::new(Vec::new(), Vec::new()));
    let engine = build_engine(catalog, Arc::new(MockTrainer::default()));

    let too_few = SelectedTags {
        weather: Some("sunny".to_string()),
        ..SelectedTags::default()
    };
    let err = engine.start_session(&too_few).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTagSelection { count: 1, min: 3, max: 8 }
    ));
}

#[tokio::test]
async fn unknown_session_is_an_explicit_error() {
    let catalog = Arc::new(MockCatalog::new(Vec::new(), Vec::new()));
    let engine = build_engine(catalog, Arc::new(MockTrainer::default()));
    let err = engine
        .resolve_choice("missing", WinnerSide::Left)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionNotFound(_)));
}

#[tokio::test]
async fn resolve_notifies_the_training_sink() {
    let catalog = Arc::new(MockCatalog::new(
        (0..20).map(|id| activity(id, id as f64 / 100.0)).collect(),
        Vec::new(),
    ));
    let trainer = Arc::new(MockTrainer::default());
    let engine = build_engine(catalog, Arc::clone(&trainer));

    let snapshot = engine.start_session(&selection()).await.unwrap();
    let winner_id = snapshot.left.as_ref().unwrap().id;
    engine
        .resolve_choice(&snapshot.session_id, WinnerSide::Left)
        .await
        .unwrap();

    for _ in 0..400 {
        if !trainer.notifications.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let notifications = trainer.notifications.lock().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0], ("sess-1".to_string(), winner_id));
}

#[tokio::test]
async fn replenishment_is_single_flight_per_session() {
    let gate = Arc::new(Notify::new());
    let catalog = Arc::new(
        MockCatalog::new(
            (0..12).map(|id| activity(id, id as f64 / 100.0)).collect(),
            (100..120).map(|id| activity(id, 0.5)).collect(),
        )
        .gated(Arc::clone(&gate)),
    );
    let engine = build_engine(Arc::clone(&catalog), Arc::new(MockTrainer::default()));

    let snapshot = engine.start_session(&selection()).await.unwrap();
    let session_id = snapshot.session_id;

    // pool 12 -> 11: still healthy, no refill
    let snapshot = engine
        .resolve_choice(&session_id, WinnerSide::Left)
        .await
        .unwrap();
    assert_eq!(snapshot.pool_size, 11);
    assert!(!snapshot.refill_in_flight);

    // pool 11 -> 10: at the threshold, exactly one fetch goes out
    let snapshot = engine
        .resolve_choice(&session_id, WinnerSide::Left)
        .await
        .unwrap();
    assert_eq!(snapshot.pool_size, 10);
    assert!(snapshot.refill_in_flight);
    assert_eq!(snapshot.phase, SessionPhase::AwaitingChoice);

    // a second resolution while the fetch is outstanding must not issue
    // another one
    let snapshot = engine
        .resolve_choice(&session_id, WinnerSide::Left)
        .await
        .unwrap();
    assert_eq!(snapshot.pool_size, 9);
    assert!(snapshot.refill_in_flight);
    assert_eq!(catalog.call_count(), 2); // initial + one refill

    let shown_left = snapshot.left.as_ref().unwrap().id;
    let shown_right = snapshot.right.as_ref().unwrap().id;

    gate.notify_one();
    wait_for_refill_settled(&engine, &session_id).await;

    let snapshot = engine.session_snapshot(&session_id).await.unwrap();
    assert_eq!(catalog.call_count(), 2);
    assert_eq!(snapshot.pool_size, 29); // 9 + 20 refill
    // ready pair survives the merge untouched
    assert_eq!(snapshot.left.unwrap().id, shown_left);
    assert_eq!(snapshot.right.unwrap().id, shown_right);
}

#[tokio::test]
async fn depleted_session_recovers_after_refill() {
    let catalog = Arc::new(MockCatalog::new(
        vec![activity(1, 0.1), activity(2, 0.2)],
        (50..62).map(|id| activity(id, 0.3)).collect(),
    ));
    let engine = build_engine(Arc::clone(&catalog), Arc::new(MockTrainer::default()));

    let snapshot = engine.start_session(&selection()).await.unwrap();
    let session_id = snapshot.session_id;

    let snapshot = engine
        .resolve_choice(&session_id, WinnerSide::Left)
        .await
        .unwrap();
    assert_eq!(snapshot.phase, SessionPhase::CannotDuel);
    assert_eq!(snapshot.pool_size, 1);
    assert!(snapshot.refill_in_flight);
    let survivor = snapshot.left.unwrap().id;

    wait_for_refill_settled(&engine, &session_id).await;
    let snapshot = engine.session_snapshot(&session_id).await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::AwaitingChoice);
    assert_eq!(snapshot.left.unwrap().id, survivor);
    assert!(snapshot.right.is_some());
}

#[tokio::test]
async fn failed_refill_leaves_last_good_state_and_rearms() {
    let catalog = Arc::new(
        MockCatalog::new(
            (0..11).map(|id| activity(id, id as f64 / 100.0)).collect(),
            Vec::new(),
        )
        .failing_refills(2),
    );
    let engine = build_engine(Arc::clone(&catalog), Arc::new(MockTrainer::default()));

    let snapshot = engine.start_session(&selection()).await.unwrap();
    let session_id = snapshot.session_id;

    let snapshot = engine
        .resolve_choice(&session_id, WinnerSide::Left)
        .await
        .unwrap();
    assert_eq!(snapshot.pool_size, 10);
    assert!(snapshot.refill_in_flight);

    wait_for_refill_settled(&engine, &session_id).await;
    let snapshot = engine.session_snapshot(&session_id).await.unwrap();
    assert_eq!(snapshot.pool_size, 10);
    assert_eq!(snapshot.phase, SessionPhase::AwaitingChoice);
    assert_eq!(catalog.call_count(), 2);

    // next resolution re-arms the trigger
    let snapshot = engine
        .resolve_choice(&session_id, WinnerSide::Left)
        .await
        .unwrap();
    assert!(snapshot.refill_in_flight);
    wait_for_refill_settled(&engine, &session_id).await;
    assert_eq!(catalog.call_count(), 3);
}

#[tokio::test]
async fn stalled_session_retries_refill_on_next_choice() {
    // A depleted session whose replenishment fetch failed has no pair left to
    // resolve, so re-arming cannot ride on a resolution. The next choice
    // against the stuck session must re-issue the fetch itself.
    let catalog = Arc::new(
        MockCatalog::new(
            vec![activity(1, 0.1), activity(2, 0.2)],
            (50..62).map(|id| activity(id, 0.3)).collect(),
        )
        .failing_refills(1),
    );
    let engine = build_engine(Arc::clone(&catalog), Arc::new(MockTrainer::default()));

    let snapshot = engine.start_session(&selection()).await.unwrap();
    let session_id = snapshot.session_id;

    // pool 2 -> 1: depleted, and the triggered fetch fails
    let snapshot = engine
        .resolve_choice(&session_id, WinnerSide::Left)
        .await
        .unwrap();
    assert_eq!(snapshot.phase, SessionPhase::CannotDuel);
    assert!(snapshot.refill_in_flight);
    let survivor = snapshot.left.unwrap().id;

    wait_for_refill_settled(&engine, &session_id).await;
    let snapshot = engine.session_snapshot(&session_id).await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::CannotDuel);
    assert_eq!(catalog.call_count(), 2);

    // the retry: nothing resolves, but a fresh fetch goes out
    let snapshot = engine
        .resolve_choice(&session_id, WinnerSide::Left)
        .await
        .unwrap();
    assert!(snapshot.refill_in_flight);
    wait_for_refill_settled(&engine, &session_id).await;

    let snapshot = engine.session_snapshot(&session_id).await.unwrap();
    assert_eq!(catalog.call_count(), 3);
    assert_eq!(snapshot.phase, SessionPhase::AwaitingChoice);
    assert_eq!(snapshot.pool_size, 13); // survivor + 12 refill
    assert_eq!(snapshot.left.unwrap().id, survivor);
}

#[tokio::test]
async fn session_started_below_pair_size_recovers_via_retry() {
    let catalog = Arc::new(MockCatalog::new(
        vec![activity(1, 0.1)],
        (50..62).map(|id| activity(id, 0.3)).collect(),
    ));
    let engine = build_engine(Arc::clone(&catalog), Arc::new(MockTrainer::default()));

    let snapshot = engine.start_session(&selection()).await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::CannotDuel);
    assert!(!snapshot.refill_in_flight);
    let session_id = snapshot.session_id;

    let snapshot = engine
        .resolve_choice(&session_id, WinnerSide::Left)
        .await
        .unwrap();
    assert!(snapshot.refill_in_flight);
    wait_for_refill_settled(&engine, &session_id).await;

    let snapshot = engine.session_snapshot(&session_id).await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::AwaitingChoice);
    assert_eq!(snapshot.pool_size, 13);
    assert_eq!(catalog.call_count(), 2);
}

#[tokio::test]
async fn win_streak_evicts_exactly_one_loser_per_choice() {
    // The left slot wins 50 times in a row: every resolution evicts exactly
    // the loser and keeps presenting a ready pair while the pool holds out.
    let catalog = Arc::new(MockCatalog::new(
        (0..60).map(|id| activity(id, 0.01)).collect(),
        Vec::new(),
    ));
    let engine = build_engine(catalog, Arc::new(MockTrainer::default()));

    let snapshot = engine.start_session(&selection()).await.unwrap();
    let session_id = snapshot.session_id;

    for _ in 0..50 {
        let snapshot = engine.session_snapshot(&session_id).await.unwrap();
        if snapshot.phase != SessionPhase::AwaitingChoice {
            break;
        }
        engine
            .resolve_choice(&session_id, WinnerSide::Left)
            .await
            .unwrap();
    }

    // one eviction per resolution: 60 candidates minus 50 losers
    let snapshot = engine.session_snapshot(&session_id).await.unwrap();
    assert_eq!(snapshot.pool_size, 10);
    assert_eq!(snapshot.phase, SessionPhase::AwaitingChoice);
}

#[tokio::test]
async fn end_and_prune_sessions() {
    let catalog = Arc::new(MockCatalog::new(
        (0..12).map(|id| activity(id, 0.1)).collect(),
        Vec::new(),
    ));
    let engine = DuelEngine::new(
        EngineConfig {
            rng_seed: Some(7),
            session_idle_secs: 0,
            ..EngineConfig::default()
        },
        catalog,
        Arc::new(MockTrainer::default()),
    );

    let snapshot = engine.start_session(&selection()).await.unwrap();
    assert_eq!(engine.session_count().await, 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(engine.prune_idle_sessions().await, 1);
    assert_eq!(engine.session_count().await, 0);

    let err = engine
        .session_snapshot(&snapshot.session_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionNotFound(_)));
    assert!(!engine.end_session(&snapshot.session_id).await);
}
