//! Tests du calculateur et de sa tâche de sondage, sur une horloge suspendue.

use super::*;
use crate::cache::InteractionResult;
use crate::database::current_timestamp;
use crate::error::{StoreError, SubmissionError};
use crate::models::{CacheRecord, Contraindications, Drug};
use crate::token::derive_token;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct FakeStore {
    records: Mutex<HashMap<CacheToken, CacheRecord>>,
    // Nombre de lectures à faire échouer.
    failures: AtomicUsize,
    lookups: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeStore {
    fn write(&self, token: CacheToken, interact: &str) {
        let now = current_timestamp();
        self.records.lock().unwrap().insert(
            token,
            CacheRecord {
                cache_token: token.to_string(),
                interact: Some(interact.to_string()),
                explanation: None,
                created_at: now,
                updated_at: now,
            },
        );
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for FakeStore {
    async fn fetch(&self, token: &CacheToken) -> Result<Option<CacheRecord>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            time::sleep(delay).await;
        }

        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError(sqlx::Error::PoolTimedOut));
        }

        Ok(self.records.lock().unwrap().get(token).cloned())
    }
}

#[derive(Default)]
struct FakeRequester {
    calls: AtomicUsize,
    reject_with: Option<u16>,
    delay: Option<Duration>,
}

impl FakeRequester {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InteractionRequester for FakeRequester {
    async fn submit(&self, _request: &InteractionRequest) -> Result<(), SubmissionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            time::sleep(delay).await;
        }
        match self.reject_with {
            Some(status) => Err(SubmissionError::Rejected(status)),
            None => Ok(()),
        }
    }
}

fn selection(id: i64, name: &str) -> DrugSelection {
    DrugSelection {
        name: name.to_string(),
        drug: Drug {
            id,
            commercial_name: name.to_string(),
            mnn_name: name.to_string(),
            active_substance: name.to_string(),
            lpid: format!("LP-{id:06}"),
            condition_value: None,
            owner: None,
            pharmacotherapeutic_groups: None,
            site_addresses: None,
            owners_country: None,
            ru_number: None,
            url: None,
            contraindications: Contraindications::default(),
        },
    }
}

fn pair_token() -> CacheToken {
    derive_token("Аспирин", "Ибупрофен")
}

fn selected(store: &Arc<FakeStore>, requester: &Arc<FakeRequester>) -> Calculator {
    selected_with(store, requester, PollPolicy::default())
}

fn selected_with(
    store: &Arc<FakeStore>,
    requester: &Arc<FakeRequester>,
    policy: PollPolicy,
) -> Calculator {
    let calculator = Calculator::new(store.clone(), requester.clone(), policy);
    calculator.select(Slot::First, Some(selection(1, " Аспирин ")));
    calculator.select(Slot::Second, Some(selection(2, "ИБУПРОФЕН")));
    calculator
}

#[tokio::test(start_paused = true)]
async fn cached_result_resolves_without_submission() {
    let store = Arc::new(FakeStore::default());
    let requester = Arc::new(FakeRequester::default());
    store.write(pair_token(), "Умеренная");
    let calculator = selected(&store, &requester);

    let session = calculator.calculate_and_settle().await.unwrap();

    assert_eq!(session.state, PollState::Resolved);
    assert_eq!(session.result.unwrap().interact, "Умеренная");
    assert_eq!(requester.calls(), 0);
    assert_eq!(store.lookups(), 1);
}

#[tokio::test(start_paused = true)]
async fn miss_submits_once_then_resolves_on_a_later_tick() {
    let store = Arc::new(FakeStore::default());
    let requester = Arc::new(FakeRequester::default());
    let calculator = selected(&store, &requester);

    let session = calculator.calculate_and_settle().await.unwrap();
    assert_eq!(session.state, PollState::Polling);
    assert_eq!(requester.calls(), 1);

    // Premier tick à 2s : toujours rien.
    time::sleep(Duration::from_millis(2_100)).await;
    let session = calculator.snapshot();
    assert_eq!(session.state, PollState::Polling);
    assert_eq!(session.attempts, 1);

    store.write(pair_token(), "Противопоказано");

    time::sleep(Duration::from_secs(2)).await;
    let session = calculator.snapshot();
    assert_eq!(session.state, PollState::Resolved);
    assert_eq!(session.attempts, 2);
    assert_eq!(session.result.unwrap().interact, "Противопоказано");
    assert_eq!(requester.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_submission_fails_without_polling() {
    let store = Arc::new(FakeStore::default());
    let requester = Arc::new(FakeRequester {
        reject_with: Some(500),
        ..FakeRequester::default()
    });
    let calculator = selected(&store, &requester);

    let session = calculator.calculate_and_settle().await.unwrap();
    assert_eq!(session.state, PollState::Failed);
    assert_eq!(session.failure, Some(FailureKind::SubmissionRejected));
    assert!(session.polling_since.is_none());

    time::sleep(Duration::from_secs(30)).await;
    assert_eq!(store.lookups(), 1);
    assert_eq!(calculator.snapshot().state, PollState::Failed);
}

#[tokio::test(start_paused = true)]
async fn no_result_times_out_exactly_once_at_the_ceiling() {
    let store = Arc::new(FakeStore::default());
    let requester = Arc::new(FakeRequester::default());
    let calculator = selected(&store, &requester);
    let started = Instant::now();

    let session = calculator.calculate_and_settle().await.unwrap();
    assert_eq!(session.state, PollState::Polling);

    let mut updates = calculator.subscribe();
    let finished = updates
        .wait_for(|s| s.state.is_terminal())
        .await
        .map(|s| Session::clone(&s))
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(finished.state, PollState::TimedOut);
    assert!(elapsed >= Duration::from_secs(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(301), "{elapsed:?}");
    // Ticks à 2s, 4s, ... 298s ; celui de 300s perd contre l'échéance.
    assert_eq!(finished.attempts, 149);

    let lookups = store.lookups();
    time::sleep(Duration::from_secs(60)).await;
    let after = calculator.snapshot();
    assert_eq!(after.state, PollState::TimedOut);
    assert_eq!(after.generation, finished.generation);
    assert_eq!(after.attempts, finished.attempts);
    assert_eq!(store.lookups(), lookups);
}

#[tokio::test(start_paused = true)]
async fn slow_lookup_cannot_outlive_the_ceiling() {
    let store = Arc::new(FakeStore::default());
    let requester = Arc::new(FakeRequester::default());
    let policy = PollPolicy::new(Duration::from_secs(2), Duration::from_secs(6)).unwrap();
    let calculator = selected_with(&store, &requester, policy);
    let started = Instant::now();

    calculator.calculate_and_settle().await.unwrap();
    *store.delay.lock().unwrap() = Some(Duration::from_secs(60));

    let mut updates = calculator.subscribe();
    updates.wait_for(|s| s.state.is_terminal()).await.unwrap();

    let elapsed = started.elapsed();
    assert_eq!(calculator.snapshot().state, PollState::TimedOut);
    assert!(elapsed >= Duration::from_secs(6), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(6_010), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn selection_change_cancels_pending_ticks() {
    let store = Arc::new(FakeStore::default());
    let requester = Arc::new(FakeRequester::default());
    let calculator = selected(&store, &requester);

    calculator.calculate_and_settle().await.unwrap();
    time::sleep(Duration::from_millis(2_100)).await;
    let polling = calculator.snapshot();
    assert_eq!(polling.attempts, 1);
    let lookups = store.lookups();

    let session = calculator.select(Slot::Second, Some(selection(3, "Варфарин")));
    assert_eq!(session.state, PollState::Idle);
    assert!(session.token.is_none());

    // Un tick programmé avant l'annulation ne change plus rien.
    assert!(!apply_guarded(
        &calculator.session,
        polling.generation,
        Event::PollMiss
    ));

    store.write(pair_token(), "Умеренная");
    time::sleep(Duration::from_secs(20)).await;
    let after = calculator.snapshot();
    assert_eq!(after.state, PollState::Idle);
    assert!(after.result.is_none());
    assert_eq!(store.lookups(), lookups);
}

#[tokio::test(start_paused = true)]
async fn stale_events_are_ignored_by_a_newer_run() {
    let store = Arc::new(FakeStore::default());
    let requester = Arc::new(FakeRequester::default());
    let calculator = selected(&store, &requester);

    let first_run = calculator.calculate_and_settle().await.unwrap();
    calculator.cancel();
    let second_run = calculator.calculate_and_settle().await.unwrap();
    assert_eq!(second_run.state, PollState::Polling);
    assert!(second_run.generation > first_run.generation);

    let stale = Event::CacheHit(InteractionResult::new("Минимальная".to_string(), None));
    assert!(!apply_guarded(&calculator.session, first_run.generation, stale));
    assert_eq!(calculator.snapshot().state, PollState::Polling);
    assert_eq!(requester.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn clear_while_awaiting_submission_drops_the_late_acceptance() {
    let store = Arc::new(FakeStore::default());
    let requester = Arc::new(FakeRequester {
        delay: Some(Duration::from_secs(5)),
        ..FakeRequester::default()
    });
    let calculator = selected(&store, &requester);

    let session = calculator.calculate().unwrap();
    assert_eq!(session.state, PollState::AwaitingSubmission);
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(requester.calls(), 1);

    let cleared = calculator.clear();
    assert_eq!(cleared.state, PollState::Idle);

    time::sleep(Duration::from_secs(30)).await;
    let after = calculator.snapshot();
    assert_eq!(after.state, PollState::Idle);
    assert!(after.first.is_none() && after.second.is_none());
    assert_eq!(store.lookups(), 1);
}

#[tokio::test(start_paused = true)]
async fn store_error_on_first_lookup_fails_the_run() {
    let store = Arc::new(FakeStore::default());
    store.failures.store(1, Ordering::SeqCst);
    let requester = Arc::new(FakeRequester::default());
    let calculator = selected(&store, &requester);

    let session = calculator.calculate_and_settle().await.unwrap();

    assert_eq!(session.state, PollState::Failed);
    assert_eq!(session.failure, Some(FailureKind::Store));
    assert_eq!(requester.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn store_errors_while_polling_skip_the_tick() {
    let store = Arc::new(FakeStore::default());
    let requester = Arc::new(FakeRequester::default());
    let calculator = selected(&store, &requester);

    calculator.calculate_and_settle().await.unwrap();
    store.failures.store(2, Ordering::SeqCst);

    time::sleep(Duration::from_millis(4_100)).await;
    let session = calculator.snapshot();
    assert_eq!(session.state, PollState::Polling);
    assert_eq!(session.attempts, 0);

    store.write(pair_token(), "Минимальная");
    time::sleep(Duration::from_secs(2)).await;
    assert_eq!(calculator.snapshot().state, PollState::Resolved);
}

#[tokio::test(start_paused = true)]
async fn calculate_is_refused_while_polling_or_incomplete() {
    let store = Arc::new(FakeStore::default());
    let requester = Arc::new(FakeRequester::default());

    let empty = Calculator::new(store.clone(), requester.clone(), PollPolicy::default());
    assert_eq!(
        empty.calculate().unwrap_err(),
        SessionError::IncompleteSelection
    );
    assert_eq!(empty.snapshot().state, PollState::Idle);

    let calculator = selected(&store, &requester);
    calculator.calculate_and_settle().await.unwrap();
    assert!(matches!(
        calculator.calculate(),
        Err(SessionError::InvalidTransition {
            state: PollState::Polling,
            ..
        })
    ));
    assert_eq!(requester.calls(), 1);
}

#[test]
fn poll_policy_requires_room_for_several_attempts() {
    assert!(PollPolicy::new(Duration::ZERO, Duration::from_secs(10)).is_err());
    assert!(PollPolicy::new(Duration::from_secs(10), Duration::from_secs(10)).is_err());
    assert!(PollPolicy::new(Duration::from_secs(4), Duration::from_secs(10)).is_err());
    assert!(PollPolicy::new(Duration::from_secs(2), Duration::from_secs(6)).is_ok());
    assert!(PollPolicy::new(Duration::from_secs(2), MAX_POLL_TIMEOUT).is_ok());
    assert!(PollPolicy::new(
        Duration::from_secs(2),
        MAX_POLL_TIMEOUT + Duration::from_secs(1)
    )
    .is_err());
    assert!(PollPolicy::new(Duration::from_secs(2), Duration::from_secs(u64::MAX)).is_err());

    let default = PollPolicy::default();
    assert_eq!(
        PollPolicy::new(default.interval(), default.timeout()).unwrap(),
        default
    );
}
