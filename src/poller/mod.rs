// Coordination entre une session de calcul, le cache partagé et le workflow externe.
mod session;

#[cfg(test)]
mod tests;

pub use session::{Event, FailureKind, PollState, Session};

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::cache::{CacheLookup, CacheStore};
use crate::error::{ConfigError, SessionError};
use crate::models::{DrugSelection, InteractionRequest, Slot};
use crate::requester::InteractionRequester;
use crate::token::CacheToken;

// Le plafond doit laisser passer au moins ce nombre de sondages.
pub const MIN_POLL_ATTEMPTS: u32 = 3;

// Au-delà, l'échéance `Instant + timeout` peut déborder.
pub const MAX_POLL_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    interval: Duration,
    timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero()
            || interval >= timeout
            || timeout > MAX_POLL_TIMEOUT
            || timeout < interval * MIN_POLL_ATTEMPTS
        {
            return Err(ConfigError::PollPolicy { interval, timeout });
        }
        Ok(Self { interval, timeout })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for PollPolicy {
    // Un sondage toutes les 2 secondes, abandon après 5 minutes.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }
}

// Tâche de fond d'un calcul. La lâcher annule la tâche, donc l'intervalle
// et l'échéance qu'elle porte, ensemble.
struct PollGuard(JoinHandle<()>);

impl Drop for PollGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Applique `event` seulement si la session est toujours à la génération `generation`.
/// La vérification et le remplacement se font sous le verrou du canal `watch`.
fn apply_guarded(session: &watch::Sender<Session>, generation: u64, event: Event) -> bool {
    session.send_if_modified(|current| {
        if current.generation != generation {
            return false;
        }
        match current.apply(event) {
            Ok(next) => {
                *current = next;
                true
            }
            Err(e) => {
                warn!("Ignoring stale poll event: {}", e);
                false
            }
        }
    })
}

/// Une session de calcul : l'enregistrement courant, diffusé via `watch`,
/// et au plus une tâche de fond.
pub struct Calculator {
    store: Arc<dyn CacheStore>,
    requester: Arc<dyn InteractionRequester>,
    policy: PollPolicy,
    session: Arc<watch::Sender<Session>>,
    task: Mutex<Option<PollGuard>>,
}

impl Calculator {
    pub fn new(
        store: Arc<dyn CacheStore>,
        requester: Arc<dyn InteractionRequester>,
        policy: PollPolicy,
    ) -> Self {
        let (session, _) = watch::channel(Session::default());
        Self {
            store,
            requester,
            policy,
            session: Arc::new(session),
            task: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> Session {
        self.session.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    pub fn select(&self, slot: Slot, selection: Option<DrugSelection>) -> Session {
        self.reset(Event::Select { slot, selection })
    }

    pub fn clear(&self) -> Session {
        self.reset(Event::Clear)
    }

    /// Arrête le calcul en cours sans toucher à la sélection.
    pub fn cancel(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        self.session.send_if_modified(|current| {
            if !current.state.is_running() {
                return false;
            }
            *current = Session {
                generation: current.generation + 1,
                state: PollState::Idle,
                token: None,
                result: None,
                failure: None,
                attempts: 0,
                polling_since: None,
                ..current.clone()
            };
            true
        });
        task.take();
    }

    // Nouvelle génération d'abord (les événements en vol sont rejetés), puis arrêt de la tâche.
    // Les deux sous le verrou de tâche : aucun calcul ne peut démarrer entre-temps.
    fn reset(&self, event: Event) -> Session {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        self.session.send_modify(|current| {
            if let Ok(next) = current.apply(event) {
                *current = next;
            }
        });
        task.take();
        self.snapshot()
    }

    /// Démarre un calcul et renvoie l'enregistrement `awaiting_submission`.
    /// La suite (lecture du cache, envoi, sondage) se déroule dans une tâche de fond.
    pub fn calculate(&self) -> Result<Session, SessionError> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);

        let mut outcome = Ok(());
        self.session.send_if_modified(|current| match current.apply(Event::Calculate) {
            Ok(next) => {
                *current = next;
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome?;

        let session = self.snapshot();
        let (Some(token), Some(request)) = (session.token, session.request()) else {
            return Err(SessionError::IncompleteSelection);
        };

        let driver = Driver {
            store: self.store.clone(),
            requester: self.requester.clone(),
            policy: self.policy,
            session: self.session.clone(),
            generation: session.generation,
            token,
        };
        *task = Some(PollGuard(tokio::spawn(driver.run(request))));

        Ok(session)
    }

    /// Comme `calculate`, mais attend que la session ait quitté `awaiting_submission`
    /// (résultat en cache, échec, ou sondage démarré).
    pub async fn calculate_and_settle(&self) -> Result<Session, SessionError> {
        let mut updates = self.subscribe();
        let started = self.calculate()?;

        let settled = updates
            .wait_for(|s| {
                s.generation != started.generation || s.state != PollState::AwaitingSubmission
            })
            .await
            .map(|s| Session::clone(&s));

        // L'émetteur vit aussi longtemps que `self` : l'erreur est impossible ici.
        Ok(settled.unwrap_or_else(|_| self.snapshot()))
    }
}

struct Driver {
    store: Arc<dyn CacheStore>,
    requester: Arc<dyn InteractionRequester>,
    policy: PollPolicy,
    session: Arc<watch::Sender<Session>>,
    generation: u64,
    token: CacheToken,
}

impl Driver {
    fn apply(&self, event: Event) -> bool {
        apply_guarded(&self.session, self.generation, event)
    }

    async fn run(self, request: InteractionRequest) {
        // --- Étape 1: lecture du cache ---
        match self.store.lookup(&self.token).await {
            Err(e) => {
                error!("Cache lookup failed for {}: {}", self.token, e);
                self.apply(Event::Failed(FailureKind::Store));
                return;
            }
            Ok(CacheLookup::Ready(result)) => {
                info!("Cache hit for {}", self.token);
                self.apply(Event::CacheHit(result));
                return;
            }
            Ok(CacheLookup::Pending | CacheLookup::Missing) => {}
        }

        // --- Étape 2: une seule demande au workflow ---
        if let Err(e) = self.requester.submit(&request).await {
            warn!("Interaction request for {} failed: {}", self.token, e);
            self.apply(Event::Failed(FailureKind::from(&e)));
            return;
        }

        let started = Instant::now();
        if !self.apply(Event::Submitted { at: started }) {
            return;
        }

        // --- Étape 3: sondage ---
        self.poll(started).await;
    }

    async fn poll(&self, started: Instant) {
        let deadline = started + self.policy.timeout;
        let mut ticker = time::interval_at(started + self.policy.interval, self.policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let expiry = time::sleep_until(deadline);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                // L'échéance passe avant un tick simultané.
                biased;

                _ = &mut expiry => {
                    info!("No result for {} after {:?}", self.token, self.policy.timeout);
                    self.apply(Event::TimedOut);
                    return;
                }
                _ = ticker.tick() => {
                    let lookup = match time::timeout_at(deadline, self.store.lookup(&self.token)).await {
                        Err(_) => {
                            info!("No result for {} after {:?}", self.token, self.policy.timeout);
                            self.apply(Event::TimedOut);
                            return;
                        }
                        Ok(Err(e)) => {
                            // Erreur passagère : on saute ce tick, le sondage continue.
                            warn!("Poll of {} skipped: {}", self.token, e);
                            continue;
                        }
                        Ok(Ok(lookup)) => lookup,
                    };

                    match lookup {
                        CacheLookup::Ready(result) => {
                            info!("Result for {} arrived", self.token);
                            self.apply(Event::CacheHit(result));
                            return;
                        }
                        CacheLookup::Pending | CacheLookup::Missing => {
                            if !self.apply(Event::PollMiss) {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}
