// Registre des sessions de calcul ouvertes par les navigateurs.
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::poller::{Calculator, PollPolicy};
use crate::requester::InteractionRequester;

// Intervalle entre deux purges des sessions inactives.
const PURGE_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct Entry {
    calculator: Arc<Calculator>,
    last_seen: Instant,
}

pub struct SessionRegistry {
    store: Arc<dyn CacheStore>,
    requester: Arc<dyn InteractionRequester>,
    policy: PollPolicy,
    // `RwLock` : les lectures (chaque requête HTTP) sont bien plus fréquentes que les créations.
    sessions: RwLock<HashMap<Uuid, Entry>>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn CacheStore>,
        requester: Arc<dyn InteractionRequester>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            store,
            requester,
            policy,
            sessions: RwLock::new(HashMap::with_capacity(100)),
        }
    }

    pub async fn create(&self) -> (Uuid, Arc<Calculator>) {
        let id = Uuid::new_v4();
        let calculator = Arc::new(Calculator::new(
            self.store.clone(),
            self.requester.clone(),
            self.policy,
        ));

        self.sessions.write().await.insert(
            id,
            Entry {
                calculator: calculator.clone(),
                last_seen: Instant::now(),
            },
        );
        info!("Session {} created", id);

        (id, calculator)
    }

    // Chaque accès repousse l'expiration de la session.
    pub async fn get(&self, id: &Uuid) -> Option<Arc<Calculator>> {
        let mut sessions = self.sessions.write().await;
        sessions.get_mut(id).map(|entry| {
            entry.last_seen = Instant::now();
            entry.calculator.clone()
        })
    }

    pub async fn remove(&self, id: &Uuid) -> bool {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(entry) => {
                // Une connexion WebSocket peut encore tenir le calculateur : on arrête le calcul explicitement.
                entry.calculator.cancel();
                info!("Session {} closed", id);
                true
            }
            None => false,
        }
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Supprime les sessions inactives depuis plus de `ttl`.
    /// Une session dont le calcul tourne encore est conservée.
    pub async fn purge_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();

        sessions.retain(|id, entry| {
            let keep = entry.last_seen.elapsed() < ttl
                || entry.calculator.snapshot().state.is_running();
            if !keep {
                entry.calculator.cancel();
                info!("Purge: session {} expirée", id);
            }
            keep
        });

        before - sessions.len()
    }

    // Tâche de maintenance, sur le modèle du worker de purge.
    pub fn spawn_purge_worker(self: &Arc<Self>, ttl: Duration) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);

            // Attend le premier intervalle avant de commencer pour ne pas purger au démarrage.
            interval.tick().await;

            loop {
                interval.tick().await;
                let purged = registry.purge_idle(ttl).await;
                if purged > 0 {
                    info!("Purge terminée: {} sessions supprimées", purged);
                }
            }
        });
    }
}
