//! Enregistrement immuable d'une session de calcul et ses transitions.
//!
//! Chaque transition produit un nouvel enregistrement complet ; rien n'est
//! modifié champ par champ. Le compteur `generation` change à chaque
//! sélection, remise à zéro ou nouveau calcul : une tâche de sondage qui
//! porte une génération périmée ne peut plus rien appliquer.

use serde::Serialize;
use std::fmt;
use tokio::time::Instant;

use crate::cache::InteractionResult;
use crate::error::{SessionError, SubmissionError};
use crate::models::{DrugSelection, InteractionRequest, Slot};
use crate::token::{derive_token, CacheToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Idle,
    AwaitingSubmission,
    Polling,
    Resolved,
    TimedOut,
    Failed,
}

impl PollState {
    pub fn as_str(self) -> &'static str {
        match self {
            PollState::Idle => "idle",
            PollState::AwaitingSubmission => "awaiting_submission",
            PollState::Polling => "polling",
            PollState::Resolved => "resolved",
            PollState::TimedOut => "timed_out",
            PollState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PollState::Resolved | PollState::TimedOut | PollState::Failed
        )
    }

    // Une tâche de fond travaille pour la session dans ces états.
    pub fn is_running(self) -> bool {
        matches!(self, PollState::AwaitingSubmission | PollState::Polling)
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    // Cache injoignable lors de la première lecture.
    Store,
    SubmissionRejected,
    Network,
}

impl From<&SubmissionError> for FailureKind {
    fn from(error: &SubmissionError) -> Self {
        match error {
            SubmissionError::Network(_) => FailureKind::Network,
            SubmissionError::Rejected(_) => FailureKind::SubmissionRejected,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Select {
        slot: Slot,
        selection: Option<DrugSelection>,
    },
    Clear,
    Calculate,
    CacheHit(InteractionResult),
    Submitted {
        at: Instant,
    },
    PollMiss,
    Failed(FailureKind),
    TimedOut,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Select { .. } => "select",
            Event::Clear => "clear",
            Event::Calculate => "calculate",
            Event::CacheHit(_) => "cache_hit",
            Event::Submitted { .. } => "submitted",
            Event::PollMiss => "poll_miss",
            Event::Failed(_) => "failed",
            Event::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub generation: u64,
    pub state: PollState,
    pub first: Option<DrugSelection>,
    pub second: Option<DrugSelection>,
    pub token: Option<CacheToken>,
    pub result: Option<InteractionResult>,
    pub failure: Option<FailureKind>,
    pub attempts: u32,
    #[serde(skip)]
    pub polling_since: Option<Instant>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            generation: 0,
            state: PollState::Idle,
            first: None,
            second: None,
            token: None,
            result: None,
            failure: None,
            attempts: 0,
            polling_since: None,
        }
    }
}

impl Session {
    // Même sélection, plus aucun calcul en cours.
    fn reset(&self) -> Session {
        Session {
            generation: self.generation + 1,
            first: self.first.clone(),
            second: self.second.clone(),
            ..Session::default()
        }
    }

    fn with_state(&self, state: PollState) -> Session {
        Session {
            state,
            ..self.clone()
        }
    }

    pub fn selections(&self) -> Option<(&DrugSelection, &DrugSelection)> {
        match (&self.first, &self.second) {
            (Some(first), Some(second)) => Some((first, second)),
            _ => None,
        }
    }

    pub fn request(&self) -> Option<InteractionRequest> {
        self.selections().map(|(first, second)| InteractionRequest {
            drug1: first.payload(),
            drug2: second.payload(),
        })
    }

    /// Applique un événement et renvoie le nouvel enregistrement, ou une erreur
    /// si l'événement n'a pas de sens dans l'état courant.
    pub fn apply(&self, event: Event) -> Result<Session, SessionError> {
        use PollState::*;

        match (self.state, event) {
            (_, Event::Select { slot, selection }) => {
                let mut next = self.reset();
                match slot {
                    Slot::First => next.first = selection,
                    Slot::Second => next.second = selection,
                }
                Ok(next)
            }
            (_, Event::Clear) => Ok(Session {
                generation: self.generation + 1,
                ..Session::default()
            }),
            (state, Event::Calculate) if state == Idle || state.is_terminal() => {
                let (first, second) = self
                    .selections()
                    .ok_or(SessionError::IncompleteSelection)?;
                let token = derive_token(&first.name, &second.name);
                Ok(Session {
                    state: AwaitingSubmission,
                    token: Some(token),
                    ..self.reset()
                })
            }
            (AwaitingSubmission, Event::CacheHit(result)) => Ok(Session {
                result: Some(result),
                ..self.with_state(Resolved)
            }),
            (AwaitingSubmission, Event::Submitted { at }) => Ok(Session {
                polling_since: Some(at),
                ..self.with_state(Polling)
            }),
            (AwaitingSubmission, Event::Failed(kind)) => Ok(Session {
                failure: Some(kind),
                ..self.with_state(Failed)
            }),
            (Polling, Event::PollMiss) => Ok(Session {
                attempts: self.attempts + 1,
                ..self.clone()
            }),
            (Polling, Event::CacheHit(result)) => Ok(Session {
                attempts: self.attempts + 1,
                result: Some(result),
                ..self.with_state(Resolved)
            }),
            (Polling, Event::TimedOut) => Ok(self.with_state(TimedOut)),
            (state, event) => Err(SessionError::InvalidTransition {
                state,
                event: event.name(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Contraindications, Drug};

    fn selection(name: &str, lpid: &str) -> DrugSelection {
        DrugSelection {
            name: name.to_string(),
            drug: Drug {
                id: 1,
                commercial_name: name.to_string(),
                mnn_name: name.to_string(),
                active_substance: name.to_string(),
                lpid: lpid.to_string(),
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

    fn selected() -> Session {
        Session::default()
            .apply(Event::Select {
                slot: Slot::First,
                selection: Some(selection("Aspirin", "LP-1")),
            })
            .unwrap()
            .apply(Event::Select {
                slot: Slot::Second,
                selection: Some(selection("Ibuprofen", "LP-2")),
            })
            .unwrap()
    }

    fn result(text: &str) -> InteractionResult {
        InteractionResult::new(text.to_string(), None)
    }

    #[test]
    fn calculate_requires_both_selections() {
        let half = Session::default()
            .apply(Event::Select {
                slot: Slot::First,
                selection: Some(selection("Aspirin", "LP-1")),
            })
            .unwrap();

        assert_eq!(
            half.apply(Event::Calculate).unwrap_err(),
            SessionError::IncompleteSelection
        );
    }

    #[test]
    fn calculate_derives_the_pair_token_and_bumps_generation() {
        let idle = selected();
        let awaiting = idle.apply(Event::Calculate).unwrap();

        assert_eq!(awaiting.state, PollState::AwaitingSubmission);
        assert_eq!(awaiting.generation, idle.generation + 1);
        assert_eq!(awaiting.token, Some(derive_token("ibuprofen", "aspirin")));
    }

    #[test]
    fn cache_hit_on_first_lookup_resolves() {
        let resolved = selected()
            .apply(Event::Calculate)
            .unwrap()
            .apply(Event::CacheHit(result("Умеренная")))
            .unwrap();

        assert_eq!(resolved.state, PollState::Resolved);
        assert_eq!(resolved.result.unwrap().interact, "Умеренная");
        assert_eq!(resolved.attempts, 0);
    }

    #[test]
    fn polling_counts_attempts_until_resolved() {
        let polling = selected()
            .apply(Event::Calculate)
            .unwrap()
            .apply(Event::Submitted { at: Instant::now() })
            .unwrap();
        assert_eq!(polling.state, PollState::Polling);
        assert!(polling.polling_since.is_some());

        let still = polling.apply(Event::PollMiss).unwrap();
        assert_eq!(still.state, PollState::Polling);
        assert_eq!(still.attempts, 1);

        let done = still
            .apply(Event::CacheHit(result("Противопоказано")))
            .unwrap();
        assert_eq!(done.state, PollState::Resolved);
        assert_eq!(done.attempts, 2);
    }

    #[test]
    fn failures_and_timeouts_are_terminal() {
        let failed = selected()
            .apply(Event::Calculate)
            .unwrap()
            .apply(Event::Failed(FailureKind::SubmissionRejected))
            .unwrap();
        assert!(failed.state.is_terminal());
        assert_eq!(failed.failure, Some(FailureKind::SubmissionRejected));

        let timed_out = selected()
            .apply(Event::Calculate)
            .unwrap()
            .apply(Event::Submitted { at: Instant::now() })
            .unwrap()
            .apply(Event::TimedOut)
            .unwrap();
        assert_eq!(timed_out.state, PollState::TimedOut);
        assert!(timed_out.failure.is_none());

        // Les ticks tardifs sont refusés une fois l'état terminal atteint.
        assert!(timed_out.apply(Event::PollMiss).is_err());
        assert!(timed_out.apply(Event::TimedOut).is_err());
    }

    #[test]
    fn terminal_states_accept_a_new_calculation() {
        let resolved = selected()
            .apply(Event::Calculate)
            .unwrap()
            .apply(Event::CacheHit(result("Минимальная")))
            .unwrap();

        let again = resolved.apply(Event::Calculate).unwrap();
        assert_eq!(again.state, PollState::AwaitingSubmission);
        assert!(again.result.is_none());
    }

    #[test]
    fn calculate_is_refused_while_running() {
        let awaiting = selected().apply(Event::Calculate).unwrap();
        assert_eq!(
            awaiting.apply(Event::Calculate).unwrap_err(),
            SessionError::InvalidTransition {
                state: PollState::AwaitingSubmission,
                event: "calculate"
            }
        );

        let polling = awaiting
            .apply(Event::Submitted { at: Instant::now() })
            .unwrap();
        assert!(polling.apply(Event::Calculate).is_err());
    }

    #[test]
    fn selection_change_returns_to_idle_from_any_state() {
        let polling = selected()
            .apply(Event::Calculate)
            .unwrap()
            .apply(Event::Submitted { at: Instant::now() })
            .unwrap();

        let changed = polling
            .apply(Event::Select {
                slot: Slot::Second,
                selection: Some(selection("Warfarin", "LP-3")),
            })
            .unwrap();
        assert_eq!(changed.state, PollState::Idle);
        assert_eq!(changed.generation, polling.generation + 1);
        assert!(changed.token.is_none());
        assert!(changed.polling_since.is_none());
        assert_eq!(changed.second.unwrap().name, "Warfarin");

        let cleared = polling.apply(Event::Clear).unwrap();
        assert_eq!(cleared.state, PollState::Idle);
        assert!(cleared.first.is_none() && cleared.second.is_none());
    }

    #[test]
    fn request_carries_display_names_and_identifiers() {
        let request = selected().request().unwrap();
        assert_eq!(request.drug1.name, "Aspirin");
        assert_eq!(request.drug1.lpid, "LP-1");
        assert_eq!(request.drug2.active_substance, "Ibuprofen");
    }
}
