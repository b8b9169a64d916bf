use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Negotiating,
    Connected,
    Closed,
}

impl SessionState {
    /// Idle -> Negotiating -> Connected, and anything -> Closed
    pub fn can_transition_to(self, next: SessionState) -> bool {
        match (self, next) {
            (SessionState::Closed, SessionState::Closed) => false,
            (_, SessionState::Closed) => true,
            (SessionState::Idle, SessionState::Negotiating) => true,
            (SessionState::Negotiating, SessionState::Connected) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Negotiating => write!(f, "negotiating"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Observable session state that only accepts valid transitions
pub struct SessionStateCell {
    tx: watch::Sender<SessionState>,
}

impl SessionStateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Idle);
        Self { tx }
    }

    pub fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Apply `next` if the transition is allowed. Returns whether it was applied.
    pub fn transition(&self, next: SessionState) -> bool {
        let mut from = SessionState::Idle;
        let applied = self.tx.send_if_modified(|current| {
            from = *current;
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });

        if applied {
            debug!("Session state: {} -> {}", from, next);
        } else if from != next {
            warn!("Rejected session state transition {} -> {}", from, next);
        }
        applied
    }

    /// Start a new generation: Closed -> Idle
    pub(crate) fn reset(&self) {
        let previous = self.tx.send_replace(SessionState::Idle);
        debug!("Session state: {} -> idle (new generation)", previous);
    }
}

impl Default for SessionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use SessionState::*;

        assert!(Idle.can_transition_to(Negotiating));
        assert!(Negotiating.can_transition_to(Connected));
        for state in [Idle, Negotiating, Connected] {
            assert!(state.can_transition_to(Closed));
        }

        assert!(!Idle.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Negotiating));
        assert!(!Connected.can_transition_to(Idle));
        assert!(!Closed.can_transition_to(Idle));
        assert!(!Closed.can_transition_to(Negotiating));
        assert!(!Closed.can_transition_to(Closed));
    }

    #[tokio::test]
    async fn test_cell_rejects_invalid_and_notifies_valid() {
        let cell = SessionStateCell::new();
        let mut rx = cell.subscribe();

        assert!(!cell.transition(SessionState::Connected));
        assert_eq!(cell.get(), SessionState::Idle);

        assert!(cell.transition(SessionState::Negotiating));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SessionState::Negotiating);

        assert!(cell.transition(SessionState::Closed));
        assert!(!cell.transition(SessionState::Closed));
        assert!(!cell.transition(SessionState::Negotiating));
        assert_eq!(cell.get(), SessionState::Closed);

        cell.reset();
        assert_eq!(cell.get(), SessionState::Idle);
    }
}
