//! Tracking consent.
//!
//! Consent decides where events land: the real storage root (`Granted`), a
//! holding area (`Pending`), or nowhere (`NotGranted`). The state is owned by
//! the embedding application and pushed into the spool through
//! [`ConsentProvider::set_consent`]; interested components register as
//! [`ConsentListener`]s.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// User tracking consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    Granted,
    #[default]
    Pending,
    NotGranted,
}

impl std::fmt::Display for ConsentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsentState::Granted => write!(f, "granted"),
            ConsentState::Pending => write!(f, "pending"),
            ConsentState::NotGranted => write!(f, "not_granted"),
        }
    }
}

impl std::str::FromStr for ConsentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "granted" => Ok(ConsentState::Granted),
            "pending" => Ok(ConsentState::Pending),
            "not_granted" | "not-granted" | "denied" => Ok(ConsentState::NotGranted),
            _ => Err(format!("unknown consent state: {}", s)),
        }
    }
}

/// Receives consent transitions.
pub trait ConsentListener: Send + Sync {
    fn on_consent_updated(&self, previous: ConsentState, new: ConsentState);
}

/// Holds the current consent and fans transitions out to listeners.
pub struct ConsentProvider {
    state: RwLock<ConsentState>,
    listeners: Mutex<Vec<Arc<dyn ConsentListener>>>,
    /// Serializes transitions so listeners see them in state order.
    transition: Mutex<()>,
}

impl ConsentProvider {
    pub fn new(initial: ConsentState) -> Self {
        Self {
            state: RwLock::new(initial),
            listeners: Mutex::new(Vec::new()),
            transition: Mutex::new(()),
        }
    }

    /// Current consent.
    pub fn consent(&self) -> ConsentState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Update the consent, notifying listeners if it actually changed.
    ///
    /// Concurrent calls are applied one at a time: a transition is delivered
    /// to every listener before the next one changes the state. Listeners may
    /// read [`consent`](Self::consent) but must not call `set_consent`.
    pub fn set_consent(&self, new: ConsentState) {
        let _transition = self.transition.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let previous = *state;
            *state = new;
            previous
        };
        if previous == new {
            return;
        }

        // The state lock is released so listeners may read the provider.
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.on_consent_updated(previous, new);
        }
    }

    pub fn register(&self, listener: Arc<dyn ConsentListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn unregister_all(&self) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for ConsentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentProvider")
            .field("state", &self.consent())
            .finish_non_exhaustive()
    }
}

impl Default for ConsentProvider {
    fn default() -> Self {
        Self::new(ConsentState::Pending)
    }
}
