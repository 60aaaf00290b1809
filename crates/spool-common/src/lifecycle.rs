//! Host application lifecycle events.
//!
//! The spool has no dependency on any UI toolkit. The embedding application
//! translates its own lifecycle callbacks into [`AppLifecycleEvent`]s and sends
//! them over the channel exposed by the core.

use serde::{Deserialize, Serialize};

/// Coarse application lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppLifecycleEvent {
    Foreground,
    Background,
    Terminated,
}

/// Component reacting to lifecycle transitions.
pub trait LifecycleListener: Send + Sync {
    fn on_lifecycle_event(&self, event: AppLifecycleEvent);
}
