use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a client binding.
///
/// `Empty` until the binding registers interest. `Resolved` once a channel to
/// the hosting node exists, `Wired` once the remote side confirmed the point.
/// `ResolutionFailure` covers both "node not found" and "connection lost".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingState {
    #[default]
    Empty,
    ResolutionFailure,
    Resolved,
    Wired,
    /// Reported when the node answers but lacks the requested action.
    MissingActionPoint,
    /// Reported when the node answers but lacks the requested event.
    MissingEventPoint,
}

impl BindingState {
    pub fn is_wired(self) -> bool {
        self == BindingState::Wired
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BindingState::Empty => "empty",
            BindingState::ResolutionFailure => "resolution-failure",
            BindingState::Resolved => "resolved",
            BindingState::Wired => "wired",
            BindingState::MissingActionPoint => "missing-action-point",
            BindingState::MissingEventPoint => "missing-event-point",
        }
    }
}

impl fmt::Display for BindingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
