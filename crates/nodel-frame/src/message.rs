//! The channel message and its kinds.
//!
//! Every field is optional. Which fields are present decides what a message
//! means:
//!
//! | Kind | Fields |
//! |---|---|
//! | interests | `node` + `events` and/or `actions` |
//! | event | `node` + `event` (+ `arg`) |
//! | invoke | `node` + `action` (+ `arg`) |
//! | invoke failure | `node` + `action` + `error` |
//! | announcement | `node` + `announcement` |

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Out-of-band announcements about a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Announcement {
    /// The node now lives somewhere else.
    Moved,
}

/// Wire message exchanged over a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arg: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announcement: Option<Announcement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reveal: Option<Vec<String>>,
}

/// Semantic kind of a message, derived from its field combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Interest declaration (client to server) or its confirmation (server to client).
    Interests,
    /// An event being delivered.
    Event,
    /// An action invocation.
    Invoke,
    /// The invoked action does not exist on the node.
    InvokeFailure,
    /// A node announcement such as [`Announcement::Moved`].
    Announcement,
    /// No recognised field combination.
    Unknown,
}

impl ChannelMessage {
    /// Declare (or confirm) interest in a node's events and actions.
    pub fn interests(node: impl Into<String>, events: Vec<String>, actions: Vec<String>) -> Self {
        Self {
            node: Some(node.into()),
            events: Some(events),
            actions: Some(actions),
            ..Self::default()
        }
    }

    /// Deliver an event.
    pub fn event(node: impl Into<String>, event: impl Into<String>, arg: Option<Value>) -> Self {
        Self {
            node: Some(node.into()),
            event: Some(event.into()),
            arg,
            ..Self::default()
        }
    }

    /// Invoke an action.
    pub fn invoke(node: impl Into<String>, action: impl Into<String>, arg: Option<Value>) -> Self {
        Self {
            node: Some(node.into()),
            action: Some(action.into()),
            arg,
            ..Self::default()
        }
    }

    /// Report that an invoked action could not be found.
    pub fn invoke_failure(
        node: impl Into<String>,
        action: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            node: Some(node.into()),
            action: Some(action.into()),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Announce that a node moved.
    pub fn moved(node: impl Into<String>) -> Self {
        Self {
            node: Some(node.into()),
            announcement: Some(Announcement::Moved),
            ..Self::default()
        }
    }

    /// Classify this message by which fields are present.
    pub fn kind(&self) -> MessageKind {
        if self.node.is_none() {
            return MessageKind::Unknown;
        }
        if self.announcement.is_some() {
            return MessageKind::Announcement;
        }
        if self.action.is_some() {
            return if self.error.is_some() {
                MessageKind::InvokeFailure
            } else {
                MessageKind::Invoke
            };
        }
        if self.event.is_some() {
            return MessageKind::Event;
        }
        if self.events.is_some() || self.actions.is_some() {
            return MessageKind::Interests;
        }
        MessageKind::Unknown
    }
}
