use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use nodel_frame::{ChannelMessage, MessageKind};
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use super::connection::Connection;
use crate::error::ChannelError;
use crate::name::{NameFilters, NodelPoint, SimpleName};
use crate::runtime::{lock, Runtime};
use crate::servers::ServerRegistry;

/// Runs a hosted action with the invocation argument.
pub type ActionHandler = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// Receives messages for an in-process client channel.
pub type LoopbackSink = Arc<dyn Fn(ChannelMessage) + Send + Sync>;

pub(crate) enum ServerOutbound {
    Tcp(Arc<Connection>),
    Loopback(LoopbackSink),
}

#[derive(Default)]
struct NodeFilters {
    events: NameFilters,
    actions: NameFilters,
}

#[derive(Default)]
struct ServerChannelState {
    filters: HashMap<SimpleName, NodeFilters>,
    closed: bool,
}

/// Server end of a channel: one connected client host.
///
/// Remembers, per node, the event and action filters the client asked for
/// and only ever forwards what those filters match.
pub struct ChannelServer {
    id: u64,
    peer: String,
    outbound: ServerOutbound,
    registry: Weak<ServerRegistry>,
    runtime: Arc<Runtime>,
    state: Mutex<ServerChannelState>,
}

impl ChannelServer {
    pub(crate) fn new(
        id: u64,
        peer: String,
        outbound: ServerOutbound,
        registry: Weak<ServerRegistry>,
        runtime: Arc<Runtime>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            peer,
            outbound,
            registry,
            runtime,
            state: Mutex::new(ServerChannelState::default()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote address, or `in-process`.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Nodes this client has declared interest in.
    pub fn interested_nodes(&self) -> Vec<SimpleName> {
        lock(&self.state).filters.keys().cloned().collect()
    }

    pub(crate) fn handle_message(self: &Arc<Self>, message: ChannelMessage) {
        match message.kind() {
            MessageKind::Interests => self.handle_interests(message),
            MessageKind::Invoke => self.handle_invoke(message),
            kind => debug!(?kind, peer = %self.peer, "unexpected message on server channel"),
        }
    }

    fn handle_interests(self: &Arc<Self>, message: ChannelMessage) {
        let Some(node) = message.node.map(SimpleName::new) else {
            return;
        };
        {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            let filters = state.filters.entry(node.clone()).or_default();
            for event in message.events.iter().flatten() {
                filters.events.add(event);
            }
            for action in message.actions.iter().flatten() {
                filters.actions.add(action);
            }
        }

        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        registry.register_interest(self, &node);
        self.send_wiring(&registry, &node);
    }

    /// Tell the client which of its requested points `node` currently hosts.
    /// An empty reply means the node is gone.
    ///
    /// The channel lock is held from reading the registry until the reply is
    /// queued, so concurrent changes reach the client in the order they read.
    pub(crate) fn send_wiring(&self, registry: &ServerRegistry, node: &SimpleName) {
        let state = lock(&self.state);
        if state.closed {
            return;
        }
        let Some((requested_as, filters)) = state.filters.get_key_value(node) else {
            return;
        };
        let (actions, events) = registry.points_of(node);
        let message = ChannelMessage::interests(
            requested_as.original(),
            events
                .iter()
                .filter(|event| filters.events.matches(event.original()))
                .map(|event| event.original().to_string())
                .collect(),
            actions
                .iter()
                .filter(|action| filters.actions.matches(action.original()))
                .map(|action| action.original().to_string())
                .collect(),
        );
        trace!(peer = %self.peer, %node, "sending wiring");
        self.send(message);
    }

    fn handle_invoke(&self, message: ChannelMessage) {
        let (Some(node), Some(action)) = (message.node, message.action) else {
            return;
        };
        let point = NodelPoint::new(node.as_str(), action.as_str());
        let handler = self
            .registry
            .upgrade()
            .and_then(|registry| registry.action_handler(&point));

        match handler {
            Some(handler) => {
                let arg = message.arg;
                self.runtime.execute(move || {
                    trace!(%point, "running action");
                    handler(arg);
                });
            }
            None => {
                warn!(%point, peer = %self.peer, "invoke for an action that is not hosted");
                self.send(ChannelMessage::invoke_failure(
                    node.as_str(),
                    action.as_str(),
                    format!("Action '{action}' not found on node '{node}'"),
                ));
            }
        }
    }

    /// Forward an event if this client's filters for the node match it.
    pub fn send_event_message(&self, node: &SimpleName, event: &SimpleName, arg: Option<Value>) -> bool {
        {
            let state = lock(&self.state);
            if state.closed {
                return false;
            }
            let matched = state
                .filters
                .get(node)
                .is_some_and(|filters| filters.events.matches(event.original()));
            if !matched {
                return false;
            }
        }
        self.send(ChannelMessage::event(node.original(), event.original(), arg))
    }

    fn send(&self, message: ChannelMessage) -> bool {
        match &self.outbound {
            ServerOutbound::Tcp(connection) => connection.send(message),
            ServerOutbound::Loopback(sink) => {
                sink(message);
                true
            }
        }
    }

    /// Close and leave every interest list in the registry.
    pub fn close(&self) {
        if !self.mark_closed() {
            return;
        }
        if let ServerOutbound::Tcp(connection) = &self.outbound {
            connection.close();
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_channel(self.id);
        }
        debug!(peer = %self.peer, "server channel closed");
    }

    pub(crate) fn handle_failure(&self, err: ChannelError) {
        if !self.mark_closed() {
            return;
        }
        if let ServerOutbound::Tcp(connection) = &self.outbound {
            connection.close();
        }
        info!(peer = %self.peer, reason = %err, "client channel dropped");
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_channel(self.id);
        }
    }

    fn mark_closed(&self) -> bool {
        let mut state = lock(&self.state);
        if state.closed {
            return false;
        }
        state.closed = true;
        true
    }
}
