//! Server-side registry: the actions and events this process hosts, and the
//! client channels interested in them.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use nodel_transport::{ChannelStream, NodeAddress};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::channel::{ActionHandler, ChannelServer, Connection, LoopbackSink, ServerOutbound};
use crate::config::NodelConfig;
use crate::discovery::Discovery;
use crate::error::{PeerError, Result};
use crate::name::{NodelPoint, SimpleName};
use crate::runtime::{lock, Runtime};

struct HostedPoints {
    node: SimpleName,
    actions: BTreeMap<SimpleName, ActionHandler>,
    events: BTreeSet<SimpleName>,
}

impl HostedPoints {
    fn new(node: SimpleName) -> Self {
        Self {
            node,
            actions: BTreeMap::new(),
            events: BTreeSet::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.events.is_empty()
    }
}

#[derive(Default)]
struct ServerState {
    local_address: Option<NodeAddress>,
    nodes: HashMap<SimpleName, HostedPoints>,
    known: HashSet<SimpleName>,
    interests: HashMap<SimpleName, Vec<Arc<ChannelServer>>>,
    channels: HashMap<u64, Arc<ChannelServer>>,
    loopback: Option<u64>,
    disposed: bool,
}

impl ServerState {
    fn interested(&self, node: &SimpleName) -> Vec<Arc<ChannelServer>> {
        self.interests.get(node).cloned().unwrap_or_default()
    }
}

/// A hosted node as reported by [`ServerRegistry::hosted`].
#[derive(Debug, Clone, Serialize)]
pub struct HostedNode {
    pub node: String,
    pub actions: Vec<String>,
    pub events: Vec<String>,
    pub interested_channels: usize,
}

/// Registry of locally hosted actions and events.
///
/// Accepts client channels, answers their interests and fans events out to
/// every channel whose filters match.
pub struct ServerRegistry {
    this: Weak<ServerRegistry>,
    runtime: Arc<Runtime>,
    discovery: Arc<dyn Discovery>,
    config: NodelConfig,
    next_channel_id: AtomicU64,
    state: Mutex<ServerState>,
}

impl ServerRegistry {
    pub fn new(runtime: Arc<Runtime>, discovery: Arc<dyn Discovery>, config: NodelConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            runtime,
            discovery,
            config,
            next_channel_id: AtomicU64::new(1),
            state: Mutex::new(ServerState::default()),
        })
    }

    /// Record where this host listens and advertise every node hosted so far.
    pub fn set_local_address(&self, address: NodeAddress) {
        let nodes: Vec<SimpleName> = {
            let mut state = lock(&self.state);
            state.local_address = Some(address.clone());
            state.nodes.keys().cloned().collect()
        };
        for node in nodes {
            self.discovery.advertise(&node, &address);
        }
    }

    pub fn local_address(&self) -> Option<NodeAddress> {
        lock(&self.state).local_address.clone()
    }

    /// Host an action. Registering the same point twice is an error.
    pub fn register_action(&self, point: &NodelPoint, handler: ActionHandler) -> Result<()> {
        let (first, address, channels) = {
            let mut state = lock(&self.state);
            if state.disposed {
                return Err(PeerError::Shutdown);
            }
            let first = !state.nodes.contains_key(&point.node);
            let hosted = state
                .nodes
                .entry(point.node.clone())
                .or_insert_with(|| HostedPoints::new(point.node.clone()));
            if hosted.actions.contains_key(&point.point) {
                return Err(PeerError::DuplicateRegistration(point.clone()));
            }
            hosted.actions.insert(point.point.clone(), handler);
            state.known.insert(point.node.clone());
            (first, state.local_address.clone(), state.interested(&point.node))
        };

        info!(%point, "hosting action");
        self.after_change(&point.node, first, address, channels);
        Ok(())
    }

    /// Host an event. Registering the same point twice is an error.
    pub fn register_event(&self, point: &NodelPoint) -> Result<()> {
        let (first, address, channels) = {
            let mut state = lock(&self.state);
            if state.disposed {
                return Err(PeerError::Shutdown);
            }
            let first = !state.nodes.contains_key(&point.node);
            let hosted = state
                .nodes
                .entry(point.node.clone())
                .or_insert_with(|| HostedPoints::new(point.node.clone()));
            if !hosted.events.insert(point.point.clone()) {
                return Err(PeerError::DuplicateRegistration(point.clone()));
            }
            state.known.insert(point.node.clone());
            (first, state.local_address.clone(), state.interested(&point.node))
        };

        info!(%point, "hosting event");
        self.after_change(&point.node, first, address, channels);
        Ok(())
    }

    pub fn unregister_action(&self, point: &NodelPoint) -> Result<()> {
        self.unregister(point, |hosted| hosted.actions.remove(&point.point).is_some())
    }

    pub fn unregister_event(&self, point: &NodelPoint) -> Result<()> {
        self.unregister(point, |hosted| hosted.events.remove(&point.point))
    }

    fn unregister(&self, point: &NodelPoint, remove: impl FnOnce(&mut HostedPoints) -> bool) -> Result<()> {
        let (last, channels) = {
            let mut state = lock(&self.state);
            let Some(hosted) = state.nodes.get_mut(&point.node) else {
                return Err(PeerError::NotRegistered(point.clone()));
            };
            if !remove(hosted) {
                return Err(PeerError::NotRegistered(point.clone()));
            }
            let last = hosted.is_empty();
            if last {
                state.nodes.remove(&point.node);
            }
            (last, state.interested(&point.node))
        };

        info!(%point, "no longer hosted");
        if last {
            self.discovery.unadvertise(&point.node);
        }
        for channel in channels {
            channel.send_wiring(self, &point.node);
        }
        Ok(())
    }

    fn after_change(
        &self,
        node: &SimpleName,
        first: bool,
        address: Option<NodeAddress>,
        channels: Vec<Arc<ChannelServer>>,
    ) {
        if first {
            if let Some(address) = address {
                self.discovery.advertise(node, &address);
            }
        }
        for channel in channels {
            channel.send_wiring(self, node);
        }
    }

    /// Add `channel` to the node's interest list. Idempotent.
    pub fn register_interest(&self, channel: &Arc<ChannelServer>, node: &SimpleName) {
        let mut state = lock(&self.state);
        if state.disposed {
            return;
        }
        let list = state.interests.entry(node.clone()).or_default();
        if !list.iter().any(|existing| existing.id() == channel.id()) {
            debug!(%node, peer = %channel.peer(), "interest registered");
            list.push(Arc::clone(channel));
        }
    }

    /// Currently hosted `(actions, events)` of `node`.
    pub fn points_of(&self, node: &SimpleName) -> (Vec<SimpleName>, Vec<SimpleName>) {
        let state = lock(&self.state);
        match state.nodes.get(node) {
            Some(hosted) => (
                hosted.actions.keys().cloned().collect(),
                hosted.events.iter().cloned().collect(),
            ),
            None => (Vec::new(), Vec::new()),
        }
    }

    pub fn action_handler(&self, point: &NodelPoint) -> Option<ActionHandler> {
        lock(&self.state)
            .nodes
            .get(&point.node)
            .and_then(|hosted| hosted.actions.get(&point.point))
            .cloned()
    }

    /// True while `node` has at least one hosted point.
    pub fn hosts(&self, node: &SimpleName) -> bool {
        lock(&self.state).nodes.contains_key(node)
    }

    /// Send an event to every interested channel whose filters match.
    ///
    /// Fails if the node was never registered here.
    pub fn emit_event(&self, point: &NodelPoint, arg: Option<Value>) -> Result<usize> {
        let channels = {
            let state = lock(&self.state);
            if !state.known.contains(&point.node) {
                return Err(PeerError::UnknownNode(point.node.clone()));
            }
            state.interested(&point.node)
        };

        let delivered = channels
            .iter()
            .filter(|channel| channel.send_event_message(&point.node, &point.point, arg.clone()))
            .count();
        debug!(%point, delivered, "event emitted");
        Ok(delivered)
    }

    /// Serve a freshly accepted TCP connection.
    pub fn accept(&self, stream: ChannelStream, peer: NodeAddress) -> Result<Arc<ChannelServer>> {
        let frame = self.config.frame_config();
        let connection = Connection::open(stream, frame.clone(), peer.to_string())?;
        let channel = ChannelServer::new(
            self.next_channel_id.fetch_add(1, Ordering::Relaxed),
            peer.to_string(),
            ServerOutbound::Tcp(Arc::clone(&connection)),
            self.this.clone(),
            Arc::clone(&self.runtime),
        );

        {
            let mut state = lock(&self.state);
            if state.disposed {
                drop(state);
                connection.close();
                return Err(PeerError::Shutdown);
            }
            state.channels.insert(channel.id(), Arc::clone(&channel));
        }

        let on_message = Arc::downgrade(&channel);
        let on_failure = Arc::downgrade(&channel);
        let reading = connection.start_reading(
            frame,
            move |message| {
                if let Some(channel) = on_message.upgrade() {
                    channel.handle_message(message);
                }
            },
            move |err| {
                if let Some(channel) = on_failure.upgrade() {
                    channel.handle_failure(err);
                }
            },
        );
        if let Err(err) = reading {
            channel.close();
            return Err(err);
        }

        info!(%peer, "client channel accepted");
        Ok(channel)
    }

    /// Server end for the in-process client channel. Replaces any previous one.
    pub fn accept_loopback(&self, sink: LoopbackSink) -> Result<Arc<ChannelServer>> {
        let channel = ChannelServer::new(
            self.next_channel_id.fetch_add(1, Ordering::Relaxed),
            NodeAddress::in_process().to_string(),
            ServerOutbound::Loopback(sink),
            self.this.clone(),
            Arc::clone(&self.runtime),
        );

        let previous = {
            let mut state = lock(&self.state);
            if state.disposed {
                return Err(PeerError::Shutdown);
            }
            state.channels.insert(channel.id(), Arc::clone(&channel));
            state
                .loopback
                .replace(channel.id())
                .and_then(|id| state.channels.get(&id).cloned())
        };
        if let Some(previous) = previous {
            previous.close();
        }

        debug!("in-process channel accepted");
        Ok(channel)
    }

    /// Forget a closed channel everywhere.
    pub(crate) fn remove_channel(&self, id: u64) {
        let mut state = lock(&self.state);
        state.channels.remove(&id);
        for list in state.interests.values_mut() {
            list.retain(|channel| channel.id() != id);
        }
        state.interests.retain(|_, list| !list.is_empty());
        if state.loopback == Some(id) {
            state.loopback = None;
        }
    }

    pub fn channel_count(&self) -> usize {
        lock(&self.state).channels.len()
    }

    /// Hosted nodes with their points, sorted by node name.
    pub fn hosted(&self) -> Vec<HostedNode> {
        let state = lock(&self.state);
        let mut nodes: Vec<HostedNode> = state
            .nodes
            .values()
            .map(|hosted| HostedNode {
                node: hosted.node.original().to_string(),
                actions: hosted.actions.keys().map(|a| a.original().to_string()).collect(),
                events: hosted.events.iter().map(|e| e.original().to_string()).collect(),
                interested_channels: state.interests.get(&hosted.node).map_or(0, Vec::len),
            })
            .collect();
        nodes.sort_by(|a, b| a.node.to_lowercase().cmp(&b.node.to_lowercase()));
        nodes
    }

    /// Close every channel and withdraw every advertisement.
    pub fn shutdown(&self) {
        let (channels, nodes) = {
            let mut state = lock(&self.state);
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.interests.clear();
            state.loopback = None;
            let channels: Vec<_> = state.channels.drain().map(|(_, channel)| channel).collect();
            let nodes: Vec<_> = state.nodes.keys().cloned().collect();
            (channels, nodes)
        };
        for channel in channels {
            channel.close();
        }
        for node in nodes {
            self.discovery.unadvertise(&node);
        }
        debug!("server registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crossbeam::channel;
    use nodel_frame::{ChannelMessage, MessageKind};

    use super::*;
    use crate::discovery::StaticDiscovery;

    fn registry() -> (Arc<ServerRegistry>, Arc<StaticDiscovery>, Arc<Runtime>) {
        let runtime = Runtime::new(&NodelConfig::default().with_worker_threads(2)).unwrap();
        let discovery = Arc::new(StaticDiscovery::new());
        let servers = ServerRegistry::new(
            Arc::clone(&runtime),
            Arc::clone(&discovery) as Arc<dyn Discovery>,
            NodelConfig::default(),
        );
        (servers, discovery, runtime)
    }

    fn noop() -> ActionHandler {
        Arc::new(|_: Option<Value>| {})
    }

    fn loopback(servers: &ServerRegistry) -> (Arc<ChannelServer>, channel::Receiver<ChannelMessage>) {
        let (tx, rx) = channel::unbounded();
        let sink: LoopbackSink = Arc::new(move |message| {
            let _ = tx.send(message);
        });
        (servers.accept_loopback(sink).unwrap(), rx)
    }

    #[test]
    fn duplicate_registration_fails() {
        let (servers, _, runtime) = registry();
        let point = NodelPoint::new("Lamp1", "TurnOn");
        servers.register_action(&point, noop()).unwrap();

        let err = servers
            .register_action(&NodelPoint::new("lamp 1", "turn on"), noop())
            .unwrap_err();
        assert!(matches!(err, PeerError::DuplicateRegistration(_)));

        servers.register_event(&NodelPoint::new("Lamp1", "Status")).unwrap();
        assert!(matches!(
            servers.register_event(&NodelPoint::new("Lamp1", "Status")),
            Err(PeerError::DuplicateRegistration(_))
        ));
        runtime.shutdown();
    }

    #[test]
    fn first_point_advertises_last_point_unadvertises() {
        let (servers, discovery, runtime) = registry();
        servers.set_local_address(NodeAddress::new("127.0.0.1", 9100));
        let node = SimpleName::new("Lamp1");

        servers.register_action(&NodelPoint::new("Lamp1", "TurnOn"), noop()).unwrap();
        servers.register_event(&NodelPoint::new("Lamp1", "Status")).unwrap();
        assert_eq!(discovery.resolve(&node).unwrap().port(), 9100);

        servers.unregister_action(&NodelPoint::new("Lamp1", "TurnOn")).unwrap();
        assert!(discovery.resolve(&node).is_some());
        assert!(servers.hosts(&node));

        servers.unregister_event(&NodelPoint::new("Lamp1", "Status")).unwrap();
        assert!(discovery.resolve(&node).is_none());
        assert!(!servers.hosts(&node));
        runtime.shutdown();
    }

    #[test]
    fn unregister_unknown_point_fails() {
        let (servers, _, runtime) = registry();
        assert!(matches!(
            servers.unregister_action(&NodelPoint::new("Lamp1", "TurnOn")),
            Err(PeerError::NotRegistered(_))
        ));
        runtime.shutdown();
    }

    #[test]
    fn interests_reply_is_filtered() {
        let (servers, _, runtime) = registry();
        servers.register_action(&NodelPoint::new("Proj", "PowerOn"), noop()).unwrap();
        servers.register_action(&NodelPoint::new("Proj", "PowerOff"), noop()).unwrap();
        servers.register_action(&NodelPoint::new("Proj", "Input"), noop()).unwrap();

        let (channel, rx) = loopback(&servers);
        channel.handle_message(ChannelMessage::interests("Proj", vec![], vec!["Power*".into()]));

        let reply = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(reply.kind(), MessageKind::Interests);
        let mut actions = reply.actions.unwrap();
        actions.sort();
        assert_eq!(actions, vec!["PowerOff".to_string(), "PowerOn".to_string()]);
        assert_eq!(reply.events, Some(vec![]));
        runtime.shutdown();
    }

    #[test]
    fn interests_for_unknown_node_get_empty_reply() {
        let (servers, _, runtime) = registry();
        let (channel, rx) = loopback(&servers);
        channel.handle_message(ChannelMessage::interests("Ghost", vec!["*".into()], vec![]));

        let reply = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(reply.actions, Some(vec![]));
        assert_eq!(reply.events, Some(vec![]));
        runtime.shutdown();
    }

    #[test]
    fn last_unregister_sends_empty_wiring() {
        let (servers, _, runtime) = registry();
        let point = NodelPoint::new("Lamp1", "TurnOn");
        servers.register_action(&point, noop()).unwrap();
        let (channel, rx) = loopback(&servers);
        channel.handle_message(ChannelMessage::interests("Lamp1", vec![], vec!["TurnOn".into()]));
        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.actions, Some(vec!["TurnOn".to_string()]));

        servers.unregister_action(&point).unwrap();
        let vanished = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(vanished.kind(), MessageKind::Interests);
        assert_eq!(vanished.actions, Some(vec![]));
        runtime.shutdown();
    }

    #[test]
    fn invoke_runs_handler_or_reports_missing_action() {
        let (servers, _, runtime) = registry();
        let (tx, rx) = channel::unbounded();
        servers
            .register_action(
                &NodelPoint::new("Lamp1", "TurnOn"),
                Arc::new(move |arg: Option<Value>| {
                    let _ = tx.send(arg);
                }),
            )
            .unwrap();
        let (channel, replies) = loopback(&servers);

        channel.handle_message(ChannelMessage::invoke("Lamp1", "TurnOn", Some(Value::Bool(true))));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Some(Value::Bool(true))
        );

        channel.handle_message(ChannelMessage::invoke("Lamp1", "Explode", None));
        let failure = replies.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(failure.kind(), MessageKind::InvokeFailure);
        assert!(failure.error.unwrap().contains("Explode"));
        runtime.shutdown();
    }

    #[test]
    fn panicking_action_does_not_break_channel() {
        let (servers, _, runtime) = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        servers
            .register_action(
                &NodelPoint::new("Lamp1", "TurnOn"),
                Arc::new(move |_: Option<Value>| {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first call fails");
                    }
                }),
            )
            .unwrap();
        let (channel, _replies) = loopback(&servers);

        channel.handle_message(ChannelMessage::invoke("Lamp1", "TurnOn", None));
        channel.handle_message(ChannelMessage::invoke("Lamp1", "TurnOn", None));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while calls.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        runtime.shutdown();
    }

    #[test]
    fn emit_event_fans_out_to_matching_channels() {
        let (servers, _, runtime) = registry();
        servers.register_event(&NodelPoint::new("Lamp1", "Status")).unwrap();
        servers.register_event(&NodelPoint::new("Lamp1", "Power")).unwrap();

        let (status_only, status_rx) = loopback(&servers);
        status_only.handle_message(ChannelMessage::interests("Lamp1", vec!["Stat*".into()], vec![]));
        status_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let delivered = servers
            .emit_event(&NodelPoint::new("Lamp1", "Status"), Some(Value::from("on")))
            .unwrap();
        assert_eq!(delivered, 1);
        let event = status_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.kind(), MessageKind::Event);
        assert_eq!(event.arg, Some(Value::from("on")));

        let delivered = servers.emit_event(&NodelPoint::new("Lamp1", "Power"), None).unwrap();
        assert_eq!(delivered, 0);
        runtime.shutdown();
    }

    #[test]
    fn emit_for_unknown_node_fails() {
        let (servers, _, runtime) = registry();
        assert!(matches!(
            servers.emit_event(&NodelPoint::new("Ghost", "Status"), None),
            Err(PeerError::UnknownNode(_))
        ));
        runtime.shutdown();
    }

    #[test]
    fn closed_channel_leaves_interest_lists() {
        let (servers, _, runtime) = registry();
        servers.register_event(&NodelPoint::new("Lamp1", "Status")).unwrap();
        let (channel, rx) = loopback(&servers);
        channel.handle_message(ChannelMessage::interests("Lamp1", vec!["*".into()], vec![]));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(servers.hosted()[0].interested_channels, 1);

        channel.close();
        assert_eq!(servers.channel_count(), 0);
        assert_eq!(servers.hosted()[0].interested_channels, 0);
        assert_eq!(
            servers.emit_event(&NodelPoint::new("Lamp1", "Status"), None).unwrap(),
            0
        );
        runtime.shutdown();
    }
}
