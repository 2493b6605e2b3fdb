use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Instant;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use nodel_frame::{ChannelMessage, MessageKind};
use nodel_transport::{NodeAddress, TcpTransport};
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use super::connection::Connection;
use super::server::{ChannelServer, LoopbackSink};
use super::Wiring;
use crate::config::NodelConfig;
use crate::error::{ChannelError, PeerError, Result};
use crate::handlers::CallbackSlot;
use crate::name::{NodelPoint, SimpleName};
use crate::runtime::{lock, Runtime, SerialQueue, TimerHandle};
use crate::servers::ServerRegistry;

pub type EventCallback = Arc<dyn Fn(&NodelPoint, Option<Value>) + Send + Sync>;
pub type ConnectedCallback = dyn Fn() + Send + Sync;
pub type ConnectionFaultCallback = dyn Fn(&ChannelError) + Send + Sync;
/// Receives the node and every name the server confirmed.
pub type WiringSuccessCallback = dyn Fn(&SimpleName, &Wiring) + Send + Sync;
/// Receives the node and the names that are missing. Both sets empty means
/// the node is not present at all.
pub type WiringFaultCallback = dyn Fn(&SimpleName, &Wiring) + Send + Sync;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

enum ClientLink {
    Tcp,
    Loopback(Arc<ServerRegistry>),
}

enum ClientOutbound {
    Tcp(Arc<Connection>),
    /// Messages reach the server in send order through `queue`.
    Loopback {
        server: Arc<ChannelServer>,
        queue: Arc<SerialQueue<ChannelMessage>>,
    },
}

impl ClientOutbound {
    fn send(&self, runtime: &Runtime, message: ChannelMessage) {
        match self {
            ClientOutbound::Tcp(connection) => {
                connection.send(message);
            }
            ClientOutbound::Loopback { server, queue } => {
                let server = Arc::clone(server);
                queue.submit(runtime.pool(), message, move |message| {
                    server.handle_message(message)
                });
            }
        }
    }

    fn close(&self) {
        match self {
            ClientOutbound::Tcp(connection) => connection.close(),
            ClientOutbound::Loopback { server, .. } => server.close(),
        }
    }
}

struct WiringSnapshot {
    confirmed: Wiring,
}

struct NodeInterests {
    node: SimpleName,
    events: HashMap<SimpleName, Vec<EventCallback>>,
    actions: BTreeSet<SimpleName>,
    wiring: Option<WiringSnapshot>,
    last_sync: Option<Instant>,
}

impl NodeInterests {
    fn new(node: SimpleName) -> Self {
        Self {
            node,
            events: HashMap::new(),
            actions: BTreeSet::new(),
            wiring: None,
            last_sync: None,
        }
    }

    fn requested(&self) -> Wiring {
        Wiring {
            actions: self.actions.clone(),
            events: self.events.keys().cloned().collect(),
        }
    }

    fn interests_message(&self) -> ChannelMessage {
        ChannelMessage::interests(
            self.node.original(),
            self.events.keys().map(|e| e.original().to_string()).collect(),
            self.actions.iter().map(|a| a.original().to_string()).collect(),
        )
    }
}

#[derive(Default)]
struct ClientState {
    started: bool,
    disabled: bool,
    outbound: Option<ClientOutbound>,
    nodes: HashMap<SimpleName, NodeInterests>,
    wiring_timer: Option<TimerHandle>,
    wake: Option<Sender<()>>,
}

struct ClientShared {
    id: u64,
    address: NodeAddress,
    link: ClientLink,
    runtime: Arc<Runtime>,
    config: NodelConfig,
    state: Mutex<ClientState>,
    on_connected: CallbackSlot<ConnectedCallback>,
    on_connection_fault: CallbackSlot<ConnectionFaultCallback>,
    on_wiring_success: CallbackSlot<WiringSuccessCallback>,
    on_wiring_fault: CallbackSlot<WiringFaultCallback>,
}

/// Client end of a channel.
///
/// Holds the interests of every node reached through one address. Once the
/// connection fails the channel is permanently disabled; the owner discards
/// it and builds a new one. Callbacks are never invoked while the channel's
/// own lock is held.
#[derive(Clone)]
pub struct ChannelClient {
    shared: Arc<ClientShared>,
}

impl ChannelClient {
    /// Client channel to a remote host over TCP.
    pub fn tcp(address: NodeAddress, runtime: Arc<Runtime>, config: NodelConfig) -> Self {
        Self::with_link(address, ClientLink::Tcp, runtime, config)
    }

    /// Client channel to the server registry in this process.
    pub fn loopback(servers: Arc<ServerRegistry>, runtime: Arc<Runtime>, config: NodelConfig) -> Self {
        Self::with_link(
            NodeAddress::in_process(),
            ClientLink::Loopback(servers),
            runtime,
            config,
        )
    }

    fn with_link(
        address: NodeAddress,
        link: ClientLink,
        runtime: Arc<Runtime>,
        config: NodelConfig,
    ) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
                address,
                link,
                runtime,
                config,
                state: Mutex::new(ClientState::default()),
                on_connected: CallbackSlot::new("connected"),
                on_connection_fault: CallbackSlot::new("connection fault"),
                on_wiring_success: CallbackSlot::new("wiring success"),
                on_wiring_fault: CallbackSlot::new("wiring fault"),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn address(&self) -> &NodeAddress {
        &self.shared.address
    }

    pub fn set_connected_callback(&self, callback: Option<Arc<ConnectedCallback>>) -> Result<()> {
        self.shared.on_connected.set(callback)
    }

    pub fn set_connection_fault_callback(
        &self,
        callback: Option<Arc<ConnectionFaultCallback>>,
    ) -> Result<()> {
        self.shared.on_connection_fault.set(callback)
    }

    pub fn set_wiring_success_callback(
        &self,
        callback: Option<Arc<WiringSuccessCallback>>,
    ) -> Result<()> {
        self.shared.on_wiring_success.set(callback)
    }

    pub fn set_wiring_fault_callback(&self, callback: Option<Arc<WiringFaultCallback>>) -> Result<()> {
        self.shared.on_wiring_fault.set(callback)
    }

    /// Begin connecting and start the periodic wiring check.
    ///
    /// TCP channels retry every `connect_backoff` until connected or closed.
    pub fn start(&self) -> Result<()> {
        let wake = {
            let mut state = lock(&self.shared.state);
            if state.disabled {
                return Err(PeerError::Shutdown);
            }
            if state.started {
                return Err(PeerError::AlreadyStarted);
            }
            state.started = true;

            let weak = Arc::downgrade(&self.shared);
            state.wiring_timer = Some(self.shared.runtime.schedule_repeating(
                self.shared.config.wiring_check_interval,
                move || {
                    if let Some(shared) = weak.upgrade() {
                        ChannelClient { shared }.check_wiring();
                    }
                },
            ));

            let (tx, rx) = channel::bounded::<()>(1);
            state.wake = Some(tx);
            rx
        };

        match &self.shared.link {
            ClientLink::Tcp => {
                let weak = Arc::downgrade(&self.shared);
                let address = self.shared.address.clone();
                thread::Builder::new()
                    .name(format!("nodel-connect-{address}"))
                    .spawn(move || connect_loop(weak, wake))
                    .map_err(PeerError::Spawn)?;
            }
            ClientLink::Loopback(servers) => {
                let servers = Arc::clone(servers);
                let weak = Arc::downgrade(&self.shared);
                self.shared.runtime.execute(move || {
                    if let Some(shared) = weak.upgrade() {
                        ChannelClient { shared }.connect_loopback(&servers);
                    }
                });
            }
        }

        debug!(address = %self.shared.address, "channel started");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared.state).outbound.is_some()
    }

    /// True after `close()` or a connection fault.
    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).disabled
    }

    /// Add an event handler. Repeated registrations are not de-duplicated.
    pub fn register_event_interest(&self, point: &NodelPoint, handler: EventCallback) {
        let mut state = lock(&self.shared.state);
        if state.disabled {
            return;
        }
        state
            .nodes
            .entry(point.node.clone())
            .or_insert_with(|| NodeInterests::new(point.node.clone()))
            .events
            .entry(point.point.clone())
            .or_default()
            .push(handler);
        self.sync_locked(&mut state, &point.node);
    }

    pub fn register_action_interest(&self, point: &NodelPoint) {
        let mut state = lock(&self.shared.state);
        if state.disabled {
            return;
        }
        state
            .nodes
            .entry(point.node.clone())
            .or_insert_with(|| NodeInterests::new(point.node.clone()))
            .actions
            .insert(point.point.clone());
        self.sync_locked(&mut state, &point.node);
    }

    /// Drop every handler for one event. The server keeps its filter; events
    /// that still arrive are ignored.
    pub fn remove_event_interest(&self, point: &NodelPoint) {
        let mut state = lock(&self.shared.state);
        if let Some(entry) = state.nodes.get_mut(&point.node) {
            entry.events.remove(&point.point);
        }
    }

    pub fn remove_action_interest(&self, point: &NodelPoint) {
        let mut state = lock(&self.shared.state);
        if let Some(entry) = state.nodes.get_mut(&point.node) {
            entry.actions.remove(&point.point);
        }
    }

    /// Forget everything about `node`.
    pub fn remove_node(&self, node: &SimpleName) {
        lock(&self.shared.state).nodes.remove(node);
    }

    /// Re-send the interests for `node` if connected.
    pub fn request_sync(&self, node: &SimpleName) {
        let mut state = lock(&self.shared.state);
        self.sync_locked(&mut state, node);
    }

    /// Invoke a remote action. Dropped silently while not connected.
    pub fn send_call_message(&self, point: &NodelPoint, arg: Option<Value>) -> bool {
        let state = lock(&self.shared.state);
        match &state.outbound {
            Some(outbound) => {
                trace!(%point, "sending invoke");
                outbound.send(
                    &self.shared.runtime,
                    ChannelMessage::invoke(point.node.original(), point.point.original(), arg),
                );
                true
            }
            None => {
                debug!(%point, address = %self.shared.address, "not connected; call dropped");
                false
            }
        }
    }

    /// Confirmed wiring last reported by the server for `node`.
    pub fn wiring(&self, node: &SimpleName) -> Option<Wiring> {
        lock(&self.shared.state)
            .nodes
            .get(node)
            .and_then(|entry| entry.wiring.as_ref())
            .map(|snapshot| snapshot.confirmed.clone())
    }

    /// Disable the channel and release the connection. No fault is reported.
    pub fn close(&self) {
        let outbound = {
            let mut state = lock(&self.shared.state);
            if state.disabled {
                return;
            }
            disable_locked(&mut state)
        };
        if let Some(outbound) = outbound {
            outbound.close();
        }
        debug!(address = %self.shared.address, "channel closed");
    }

    fn sync_locked(&self, state: &mut ClientState, node: &SimpleName) {
        let ClientState {
            outbound: Some(outbound),
            nodes,
            ..
        } = state
        else {
            return;
        };
        if let Some(entry) = nodes.get_mut(node) {
            entry.last_sync = Some(Instant::now());
            outbound.send(&self.shared.runtime, entry.interests_message());
        }
    }

    fn try_connect(&self) -> Result<()> {
        let config = &self.shared.config;
        let stream = TcpTransport::connect_with_timeout(&self.shared.address, config.connect_timeout)?;
        let frame = config.frame_config();
        let connection = Connection::open(stream, frame.clone(), self.shared.address.to_string())?;

        let on_message = Arc::downgrade(&self.shared);
        let on_failure = Arc::downgrade(&self.shared);
        let reading = connection.start_reading(
            frame,
            move |message| {
                if let Some(shared) = on_message.upgrade() {
                    ChannelClient { shared }.handle_message(message);
                }
            },
            move |err| {
                if let Some(shared) = on_failure.upgrade() {
                    ChannelClient { shared }.handle_connection_fault(err);
                }
            },
        );
        if let Err(err) = reading {
            connection.close();
            return Err(err);
        }

        self.attach(ClientOutbound::Tcp(connection));
        Ok(())
    }

    fn connect_loopback(&self, servers: &ServerRegistry) {
        let weak = Arc::downgrade(&self.shared);
        let runtime = Arc::clone(&self.shared.runtime);
        let inbound: Arc<SerialQueue<ChannelMessage>> = Arc::new(SerialQueue::default());
        let sink: LoopbackSink = Arc::new(move |message: ChannelMessage| {
            let weak = weak.clone();
            inbound.submit(runtime.pool(), message, move |message| {
                if let Some(shared) = weak.upgrade() {
                    ChannelClient { shared }.handle_message(message);
                }
            });
        });

        match servers.accept_loopback(sink) {
            Ok(server) => self.attach(ClientOutbound::Loopback {
                server,
                queue: Arc::new(SerialQueue::default()),
            }),
            Err(err) => {
                warn!(error = %err, "in-process channel unavailable");
                self.handle_connection_fault(ChannelError::Closed);
            }
        }
    }

    fn attach(&self, outbound: ClientOutbound) {
        {
            let mut state = lock(&self.shared.state);
            if state.disabled {
                drop(state);
                outbound.close();
                return;
            }
            let now = Instant::now();
            for entry in state.nodes.values_mut() {
                entry.last_sync = Some(now);
                outbound.send(&self.shared.runtime, entry.interests_message());
            }
            state.outbound = Some(outbound);
        }

        info!(address = %self.shared.address, "channel connected");
        if let Some(callback) = self.shared.on_connected.get() {
            callback();
        }
    }

    pub(crate) fn handle_message(&self, message: ChannelMessage) {
        match message.kind() {
            MessageKind::Event => self.deliver_event(message),
            MessageKind::Interests => self.apply_wiring(message),
            MessageKind::InvokeFailure => warn!(
                node = message.node.as_deref().unwrap_or_default(),
                action = message.action.as_deref().unwrap_or_default(),
                error = message.error.as_deref().unwrap_or_default(),
                "remote invoke failed"
            ),
            MessageKind::Announcement => debug!(
                node = message.node.as_deref().unwrap_or_default(),
                announcement = ?message.announcement,
                "announcement ignored"
            ),
            kind => debug!(?kind, "unexpected message on client channel"),
        }
    }

    fn deliver_event(&self, message: ChannelMessage) {
        let (Some(node), Some(event)) = (message.node, message.event) else {
            return;
        };
        let point = NodelPoint::new(node, event);
        let handlers = lock(&self.shared.state)
            .nodes
            .get(&point.node)
            .and_then(|entry| entry.events.get(&point.point))
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            trace!(%point, "event with no handler");
            return;
        }
        for handler in handlers {
            let point = point.clone();
            let arg = message.arg.clone();
            self.shared.runtime.execute(move || handler(&point, arg));
        }
    }

    fn apply_wiring(&self, message: ChannelMessage) {
        let Some(node) = message.node.map(SimpleName::new) else {
            return;
        };
        let confirmed = Wiring {
            actions: message
                .actions
                .unwrap_or_default()
                .into_iter()
                .map(SimpleName::new)
                .collect(),
            events: message
                .events
                .unwrap_or_default()
                .into_iter()
                .map(SimpleName::new)
                .collect(),
        };

        let vanished = {
            let mut state = lock(&self.shared.state);
            let Some(entry) = state.nodes.get_mut(&node) else {
                debug!(%node, "wiring for a node we have no interest in");
                return;
            };
            let had_points = entry
                .wiring
                .as_ref()
                .is_some_and(|snapshot| !snapshot.confirmed.is_empty());
            entry.wiring = Some(WiringSnapshot {
                confirmed: confirmed.clone(),
            });
            had_points && confirmed.is_empty()
        };

        if !confirmed.is_empty() {
            debug!(
                %node,
                actions = confirmed.actions.len(),
                events = confirmed.events.len(),
                "wiring confirmed"
            );
            if let Some(callback) = self.shared.on_wiring_success.get() {
                callback(&node, &confirmed);
            }
        } else if vanished {
            info!(%node, address = %self.shared.address, "node no longer present");
            if let Some(callback) = self.shared.on_wiring_fault.get() {
                callback(&node, &Wiring::default());
            }
        }
    }

    /// Periodic wiring check: evaluate answers to the previous refresh, then
    /// refresh every node's interests.
    fn check_wiring(&self) {
        let now = Instant::now();
        let settle = self.shared.config.wiring_check_interval / 2;
        let mut faults = Vec::new();

        {
            let mut state = lock(&self.shared.state);
            let ClientState {
                outbound: Some(outbound),
                nodes,
                disabled: false,
                ..
            } = &mut *state
            else {
                return;
            };

            for entry in nodes.values_mut() {
                let requested = entry.requested();
                if requested.is_empty() {
                    continue;
                }

                let settled = entry
                    .last_sync
                    .is_some_and(|at| now.duration_since(at) >= settle);
                if settled {
                    match entry.wiring.as_ref().map(|snapshot| &snapshot.confirmed) {
                        Some(confirmed) if !confirmed.is_empty() => {
                            let missing = requested.missing_from(confirmed);
                            if !missing.is_empty() {
                                faults.push((entry.node.clone(), missing));
                            }
                        }
                        _ => faults.push((entry.node.clone(), Wiring::default())),
                    }
                }

                entry.last_sync = Some(now);
                outbound.send(&self.shared.runtime, entry.interests_message());
            }
        }

        for (node, missing) in faults {
            if missing.is_empty() {
                debug!(%node, address = %self.shared.address, "node not present");
            } else {
                warn!(
                    %node,
                    missing_actions = ?missing.actions,
                    missing_events = ?missing.events,
                    "wiring incomplete"
                );
            }
            if let Some(callback) = self.shared.on_wiring_fault.get() {
                callback(&node, &missing);
            }
        }
    }

    fn handle_connection_fault(&self, err: ChannelError) {
        let outbound = {
            let mut state = lock(&self.shared.state);
            if state.disabled {
                return;
            }
            disable_locked(&mut state)
        };
        if let Some(outbound) = outbound {
            outbound.close();
        }

        warn!(address = %self.shared.address, error = %err, "channel connection fault");
        if let Some(callback) = self.shared.on_connection_fault.get() {
            callback(&err);
        }
    }
}

fn disable_locked(state: &mut ClientState) -> Option<ClientOutbound> {
    state.disabled = true;
    if let Some(timer) = state.wiring_timer.take() {
        timer.cancel();
    }
    state.wake = None;
    state.outbound.take()
}

fn connect_loop(weak: Weak<ClientShared>, wake: Receiver<()>) {
    loop {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let client = ChannelClient { shared };
        if client.is_closed() {
            return;
        }

        let backoff = client.shared.config.connect_backoff;
        match client.try_connect() {
            Ok(()) => return,
            Err(err) => debug!(
                address = %client.shared.address,
                error = %err,
                retry_in = ?backoff,
                "channel connect failed"
            ),
        }
        drop(client);

        match wake.recv_timeout(backoff) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
