//! Client-side registry.
//!
//! Tracks every node this process holds bindings for, resolves each node to
//! an address, and shares one [`ChannelClient`] per address between all nodes
//! behind it. A single lock guards the node and channel maps. Lock order is
//! registry, then channel; channel callbacks arrive without the channel lock
//! held, so they may take the registry lock.
//!
//! Binding state transitions are applied under the registry lock and handed
//! to state handlers after it is released, in the order they were applied.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use nodel_transport::NodeAddress;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bindings::{BindingCore, EventDelivery};
use crate::channel::{ChannelClient, EventCallback, Wiring};
use crate::config::NodelConfig;
use crate::discovery::Discovery;
use crate::error::{ChannelError, PeerError, Result};
use crate::handlers::CallbackSlot;
use crate::name::{NodelPoint, SimpleName};
use crate::runtime::{lock, Runtime, TimerHandle};
use crate::servers::ServerRegistry;
use crate::state::BindingState;

/// A node answered but lacks some of the requested points.
#[derive(Debug, Clone)]
pub struct WiringFaultReport {
    pub node: SimpleName,
    pub address: NodeAddress,
    /// Each missing point, tagged `MissingActionPoint` or `MissingEventPoint`.
    pub missing: Vec<(NodelPoint, BindingState)>,
}

pub type WiringFaultHandler = dyn Fn(&WiringFaultReport) + Send + Sync;

#[derive(Debug, Clone, Copy)]
enum PointKind {
    Action,
    Event,
}

struct PointEntry {
    point: NodelPoint,
    bindings: Vec<Arc<BindingCore>>,
    registered: bool,
}

struct NodeEntry {
    generation: u64,
    address: Option<NodeAddress>,
    actions: HashMap<SimpleName, PointEntry>,
    events: HashMap<SimpleName, PointEntry>,
    busy: bool,
    dirty: bool,
    recent_connection_error: bool,
    retry_timer: Option<TimerHandle>,
}

impl NodeEntry {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            address: None,
            actions: HashMap::new(),
            events: HashMap::new(),
            busy: false,
            dirty: false,
            recent_connection_error: false,
            retry_timer: None,
        }
    }

    fn points_mut(&mut self, kind: PointKind) -> &mut HashMap<SimpleName, PointEntry> {
        match kind {
            PointKind::Action => &mut self.actions,
            PointKind::Event => &mut self.events,
        }
    }

    fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.events.is_empty()
    }

    fn bindings(&self) -> impl Iterator<Item = &Arc<BindingCore>> {
        self.actions
            .values()
            .chain(self.events.values())
            .flat_map(|entry| entry.bindings.iter())
    }

    fn reset_registration(&mut self) {
        for entry in self.actions.values_mut().chain(self.events.values_mut()) {
            entry.registered = false;
        }
    }
}

struct ChannelEntry {
    channel: ChannelClient,
    nodes: HashSet<SimpleName>,
}

#[derive(Default)]
struct ClientsState {
    nodes: HashMap<SimpleName, NodeEntry>,
    channels: HashMap<NodeAddress, ChannelEntry>,
    disposed: bool,
}

/// Bindings whose state changed under the registry lock, announced after it.
#[derive(Default)]
struct StateChanges(Vec<Arc<BindingCore>>);

impl StateChanges {
    fn set(&mut self, binding: &Arc<BindingCore>, state: BindingState) {
        if binding.set_state(state) {
            self.0.push(Arc::clone(binding));
        }
    }

    fn set_all<'a>(&mut self, bindings: impl Iterator<Item = &'a Arc<BindingCore>>, state: BindingState) {
        for binding in bindings {
            self.set(binding, state);
        }
    }

    fn announce(self, runtime: &Runtime) {
        for binding in self.0 {
            binding.notify_states(runtime.pool());
        }
    }
}

enum Step {
    Resolve,
    Register,
}

/// Registry of client bindings, their nodes and the channels serving them.
pub struct ClientRegistry {
    this: Weak<ClientRegistry>,
    runtime: Arc<Runtime>,
    discovery: Arc<dyn Discovery>,
    servers: Option<Arc<ServerRegistry>>,
    config: NodelConfig,
    next_generation: AtomicU64,
    state: Mutex<ClientsState>,
    fault_handler: CallbackSlot<WiringFaultHandler>,
}

impl ClientRegistry {
    /// `servers` is the local server registry, used to reach nodes hosted in
    /// this process without a socket.
    pub fn new(
        runtime: Arc<Runtime>,
        discovery: Arc<dyn Discovery>,
        servers: Option<Arc<ServerRegistry>>,
        config: NodelConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            runtime,
            discovery,
            servers,
            config,
            next_generation: AtomicU64::new(1),
            state: Mutex::new(ClientsState::default()),
            fault_handler: CallbackSlot::new("wiring fault"),
        })
    }

    /// Process-wide handler for partial wiring faults.
    pub fn set_wiring_fault_handler(&self, handler: Option<Arc<WiringFaultHandler>>) -> Result<()> {
        self.fault_handler.set(handler)
    }

    pub(crate) fn register_action_interest(&self, binding: &Arc<BindingCore>) -> Result<()> {
        self.register(binding, PointKind::Action)
    }

    pub(crate) fn register_event_interest(&self, binding: &Arc<BindingCore>) -> Result<()> {
        self.register(binding, PointKind::Event)
    }

    fn register(&self, binding: &Arc<BindingCore>, kind: PointKind) -> Result<()> {
        let point = &binding.point;
        let mut changes = StateChanges::default();
        {
            let mut state = lock(&self.state);
            if state.disposed {
                return Err(PeerError::Shutdown);
            }

            let ClientsState { nodes, channels, .. } = &mut *state;
            let entry = nodes.entry(point.node.clone()).or_insert_with(|| {
                NodeEntry::new(self.next_generation.fetch_add(1, Ordering::Relaxed))
            });
            let address = entry.address.clone();
            let slot = entry
                .points_mut(kind)
                .entry(point.point.clone())
                .or_insert_with(|| PointEntry {
                    point: point.clone(),
                    bindings: Vec::new(),
                    registered: false,
                });
            if slot.bindings.iter().any(|existing| existing.id == binding.id) {
                return Ok(());
            }
            slot.bindings.push(Arc::clone(binding));
            let registered = slot.registered;

            if let Some(address) = address {
                changes.set(binding, BindingState::Resolved);
                if registered {
                    if let Some(channel) = channels.get(&address) {
                        channel.channel.request_sync(&point.node);
                    }
                }
            }
            debug!(%point, ?kind, "binding registered");
            self.try_maintain_locked(&mut state, &point.node);
        }
        changes.announce(&self.runtime);
        Ok(())
    }

    pub(crate) fn release_action(&self, binding: &Arc<BindingCore>) -> Result<()> {
        self.release(binding, PointKind::Action)
    }

    pub(crate) fn release_event(&self, binding: &Arc<BindingCore>) -> Result<()> {
        self.release(binding, PointKind::Event)
    }

    fn release(&self, binding: &Arc<BindingCore>, kind: PointKind) -> Result<()> {
        let point = &binding.point;
        let mut state = lock(&self.state);
        let ClientsState { nodes, channels, .. } = &mut *state;

        let Some(entry) = nodes.get_mut(&point.node) else {
            return Err(PeerError::NotRegistered(point.clone()));
        };
        let channel = entry
            .address
            .as_ref()
            .and_then(|address| channels.get(address))
            .map(|channel| channel.channel.clone());
        let points = entry.points_mut(kind);
        let Some(slot) = points.get_mut(&point.point) else {
            return Err(PeerError::NotRegistered(point.clone()));
        };
        let before = slot.bindings.len();
        slot.bindings.retain(|existing| existing.id != binding.id);
        if slot.bindings.len() == before {
            return Err(PeerError::NotRegistered(point.clone()));
        }

        if slot.bindings.is_empty() {
            let registered = slot.registered;
            points.remove(&point.point);
            if let (true, Some(channel)) = (registered, channel.as_ref()) {
                match kind {
                    PointKind::Action => channel.remove_action_interest(point),
                    PointKind::Event => channel.remove_event_interest(point),
                }
            }
        }
        debug!(%point, ?kind, "binding released");

        if entry.is_empty() {
            let entry = nodes.remove(&point.node);
            if let Some(entry) = entry {
                self.teardown_node(channels, &point.node, entry);
            }
        }
        Ok(())
    }

    fn teardown_node(
        &self,
        channels: &mut HashMap<NodeAddress, ChannelEntry>,
        node: &SimpleName,
        entry: NodeEntry,
    ) {
        if let Some(timer) = entry.retry_timer {
            timer.cancel();
        }
        if let Some(address) = entry.address {
            Self::detach_locked(channels, &address, node);
        }
        debug!(%node, "node entry removed");
    }

    /// Remove `node` from the channel at `address`, closing the channel when
    /// no node is left on it.
    fn detach_locked(
        channels: &mut HashMap<NodeAddress, ChannelEntry>,
        address: &NodeAddress,
        node: &SimpleName,
    ) {
        let Some(channel) = channels.get_mut(address) else {
            return;
        };
        channel.nodes.remove(node);
        channel.channel.remove_node(node);
        if channel.nodes.is_empty() {
            if let Some(channel) = channels.remove(address) {
                channel.channel.close();
                info!(%address, "channel released");
            }
        }
    }

    /// Invoke an action through the node's channel. Dropped if unresolved.
    pub(crate) fn call(&self, binding: &BindingCore, arg: Option<Value>) {
        let channel = {
            let state = lock(&self.state);
            state
                .nodes
                .get(&binding.point.node)
                .and_then(|entry| entry.address.as_ref())
                .and_then(|address| state.channels.get(address))
                .map(|channel| channel.channel.clone())
        };
        match channel {
            Some(channel) => {
                channel.send_call_message(&binding.point, arg);
            }
            None => debug!(point = %binding.point, "node unresolved; call dropped"),
        }
    }

    /// Start a maintenance pass for `node`, or flag the running one to go again.
    fn try_maintain_locked(&self, state: &mut ClientsState, node: &SimpleName) {
        let Some(entry) = state.nodes.get_mut(node) else {
            return;
        };
        if entry.busy {
            entry.dirty = true;
            return;
        }
        entry.busy = true;

        let weak = self.this.clone();
        let generation = entry.generation;
        let task_node = node.clone();
        let queued = self.runtime.execute(move || {
            if let Some(registry) = weak.upgrade() {
                registry.maintain_node(&task_node, generation);
            }
        });
        if !queued {
            entry.busy = false;
        }
    }

    fn maintain_node(&self, node: &SimpleName, generation: u64) {
        loop {
            let mut changes = StateChanges::default();
            let step = {
                let mut state = lock(&self.state);
                if state.disposed {
                    return;
                }
                let Some(entry) = current(&mut state.nodes, node, generation) else {
                    return;
                };
                entry.dirty = false;

                if entry.address.is_some() {
                    Step::Register
                } else if entry.recent_connection_error {
                    entry.recent_connection_error = false;
                    self.fail_resolution_locked(entry, node, &mut changes);
                    entry.busy = false;
                    drop(state);
                    changes.announce(&self.runtime);
                    return;
                } else {
                    Step::Resolve
                }
            };

            if let Step::Resolve = step {
                let resolved = self.resolve(node);
                let started = {
                    let mut state = lock(&self.state);
                    if state.disposed {
                        return;
                    }
                    match resolved {
                        Some(address) => self.bind_locked(&mut state, node, generation, address, &mut changes),
                        None => {
                            let Some(entry) = current(&mut state.nodes, node, generation) else {
                                return;
                            };
                            debug!(%node, "node did not resolve");
                            self.fail_resolution_locked(entry, node, &mut changes);
                            entry.busy = false;
                            drop(state);
                            changes.announce(&self.runtime);
                            return;
                        }
                    }
                };
                std::mem::take(&mut changes).announce(&self.runtime);
                if let Some(channel) = started {
                    if let Err(err) = channel.start() {
                        warn!(address = %channel.address(), error = %err, "channel failed to start");
                    }
                }
            }

            let again = {
                let mut state = lock(&self.state);
                if state.disposed {
                    return;
                }
                let ClientsState { nodes, channels, .. } = &mut *state;
                let Some(entry) = current(nodes, node, generation) else {
                    return;
                };
                let channel = entry
                    .address
                    .as_ref()
                    .and_then(|address| channels.get(address))
                    .map(|channel| channel.channel.clone());
                if let Some(channel) = channel {
                    for slot in entry.actions.values_mut().filter(|slot| !slot.registered) {
                        channel.register_action_interest(&slot.point);
                        slot.registered = true;
                    }
                    for slot in entry.events.values_mut().filter(|slot| !slot.registered) {
                        channel.register_event_interest(&slot.point, self.event_dispatcher());
                        slot.registered = true;
                    }
                }
                if !entry.dirty {
                    entry.busy = false;
                }
                entry.dirty
            };
            changes.announce(&self.runtime);

            if !again {
                return;
            }
        }
    }

    fn resolve(&self, node: &SimpleName) -> Option<NodeAddress> {
        if let Some(servers) = &self.servers {
            if servers.hosts(node) {
                return Some(NodeAddress::in_process());
            }
        }
        self.discovery.resolve(node)
    }

    /// Attach `node` to the channel for `address`, creating the channel if
    /// needed. Returns a newly created channel that still has to be started.
    fn bind_locked(
        &self,
        state: &mut ClientsState,
        node: &SimpleName,
        generation: u64,
        address: NodeAddress,
        changes: &mut StateChanges,
    ) -> Option<ChannelClient> {
        let ClientsState { nodes, channels, .. } = state;
        let entry = current(nodes, node, generation)?;

        let mut created = None;
        if !channels.contains_key(&address) {
            match self.new_channel(&address) {
                Ok(channel) => {
                    created = Some(channel.clone());
                    channels.insert(
                        address.clone(),
                        ChannelEntry {
                            channel,
                            nodes: HashSet::new(),
                        },
                    );
                }
                Err(err) => {
                    warn!(%node, %address, error = %err, "could not create channel");
                    self.fail_resolution_locked(entry, node, changes);
                    return None;
                }
            }
        }
        if let Some(channel) = channels.get_mut(&address) {
            channel.nodes.insert(node.clone());
        }

        info!(%node, %address, "node resolved");
        entry.address = Some(address);
        changes.set_all(entry.bindings(), BindingState::Resolved);
        created
    }

    fn new_channel(&self, address: &NodeAddress) -> Result<ChannelClient> {
        let runtime = Arc::clone(&self.runtime);
        let channel = match (&self.servers, address.is_in_process()) {
            (Some(servers), true) => {
                ChannelClient::loopback(Arc::clone(servers), runtime, self.config.clone())
            }
            _ => ChannelClient::tcp(address.clone(), runtime, self.config.clone()),
        };
        let id = channel.id();

        let weak = self.this.clone();
        let fault_address = address.clone();
        channel.set_connection_fault_callback(Some(Arc::new(move |err: &ChannelError| {
            if let Some(registry) = weak.upgrade() {
                registry.on_connection_fault(&fault_address, id, err);
            }
        })))?;

        let weak = self.this.clone();
        let wired_address = address.clone();
        channel.set_wiring_success_callback(Some(Arc::new(
            move |node: &SimpleName, wiring: &Wiring| {
                if let Some(registry) = weak.upgrade() {
                    registry.on_wiring_success(&wired_address, id, node, wiring);
                }
            },
        )))?;

        let weak = self.this.clone();
        let fault_address = address.clone();
        channel.set_wiring_fault_callback(Some(Arc::new(
            move |node: &SimpleName, missing: &Wiring| {
                if let Some(registry) = weak.upgrade() {
                    registry.on_wiring_fault(&fault_address, id, node, missing);
                }
            },
        )))?;

        Ok(channel)
    }

    fn event_dispatcher(&self) -> EventCallback {
        let weak = self.this.clone();
        Arc::new(move |point: &NodelPoint, arg: Option<Value>| {
            if let Some(registry) = weak.upgrade() {
                registry.deliver_event(point, arg);
            }
        })
    }

    fn deliver_event(&self, point: &NodelPoint, arg: Option<Value>) {
        let bindings = lock(&self.state)
            .nodes
            .get(&point.node)
            .and_then(|entry| entry.events.get(&point.point))
            .map(|slot| slot.bindings.clone())
            .unwrap_or_default();

        for binding in bindings {
            binding.events.fire(
                self.runtime.pool(),
                EventDelivery {
                    point: binding.point.clone(),
                    arg: arg.clone(),
                },
            );
        }
    }

    fn fail_resolution_locked(&self, entry: &mut NodeEntry, node: &SimpleName, changes: &mut StateChanges) {
        changes.set_all(entry.bindings(), BindingState::ResolutionFailure);
        self.schedule_retry_locked(entry, node);
    }

    /// At most one retry is pending per node.
    fn schedule_retry_locked(&self, entry: &mut NodeEntry, node: &SimpleName) {
        if entry.retry_timer.is_some() {
            return;
        }
        let weak = self.this.clone();
        let generation = entry.generation;
        let retry_node = node.clone();
        debug!(%node, delay = ?self.config.retry_delay, "retry scheduled");
        entry.retry_timer = Some(self.runtime.schedule_once(self.config.retry_delay, move || {
            if let Some(registry) = weak.upgrade() {
                registry.retry(&retry_node, generation);
            }
        }));
    }

    fn retry(&self, node: &SimpleName, generation: u64) {
        let mut state = lock(&self.state);
        if state.disposed {
            return;
        }
        let Some(entry) = current(&mut state.nodes, node, generation) else {
            return;
        };
        entry.retry_timer = None;
        self.try_maintain_locked(&mut state, node);
    }

    fn channel_matches(state: &ClientsState, address: &NodeAddress, id: u64) -> bool {
        state
            .channels
            .get(address)
            .is_some_and(|entry| entry.channel.id() == id)
    }

    fn on_connection_fault(&self, address: &NodeAddress, id: u64, err: &ChannelError) {
        let mut state = lock(&self.state);
        if state.disposed || !Self::channel_matches(&state, address, id) {
            return;
        }
        let Some(lost) = state.channels.remove(address) else {
            return;
        };
        warn!(%address, error = %err, nodes = lost.nodes.len(), "channel lost");

        for node in &lost.nodes {
            if let Some(entry) = state.nodes.get_mut(node) {
                entry.address = None;
                entry.reset_registration();
                entry.recent_connection_error = true;
            }
            self.try_maintain_locked(&mut state, node);
        }
        lost.channel.close();
    }

    fn on_wiring_success(&self, address: &NodeAddress, id: u64, node: &SimpleName, wiring: &Wiring) {
        let mut changes = StateChanges::default();
        {
            let state = lock(&self.state);
            if state.disposed || !Self::channel_matches(&state, address, id) {
                return;
            }
            let Some(entry) = state.nodes.get(node) else {
                return;
            };
            if entry.address.as_ref() != Some(address) {
                return;
            }
            for name in &wiring.actions {
                if let Some(slot) = entry.actions.get(name) {
                    changes.set_all(slot.bindings.iter(), BindingState::Wired);
                }
            }
            for name in &wiring.events {
                if let Some(slot) = entry.events.get(name) {
                    changes.set_all(slot.bindings.iter(), BindingState::Wired);
                }
            }
        }
        changes.announce(&self.runtime);
    }

    fn on_wiring_fault(&self, address: &NodeAddress, id: u64, node: &SimpleName, missing: &Wiring) {
        if !missing.is_empty() {
            let report = WiringFaultReport {
                node: node.clone(),
                address: address.clone(),
                missing: missing
                    .actions
                    .iter()
                    .map(|action| {
                        (NodelPoint::new(node, action), BindingState::MissingActionPoint)
                    })
                    .chain(missing.events.iter().map(|event| {
                        (NodelPoint::new(node, event), BindingState::MissingEventPoint)
                    }))
                    .collect(),
            };
            warn!(%node, %address, missing = report.missing.len(), "node is missing requested points");
            if let Some(handler) = self.fault_handler.get() {
                handler(&report);
            }
            return;
        }

        let mut changes = StateChanges::default();
        {
            let mut state = lock(&self.state);
            if state.disposed || !Self::channel_matches(&state, address, id) {
                return;
            }
            let ClientsState { nodes, channels, .. } = &mut *state;
            let Some(entry) = nodes.get_mut(node) else {
                return;
            };
            if entry.address.as_ref() != Some(address) {
                return;
            }

            info!(%node, %address, "node not present; will resolve again");
            entry.address = None;
            entry.reset_registration();
            Self::detach_locked(channels, address, node);
            self.fail_resolution_locked(entry, node, &mut changes);
        }
        changes.announce(&self.runtime);
    }

    /// Number of live channels, one per distinct address.
    pub fn channel_count(&self) -> usize {
        lock(&self.state).channels.len()
    }

    /// Diagnostic view of every node, binding and channel.
    pub fn snapshot(&self) -> ClientSnapshot {
        let state = lock(&self.state);
        let mut nodes: Vec<NodeSnapshot> = state
            .nodes
            .iter()
            .map(|(name, entry)| NodeSnapshot {
                node: name.original().to_string(),
                address: entry.address.as_ref().map(ToString::to_string),
                connected: entry
                    .address
                    .as_ref()
                    .and_then(|address| state.channels.get(address))
                    .is_some_and(|channel| channel.channel.is_connected()),
                retry_pending: entry.retry_timer.is_some(),
                actions: point_snapshots(&entry.actions),
                events: point_snapshots(&entry.events),
            })
            .collect();
        nodes.sort_by(|a, b| a.node.cmp(&b.node));

        let mut channels: Vec<ChannelSnapshot> = state
            .channels
            .iter()
            .map(|(address, entry)| {
                let mut nodes: Vec<String> =
                    entry.nodes.iter().map(|n| n.original().to_string()).collect();
                nodes.sort();
                ChannelSnapshot {
                    address: address.to_string(),
                    connected: entry.channel.is_connected(),
                    nodes,
                }
            })
            .collect();
        channels.sort_by(|a, b| a.address.cmp(&b.address));

        ClientSnapshot { nodes, channels }
    }

    /// Close every channel and cancel every retry. Bindings stay in their
    /// last state.
    pub fn shutdown(&self) {
        let channels = {
            let mut state = lock(&self.state);
            if state.disposed {
                return;
            }
            state.disposed = true;
            for entry in state.nodes.values_mut() {
                if let Some(timer) = entry.retry_timer.take() {
                    timer.cancel();
                }
            }
            state.nodes.clear();
            state
                .channels
                .drain()
                .map(|(_, entry)| entry.channel)
                .collect::<Vec<_>>()
        };
        for channel in channels {
            channel.close();
        }
        debug!("client registry shut down");
    }
}

fn current<'a>(
    nodes: &'a mut HashMap<SimpleName, NodeEntry>,
    node: &SimpleName,
    generation: u64,
) -> Option<&'a mut NodeEntry> {
    nodes
        .get_mut(node)
        .filter(|entry| entry.generation == generation)
}

fn point_snapshots(points: &HashMap<SimpleName, PointEntry>) -> Vec<PointSnapshot> {
    let mut out: Vec<PointSnapshot> = points
        .values()
        .map(|slot| PointSnapshot {
            point: slot.point.point.original().to_string(),
            registered: slot.registered,
            states: slot.bindings.iter().map(|binding| binding.state()).collect(),
        })
        .collect();
    out.sort_by(|a, b| a.point.cmp(&b.point));
    out
}

/// Serializable view returned by [`ClientRegistry::snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub channels: Vec<ChannelSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub node: String,
    pub address: Option<String>,
    pub connected: bool,
    pub retry_pending: bool,
    pub actions: Vec<PointSnapshot>,
    pub events: Vec<PointSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PointSnapshot {
    pub point: String,
    pub registered: bool,
    /// One entry per binding.
    pub states: Vec<BindingState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelSnapshot {
    pub address: String,
    pub connected: bool,
    pub nodes: Vec<String>,
}

impl ClientSnapshot {
    pub fn node(&self, name: &str) -> Option<&NodeSnapshot> {
        let wanted = crate::name::reduce(name);
        self.nodes
            .iter()
            .find(|node| crate::name::reduce(&node.node) == wanted)
    }
}
