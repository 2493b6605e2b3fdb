//! Caller-facing handles for remote actions and events.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::trace;

use crate::clients::ClientRegistry;
use crate::error::Result;
use crate::handlers::{HandlerId, Handlers};
use crate::name::{NodelPoint, SimpleName};
use crate::runtime::{lock, SerialQueue, WorkerPool};
use crate::state::BindingState;

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

/// One delivered event.
#[derive(Debug, Clone)]
pub struct EventDelivery {
    pub point: NodelPoint,
    pub arg: Option<Value>,
}

/// State shared between a binding handle and the client registry.
pub(crate) struct BindingCore {
    pub(crate) id: u64,
    pub(crate) point: NodelPoint,
    state: Mutex<BindingState>,
    /// Transitions not yet handed to the state handlers, in applied order.
    pending: SerialQueue<BindingState>,
    state_handlers: Handlers<BindingState>,
    pub(crate) events: Handlers<EventDelivery>,
}

impl BindingCore {
    pub(crate) fn new(point: NodelPoint) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed),
            point,
            state: Mutex::new(BindingState::Empty),
            pending: SerialQueue::default(),
            state_handlers: Handlers::default(),
            events: Handlers::default(),
        })
    }

    pub(crate) fn state(&self) -> BindingState {
        *lock(&self.state)
    }

    /// Record a new state and queue it for the handlers. Returns `false` if
    /// nothing changed.
    pub(crate) fn set_state(&self, next: BindingState) -> bool {
        let mut state = lock(&self.state);
        if *state == next {
            return false;
        }
        let from = *state;
        trace!(point = %self.point, %from, to = %next, "binding state");
        *state = next;
        self.pending.push(next);
        true
    }

    /// Hand queued transitions to the state handlers, oldest first.
    ///
    /// If another thread is already delivering, it delivers these too.
    pub(crate) fn notify_states(&self, pool: &WorkerPool) {
        self.pending
            .drain(|state| self.state_handlers.fire(pool, state));
    }
}

/// Interest in one action of a (possibly remote) node.
///
/// Dropping the handle releases it.
pub struct NodelClientAction {
    registry: Arc<ClientRegistry>,
    core: Arc<BindingCore>,
    registered: AtomicBool,
    closed: AtomicBool,
}

impl NodelClientAction {
    pub fn new(
        registry: &Arc<ClientRegistry>,
        node: impl Into<SimpleName>,
        action: impl Into<SimpleName>,
    ) -> Self {
        Self {
            registry: Arc::clone(registry),
            core: BindingCore::new(NodelPoint::new(node, action)),
            registered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn point(&self) -> &NodelPoint {
        &self.core.point
    }

    pub fn state(&self) -> BindingState {
        self.core.state()
    }

    pub fn add_state_handler(&self, handler: impl Fn(BindingState) + Send + Sync + 'static) -> HandlerId {
        self.core.state_handlers.add(handler)
    }

    pub fn remove_state_handler(&self, id: HandlerId) -> bool {
        self.core.state_handlers.remove(id)
    }

    /// Start resolving and wiring. Calling it again is a no-op.
    pub fn register_interest(&self) -> Result<()> {
        register_once(&self.registered, &self.closed, || {
            self.registry.register_action_interest(&self.core)
        })
    }

    /// Invoke the action. Dropped silently until the node is resolved.
    pub fn call(&self, arg: Option<Value>) {
        self.registry.call(&self.core, arg);
    }

    /// Release the binding. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) || !self.registered.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.registry.release_action(&self.core)
    }
}

impl Drop for NodelClientAction {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Interest in one event of a (possibly remote) node.
///
/// Dropping the handle releases it.
pub struct NodelClientEvent {
    registry: Arc<ClientRegistry>,
    core: Arc<BindingCore>,
    registered: AtomicBool,
    closed: AtomicBool,
}

impl NodelClientEvent {
    pub fn new(
        registry: &Arc<ClientRegistry>,
        node: impl Into<SimpleName>,
        event: impl Into<SimpleName>,
    ) -> Self {
        Self {
            registry: Arc::clone(registry),
            core: BindingCore::new(NodelPoint::new(node, event)),
            registered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn point(&self) -> &NodelPoint {
        &self.core.point
    }

    pub fn state(&self) -> BindingState {
        self.core.state()
    }

    pub fn add_state_handler(&self, handler: impl Fn(BindingState) + Send + Sync + 'static) -> HandlerId {
        self.core.state_handlers.add(handler)
    }

    pub fn remove_state_handler(&self, id: HandlerId) -> bool {
        self.core.state_handlers.remove(id)
    }

    /// Add a handler for delivered events.
    pub fn add_handler(&self, handler: impl Fn(EventDelivery) + Send + Sync + 'static) -> HandlerId {
        self.core.events.add(handler)
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.core.events.remove(id)
    }

    /// Start resolving and wiring. Calling it again is a no-op.
    pub fn register_interest(&self) -> Result<()> {
        register_once(&self.registered, &self.closed, || {
            self.registry.register_event_interest(&self.core)
        })
    }

    /// Release the binding. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) || !self.registered.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.registry.release_event(&self.core)
    }
}

impl Drop for NodelClientEvent {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn register_once(
    registered: &AtomicBool,
    closed: &AtomicBool,
    register: impl FnOnce() -> Result<()>,
) -> Result<()> {
    if closed.load(Ordering::SeqCst) {
        return Err(crate::error::PeerError::Shutdown);
    }
    if registered.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    register().inspect_err(|_| registered.store(false, Ordering::SeqCst))
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use crossbeam::channel;

    use super::*;

    #[test]
    fn state_handlers_see_transitions_in_applied_order() {
        let pool = WorkerPool::new("binding-states", 4).unwrap();
        let core = BindingCore::new(NodelPoint::new("Lamp1", "TurnOn"));
        let (inline_tx, inline_rx) = channel::unbounded();
        let (pooled_tx, pooled_rx) = channel::unbounded();
        core.state_handlers.add(move |state| inline_tx.send(state).unwrap());
        core.state_handlers.add(move |state| pooled_tx.send(state).unwrap());

        let cycle = [
            BindingState::Resolved,
            BindingState::Wired,
            BindingState::ResolutionFailure,
        ];
        let applied: Vec<BindingState> = (0..60).map(|i| cycle[i % cycle.len()]).collect();

        thread::scope(|scope| {
            for state in &applied {
                assert!(core.set_state(*state));
                let core = Arc::clone(&core);
                let pool = &pool;
                scope.spawn(move || core.notify_states(pool));
            }
        });

        let inline: Vec<BindingState> = (0..applied.len())
            .map(|_| inline_rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        let pooled: Vec<BindingState> = (0..applied.len())
            .map(|_| pooled_rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(inline, applied);
        assert_eq!(pooled, applied);
        pool.shutdown();
    }

    #[test]
    fn repeated_state_is_not_announced() {
        let core = BindingCore::new(NodelPoint::new("Lamp1", "TurnOn"));
        assert!(core.set_state(BindingState::Resolved));
        assert!(!core.set_state(BindingState::Resolved));
        assert_eq!(core.pending.len(), 1);
    }
}
