//! Callback slots.
//!
//! [`CallbackSlot`] is unicast: one callback at a time, and replacing it
//! requires clearing it first. [`Handlers`] is multicast: the first handler
//! runs on the calling thread, the rest are queued on the worker pool and
//! see values in the order they were fired.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::error;

use crate::error::{PeerError, Result};
use crate::runtime::{lock, panic_message, SerialQueue, WorkerPool};

/// A single optional callback.
pub struct CallbackSlot<F: ?Sized> {
    name: &'static str,
    slot: Mutex<Option<Arc<F>>>,
}

impl<F: ?Sized> CallbackSlot<F> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(None),
        }
    }

    /// Install or clear the callback.
    ///
    /// Installing while occupied fails with [`PeerError::SlotOccupied`];
    /// passing `None` always succeeds.
    pub fn set(&self, callback: Option<Arc<F>>) -> Result<()> {
        let mut slot = lock(&self.slot);
        if slot.is_some() && callback.is_some() {
            return Err(PeerError::SlotOccupied(self.name));
        }
        *slot = callback;
        Ok(())
    }

    /// Current callback, cloned out so it can be called without the lock.
    pub fn get(&self) -> Option<Arc<F>> {
        lock(&self.slot).clone()
    }

    pub fn is_set(&self) -> bool {
        lock(&self.slot).is_some()
    }
}

/// Identifies a handler added to [`Handlers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<A> = Arc<dyn Fn(A) + Send + Sync + 'static>;

/// Ordered multicast handler list.
pub struct Handlers<A> {
    list: Mutex<Vec<(HandlerId, Handler<A>)>>,
    next_id: AtomicU64,
    deferred: Arc<SerialQueue<(Vec<Handler<A>>, A)>>,
}

impl<A> Default for Handlers<A> {
    fn default() -> Self {
        Self {
            list: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            deferred: Arc::new(SerialQueue::default()),
        }
    }
}

impl<A: Clone + Send + 'static> Handlers<A> {
    pub fn add(&self, handler: impl Fn(A) + Send + Sync + 'static) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.list).push((id, Arc::new(handler)));
        id
    }

    pub fn remove(&self, id: HandlerId) -> bool {
        let mut list = lock(&self.list);
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        list.len() != before
    }

    pub fn len(&self) -> usize {
        lock(&self.list).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.list).is_empty()
    }

    /// Deliver `value` to every handler.
    ///
    /// Handler panics are logged, never propagated.
    pub fn fire(&self, pool: &WorkerPool, value: A) {
        let handlers: Vec<Handler<A>> = lock(&self.list)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        let mut handlers = handlers.into_iter();
        let Some(first) = handlers.next() else {
            return;
        };

        let rest: Vec<Handler<A>> = handlers.collect();
        if !rest.is_empty() {
            self.deferred.submit(pool, (rest, value.clone()), |(rest, value)| {
                for handler in rest {
                    let value = value.clone();
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(value))) {
                        error!(panic = %panic_message(panic.as_ref()), "handler panicked");
                    }
                }
            });
        }

        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| first(value))) {
            error!(panic = %panic_message(panic.as_ref()), "handler panicked");
        }
    }
}
