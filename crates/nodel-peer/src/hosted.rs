//! Handles for actions and events hosted by this process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::name::{NodelPoint, SimpleName};
use crate::servers::ServerRegistry;

/// An action this process serves. Unregistered when dropped.
pub struct NodelServerAction {
    registry: Arc<ServerRegistry>,
    point: NodelPoint,
    registered: AtomicBool,
}

impl NodelServerAction {
    pub fn new(
        registry: &Arc<ServerRegistry>,
        node: impl Into<SimpleName>,
        action: impl Into<SimpleName>,
    ) -> Self {
        Self {
            registry: Arc::clone(registry),
            point: NodelPoint::new(node, action),
            registered: AtomicBool::new(false),
        }
    }

    pub fn point(&self) -> &NodelPoint {
        &self.point
    }

    /// Start serving with `handler`. Fails if the point is already hosted.
    pub fn register(&self, handler: impl Fn(Option<Value>) + Send + Sync + 'static) -> Result<()> {
        self.registry.register_action(&self.point, Arc::new(handler))?;
        self.registered.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Stop serving. Idempotent.
    pub fn close(&self) -> Result<()> {
        if !self.registered.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.registry.unregister_action(&self.point)
    }
}

impl Drop for NodelServerAction {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// An event this process emits. Unregistered when dropped.
pub struct NodelServerEvent {
    registry: Arc<ServerRegistry>,
    point: NodelPoint,
    registered: AtomicBool,
}

impl NodelServerEvent {
    pub fn new(
        registry: &Arc<ServerRegistry>,
        node: impl Into<SimpleName>,
        event: impl Into<SimpleName>,
    ) -> Self {
        Self {
            registry: Arc::clone(registry),
            point: NodelPoint::new(node, event),
            registered: AtomicBool::new(false),
        }
    }

    pub fn point(&self) -> &NodelPoint {
        &self.point
    }

    pub fn register(&self) -> Result<()> {
        self.registry.register_event(&self.point)?;
        self.registered.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Send the event to every interested channel. Returns how many took it.
    pub fn emit(&self, arg: Option<Value>) -> Result<usize> {
        self.registry.emit_event(&self.point, arg)
    }

    /// Stop emitting. Idempotent.
    pub fn close(&self) -> Result<()> {
        if !self.registered.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.registry.unregister_event(&self.point)
    }
}

impl Drop for NodelServerEvent {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodelConfig;
    use crate::discovery::StaticDiscovery;
    use crate::error::PeerError;
    use crate::runtime::Runtime;

    fn registry() -> Arc<ServerRegistry> {
        let config = NodelConfig::default().with_worker_threads(2);
        let runtime = Runtime::new(&config).expect("runtime should start");
        ServerRegistry::new(runtime, Arc::new(StaticDiscovery::new()), config)
    }

    #[test]
    fn drop_unregisters_action() {
        let servers = registry();
        {
            let action = NodelServerAction::new(&servers, "Lamp1", "TurnOn");
            action.register(|_| {}).expect("register should succeed");
            assert!(servers.hosts(&SimpleName::new("lamp1")));
        }
        assert!(!servers.hosts(&SimpleName::new("lamp1")));
    }

    #[test]
    fn second_handle_for_same_point_is_rejected() {
        let servers = registry();
        let first = NodelServerAction::new(&servers, "Lamp1", "TurnOn");
        first.register(|_| {}).expect("first register should succeed");

        let second = NodelServerAction::new(&servers, "lamp 1", "turnon");
        let err = second.register(|_| {}).expect_err("duplicate must fail");
        assert!(matches!(err, PeerError::DuplicateRegistration(_)));
        assert!(!second.is_registered());

        drop(second);
        assert!(servers.hosts(&SimpleName::new("Lamp1")));
    }

    #[test]
    fn emit_without_listeners_reaches_nobody() {
        let servers = registry();
        let event = NodelServerEvent::new(&servers, "Lamp1", "Status");
        event.register().expect("register should succeed");
        assert_eq!(event.emit(None).expect("emit should succeed"), 0);

        event.close().expect("close should succeed");
        event.close().expect("second close is a no-op");
        // Known node: emitting after unregister still succeeds.
        assert_eq!(event.emit(None).expect("emit should succeed"), 0);
    }
}
