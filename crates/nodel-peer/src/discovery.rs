//! Name resolution and advertisement.

use std::collections::HashMap;
use std::sync::RwLock;

use nodel_transport::NodeAddress;
use tracing::debug;

use crate::name::SimpleName;

/// Resolves node names to channel addresses and advertises hosted nodes.
///
/// `resolve` may block; registries only call it from worker threads.
pub trait Discovery: Send + Sync {
    /// Where does `node` live, if anywhere?
    fn resolve(&self, node: &SimpleName) -> Option<NodeAddress>;

    /// Announce that `node` is now hosted at `address`.
    fn advertise(&self, node: &SimpleName, address: &NodeAddress);

    /// Withdraw a previous announcement.
    fn unadvertise(&self, node: &SimpleName);
}

/// In-memory name table. Several hosts may share one instance; each
/// advertisement records the advertising host's address.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    entries: RwLock<HashMap<SimpleName, NodeAddress>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `node` to `address` (e.g. from a `--peer NODE=HOST:PORT` flag).
    pub fn insert(&self, node: impl Into<SimpleName>, address: NodeAddress) {
        let node = node.into();
        debug!(%node, %address, "static discovery entry");
        self.write().insert(node, address);
    }

    pub fn remove(&self, node: &SimpleName) -> Option<NodeAddress> {
        self.write().remove(node)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SimpleName, NodeAddress>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SimpleName, NodeAddress>> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }
}

impl Discovery for StaticDiscovery {
    fn resolve(&self, node: &SimpleName) -> Option<NodeAddress> {
        self.read().get(node).cloned()
    }

    fn advertise(&self, node: &SimpleName, address: &NodeAddress) {
        debug!(%node, %address, "advertising node");
        self.write().insert(node.clone(), address.clone());
    }

    fn unadvertise(&self, node: &SimpleName) {
        debug!(%node, "withdrawing node");
        self.write().remove(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_by_reduced_name() {
        let discovery = StaticDiscovery::new();
        discovery.insert("Lamp 1", NodeAddress::new("127.0.0.1", 9000));

        let found = discovery.resolve(&SimpleName::new("LAMP1")).unwrap();
        assert_eq!(found.port(), 9000);
        assert!(discovery.resolve(&SimpleName::new("Lamp2")).is_none());
    }

    #[test]
    fn unadvertise_removes_entry() {
        let discovery = StaticDiscovery::new();
        let node = SimpleName::new("Lamp1");
        discovery.advertise(&node, &NodeAddress::new("127.0.0.1", 9001));
        assert_eq!(discovery.len(), 1);

        discovery.unadvertise(&node);
        assert!(discovery.is_empty());
        assert!(discovery.resolve(&node).is_none());
    }
}
