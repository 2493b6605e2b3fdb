//! Nodes, actions and events wired across hosts.
//!
//! A Nodel host serves *actions* (invocable with a JSON argument) and
//! *events* (emitted with a JSON argument) under node names. Other hosts bind
//! to them by name: bindings resolve the node, share one channel per remote
//! address and report their progress as a [`BindingState`].
//!
//! # Crate Structure
//!
//! - [`transport`]: node addresses and the TCP stream transport
//! - [`frame`]: channel messages and brace-balanced JSON framing
//! - [`peer`]: channels, client and server registries, bindings, [`NodelHost`]

/// Re-export transport types.
pub mod transport {
    pub use nodel_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use nodel_frame::*;
}

/// Re-export peer types.
pub mod peer {
    pub use nodel_peer::*;
}

pub use nodel_peer::{
    BindingState, Discovery, NodelClientAction, NodelClientEvent, NodelConfig, NodelHost,
    NodelPoint, NodelServerAction, NodelServerEvent, SimpleName, StaticDiscovery,
};
pub use nodel_transport::NodeAddress;
