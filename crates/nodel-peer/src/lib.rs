//! Nodes, actions and events wired across hosts.
//!
//! A host serves actions and events under node names through a
//! [`ServerRegistry`], and binds to actions and events of other nodes through
//! a [`ClientRegistry`]. Client bindings resolve their node through a
//! [`Discovery`] service, share one [`ChannelClient`] per remote address and
//! report progress as a [`BindingState`]. [`NodelHost`] assembles the pieces.

pub mod bindings;
pub mod channel;
pub mod clients;
pub mod config;
pub mod discovery;
pub mod error;
pub mod handlers;
pub mod host;
pub mod hosted;
pub mod listener;
pub mod name;
pub mod runtime;
pub mod servers;
pub mod state;

pub use bindings::{EventDelivery, NodelClientAction, NodelClientEvent};
pub use channel::{ChannelClient, ChannelServer, Wiring};
pub use clients::{ClientRegistry, ClientSnapshot, WiringFaultReport};
pub use config::NodelConfig;
pub use discovery::{Discovery, StaticDiscovery};
pub use error::{ChannelError, PeerError, Result};
pub use handlers::HandlerId;
pub use host::NodelHost;
pub use hosted::{NodelServerAction, NodelServerEvent};
pub use listener::ChannelListener;
pub use name::{filter_match, reduce, NameFilters, NodelPoint, SimpleName};
pub use runtime::Runtime;
pub use servers::{HostedNode, ServerRegistry};
pub use state::BindingState;
