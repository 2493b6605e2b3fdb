//! Channels: one connection to one remote host, shared by every node
//! reachable through it.
//!
//! The client side declares interests and invokes actions; the server side
//! answers interests, runs actions and forwards events. Both speak
//! [`nodel_frame::ChannelMessage`] over TCP, or hand messages across the
//! worker pool when client and server live in the same process.

mod client;
mod connection;
mod server;

use std::collections::BTreeSet;

pub use client::{
    ChannelClient, ConnectedCallback, ConnectionFaultCallback, EventCallback,
    WiringFaultCallback, WiringSuccessCallback,
};
pub(crate) use connection::Connection;
pub(crate) use server::ServerOutbound;
pub use server::{ActionHandler, ChannelServer, LoopbackSink};

use crate::name::SimpleName;

/// Action and event names for one node: what the server confirmed, or what
/// is missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Wiring {
    pub actions: BTreeSet<SimpleName>,
    pub events: BTreeSet<SimpleName>,
}

impl Wiring {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.events.is_empty()
    }

    /// Names in `self` that `confirmed` does not contain.
    pub fn missing_from(&self, confirmed: &Wiring) -> Wiring {
        Wiring {
            actions: self.actions.difference(&confirmed.actions).cloned().collect(),
            events: self.events.difference(&confirmed.events).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> BTreeSet<SimpleName> {
        list.iter().map(|n| SimpleName::new(*n)).collect()
    }

    #[test]
    fn missing_is_set_difference_on_reduced_names() {
        let requested = Wiring {
            actions: names(&["TurnOn", "TurnOff"]),
            events: names(&["Status"]),
        };
        let confirmed = Wiring {
            actions: names(&["turn on"]),
            events: names(&["STATUS"]),
        };

        let missing = requested.missing_from(&confirmed);
        assert_eq!(missing.actions, names(&["TurnOff"]));
        assert!(missing.events.is_empty());
        assert!(requested.missing_from(&requested).is_empty());
    }
}
