//! TCP transport and node addressing for Nodel channels.
//!
//! This is the lowest layer of the Nodel stack:
//! - [`NodeAddress`] identifies where a node lives (`host:port`, or in-process)
//! - [`TcpTransport`] binds, accepts and connects plain TCP sockets
//! - [`ChannelStream`] is the connected byte stream every channel reads and writes
//!
//! Everything else builds on top of the [`ChannelStream`] type provided here.

pub mod address;
pub mod error;
pub mod stream;
pub mod tcp;

pub use address::{NodeAddress, IN_PROCESS_HOST};
pub use error::{Result, TransportError};
pub use stream::ChannelStream;
pub use tcp::TcpTransport;
