use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use crate::address::NodeAddress;
use crate::error::{Result, TransportError};
use crate::stream::ChannelStream;

/// TCP transport.
///
/// Provides bind/accept/connect over plain TCP. A port of `0` binds an
/// ephemeral port; [`TcpTransport::local_addr`] reports the one chosen.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    shut_down: AtomicBool,
}

impl TcpTransport {
    /// Bind and listen on `host:port`.
    pub fn bind(host: &str, port: u16) -> Result<Self> {
        let label = format!("{host}:{port}");
        let listener = TcpListener::bind((host, port)).map_err(|source| TransportError::Bind {
            addr: label.clone(),
            source,
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind {
                addr: label,
                source,
            })?;

        info!(%local_addr, "listening for channel connections");

        Ok(Self {
            listener,
            local_addr,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Accept an incoming connection (blocking).
    ///
    /// Returns [`TransportError::Shutdown`] once [`TcpTransport::shutdown`] has
    /// been called, even if the wake-up connection is what unblocked us.
    pub fn accept(&self) -> Result<(ChannelStream, NodeAddress)> {
        let (stream, addr) = self.listener.accept().map_err(TransportError::Accept)?;
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown(self.local_addr));
        }
        let _ = stream.set_nodelay(true);
        debug!(peer = %addr, "accepted connection");
        Ok((ChannelStream::from_tcp(stream), NodeAddress::from_socket_addr(addr)))
    }

    /// Connect to a remote node address (blocking).
    pub fn connect(addr: &NodeAddress) -> Result<ChannelStream> {
        Self::connect_with_timeout(addr, None)
    }

    /// Connect with an optional upper bound on the TCP handshake.
    pub fn connect_with_timeout(
        addr: &NodeAddress,
        timeout: Option<Duration>,
    ) -> Result<ChannelStream> {
        let socket_addr = addr.to_socket_addr()?;
        let stream = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&socket_addr, timeout),
            None => TcpStream::connect(socket_addr),
        }
        .map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        let _ = stream.set_nodelay(true);
        debug!(%addr, "connected channel stream");
        Ok(ChannelStream::from_tcp(stream))
    }

    /// The socket address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address peers should use to reach this listener.
    ///
    /// A wildcard bind is reported as loopback.
    pub fn advertised_address(&self) -> NodeAddress {
        NodeAddress::from_socket_addr(reachable(self.local_addr))
    }

    /// Stop accepting. A thread blocked in [`TcpTransport::accept`] is woken.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        // Unblock a pending accept() with a throwaway connection.
        let _ = TcpStream::connect_timeout(&reachable(self.local_addr), Duration::from_millis(200));
        debug!(local_addr = %self.local_addr, "listener shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

fn reachable(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}
