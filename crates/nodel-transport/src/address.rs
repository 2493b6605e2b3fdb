use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, TransportError};

/// Host name used by the in-process sentinel address.
pub const IN_PROCESS_HOST: &str = "in-process";

/// Where a node can be reached: a `host:port` pair, or the in-process sentinel.
///
/// Equality and hashing use the host with whitespace removed and ASCII case
/// folded, so `"Lamp-Host :9000"` and `"lamp-host:9000"` name the same peer.
/// The original spelling is kept for display only.
#[derive(Clone)]
pub struct NodeAddress {
    host: String,
    port: u16,
}

impl NodeAddress {
    /// Create an address from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into().trim().to_string(),
            port,
        }
    }

    /// The sentinel address for nodes hosted in this process.
    pub fn in_process() -> Self {
        Self::new(IN_PROCESS_HOST, 0)
    }

    /// Address of a bound or connected socket.
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }

    /// True for the in-process sentinel.
    pub fn is_in_process(&self) -> bool {
        self.port == 0 && normalize_host(&self.host) == IN_PROCESS_HOST
    }

    /// Host as originally spelled.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve to the first socket address for this host.
    pub fn to_socket_addr(&self) -> Result<SocketAddr> {
        if self.is_in_process() {
            return Err(TransportError::InProcess);
        }
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                addr: self.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| TransportError::Unresolvable(self.to_string()))
    }

    fn key(&self) -> (String, u16) {
        (normalize_host(&self.host), self.port)
    }
}

fn normalize_host(host: &str) -> String {
    host.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl PartialEq for NodeAddress {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for NodeAddress {}

impl Hash for NodeAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_in_process() {
            return f.write_str(IN_PROCESS_HOST);
        }
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Debug for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeAddress({self})")
    }
}

impl FromStr for NodeAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        if normalize_host(text) == IN_PROCESS_HOST {
            return Ok(Self::in_process());
        }

        let (host, port) = text
            .rsplit_once(':')
            .ok_or_else(|| TransportError::InvalidAddress(s.to_string()))?;
        let host = host.trim().trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(TransportError::InvalidAddress(s.to_string()));
        }
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| TransportError::InvalidAddress(s.to_string()))?;

        Ok(Self::new(host, port))
    }
}

impl Serialize for NodeAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn equality_ignores_case_and_spaces() {
        let a = NodeAddress::new("Lamp-Host ", 9000);
        let b: NodeAddress = "lamp-host:9000".parse().unwrap();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn port_distinguishes_addresses() {
        assert_ne!(NodeAddress::new("host", 1), NodeAddress::new("host", 2));
    }

    #[test]
    fn in_process_sentinel() {
        let addr = NodeAddress::in_process();
        assert!(addr.is_in_process());
        assert_eq!(addr.to_string(), IN_PROCESS_HOST);
        assert!(matches!(addr.to_socket_addr(), Err(TransportError::InProcess)));
        assert_eq!("In-Process".parse::<NodeAddress>().unwrap(), addr);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("no-port".parse::<NodeAddress>().is_err());
        assert!(":80".parse::<NodeAddress>().is_err());
        assert!("host:99999".parse::<NodeAddress>().is_err());
    }

    #[test]
    fn parse_ipv6_brackets() {
        let addr: NodeAddress = "[::1]:8085".parse().unwrap();
        assert_eq!(addr.host(), "::1");
        assert_eq!(addr.port(), 8085);
        assert_eq!(addr.to_string(), "[::1]:8085");
    }

    #[test]
    fn serde_as_string() {
        let addr = NodeAddress::new("10.0.0.5", 8085);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"10.0.0.5:8085\"");
        let back: NodeAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn resolves_loopback() {
        let addr = NodeAddress::new("127.0.0.1", 4321);
        let socket = addr.to_socket_addr().unwrap();
        assert_eq!(socket.port(), 4321);
    }
}
