use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use nodel_transport::{NodeAddress, TcpTransport, TransportError};
use tracing::{debug, warn};

use crate::error::{PeerError, Result};
use crate::runtime::lock;
use crate::servers::ServerRegistry;

/// Accepts client channels and hands them to a [`ServerRegistry`].
pub struct ChannelListener {
    transport: Arc<TcpTransport>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelListener {
    /// Bind to `host:port`. Port `0` picks an ephemeral port.
    pub fn bind(host: &str, port: u16) -> Result<Self> {
        Ok(Self {
            transport: Arc::new(TcpTransport::bind(host, port)?),
            accept_thread: Mutex::new(None),
        })
    }

    /// Address clients should connect to.
    pub fn local_address(&self) -> NodeAddress {
        self.transport.advertised_address()
    }

    /// Start the accept loop on its own thread.
    pub fn spawn(&self, servers: Arc<ServerRegistry>) -> Result<()> {
        let mut slot = lock(&self.accept_thread);
        if slot.is_some() {
            return Err(PeerError::AlreadyStarted);
        }
        let transport = Arc::clone(&self.transport);
        let handle = thread::Builder::new()
            .name(format!("nodel-accept-{}", self.transport.local_addr().port()))
            .spawn(move || accept_loop(&transport, &servers))
            .map_err(PeerError::Spawn)?;
        *slot = Some(handle);
        Ok(())
    }

    /// Stop accepting and wait for the accept thread. Channels already
    /// accepted stay open.
    pub fn shutdown(&self) {
        self.transport.shutdown();
        if let Some(handle) = lock(&self.accept_thread).take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ChannelListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(transport: &TcpTransport, servers: &ServerRegistry) {
    loop {
        match transport.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = servers.accept(stream, peer.clone()) {
                    if matches!(err, PeerError::Shutdown) {
                        break;
                    }
                    warn!(%peer, error = %err, "failed to serve client channel");
                }
            }
            Err(TransportError::Shutdown(_)) => break,
            Err(err) => {
                if transport.is_shut_down() {
                    break;
                }
                warn!(error = %err, "accept failed");
            }
        }
    }
    debug!(local_addr = %transport.local_addr(), "accept loop stopped");
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use nodel_frame::{ChannelMessage, MessageReader, MessageWriter};

    use super::*;
    use crate::config::NodelConfig;
    use crate::discovery::StaticDiscovery;
    use crate::name::NodelPoint;
    use crate::runtime::Runtime;

    fn servers() -> Arc<ServerRegistry> {
        let config = NodelConfig::default().with_worker_threads(2);
        let runtime = Runtime::new(&config).expect("runtime should start");
        ServerRegistry::new(runtime, Arc::new(StaticDiscovery::new()), config)
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    #[test]
    fn accepted_connection_answers_interests() {
        let servers = servers();
        servers
            .register_action(&NodelPoint::new("Lamp1", "TurnOn"), Arc::new(|_: Option<serde_json::Value>| {}))
            .expect("register should succeed");

        let listener = ChannelListener::bind("127.0.0.1", 0).expect("listener should bind");
        listener.spawn(Arc::clone(&servers)).expect("spawn should succeed");

        let stream = TcpTransport::connect(&listener.local_address()).expect("connect should succeed");
        let mut reader = MessageReader::new(stream.try_clone().expect("clone should succeed"));
        let mut writer = MessageWriter::new(stream);
        writer
            .send(&ChannelMessage::interests("lamp1", vec![], vec!["*".into()]))
            .expect("send should succeed");

        let reply = reader
            .read_channel_message()
            .expect("read should succeed")
            .expect("server should reply");
        assert_eq!(reply.node.as_deref(), Some("lamp1"));
        assert_eq!(reply.actions, Some(vec!["TurnOn".to_string()]));

        assert!(wait_for(|| servers.channel_count() == 1));
        listener.shutdown();
        listener.shutdown();
    }

    #[test]
    fn spawn_twice_is_rejected() {
        let servers = servers();
        let listener = ChannelListener::bind("127.0.0.1", 0).expect("listener should bind");
        listener.spawn(Arc::clone(&servers)).expect("first spawn should succeed");
        assert!(matches!(
            listener.spawn(servers),
            Err(PeerError::AlreadyStarted)
        ));
    }
}
