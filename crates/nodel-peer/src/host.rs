use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nodel_transport::NodeAddress;
use tracing::info;

use crate::bindings::{NodelClientAction, NodelClientEvent};
use crate::clients::ClientRegistry;
use crate::config::NodelConfig;
use crate::discovery::Discovery;
use crate::error::Result;
use crate::hosted::{NodelServerAction, NodelServerEvent};
use crate::listener::ChannelListener;
use crate::name::SimpleName;
use crate::runtime::Runtime;
use crate::servers::ServerRegistry;

/// One running Nodel host: a listener, the server registry behind it and a
/// client registry that reaches local nodes in-process.
pub struct NodelHost {
    config: NodelConfig,
    runtime: Arc<Runtime>,
    servers: Arc<ServerRegistry>,
    clients: Arc<ClientRegistry>,
    listener: ChannelListener,
    shut_down: AtomicBool,
}

impl NodelHost {
    /// Bind the listener and start everything.
    pub fn start(config: NodelConfig, discovery: Arc<dyn Discovery>) -> Result<Self> {
        let runtime = Runtime::new(&config)?;
        let servers = ServerRegistry::new(Arc::clone(&runtime), Arc::clone(&discovery), config.clone());

        let listener = match ChannelListener::bind(&config.bind_host, config.listen_port) {
            Ok(listener) => listener,
            Err(err) => {
                runtime.shutdown();
                return Err(err);
            }
        };
        if let Err(err) = listener.spawn(Arc::clone(&servers)) {
            runtime.shutdown();
            return Err(err);
        }
        let address = listener.local_address();
        servers.set_local_address(address.clone());

        let clients = ClientRegistry::new(
            Arc::clone(&runtime),
            discovery,
            Some(Arc::clone(&servers)),
            config.clone(),
        );

        info!(%address, "nodel host started");
        Ok(Self {
            config,
            runtime,
            servers,
            clients,
            listener,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &NodelConfig {
        &self.config
    }

    /// Address other hosts use to reach this one.
    pub fn address(&self) -> NodeAddress {
        self.listener.local_address()
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn servers(&self) -> &Arc<ServerRegistry> {
        &self.servers
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    pub fn client_action(&self, node: impl Into<SimpleName>, action: impl Into<SimpleName>) -> NodelClientAction {
        NodelClientAction::new(&self.clients, node, action)
    }

    pub fn client_event(&self, node: impl Into<SimpleName>, event: impl Into<SimpleName>) -> NodelClientEvent {
        NodelClientEvent::new(&self.clients, node, event)
    }

    pub fn server_action(&self, node: impl Into<SimpleName>, action: impl Into<SimpleName>) -> NodelServerAction {
        NodelServerAction::new(&self.servers, node, action)
    }

    pub fn server_event(&self, node: impl Into<SimpleName>, event: impl Into<SimpleName>) -> NodelServerEvent {
        NodelServerEvent::new(&self.servers, node, event)
    }

    /// Stop listening, close every channel and stop the workers. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.listener.shutdown();
        self.clients.shutdown();
        self.servers.shutdown();
        self.runtime.shutdown();
        info!("nodel host stopped");
    }
}

impl Drop for NodelHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}
