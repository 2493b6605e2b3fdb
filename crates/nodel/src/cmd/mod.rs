use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use nodel_peer::{Discovery, NodelConfig, NodelHost, NodelPoint, StaticDiscovery};
use nodel_transport::NodeAddress;

use crate::exit::{peer_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod host;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Host a node's actions and events until interrupted.
    Host(HostArgs),
    /// Invoke a remote action once it is wired.
    Call(CallArgs),
    /// Print every delivered occurrence of a remote event.
    Watch(WatchArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Host(args) => host::run(args, format),
        Command::Call(args) => call::run(args, format),
        Command::Watch(args) => watch::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// `NODE=HOST:PORT`: where a node lives, bypassing discovery.
#[derive(Clone, Debug)]
pub struct PeerSpec {
    pub node: String,
    pub address: NodeAddress,
}

impl FromStr for PeerSpec {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (node, address) = text
            .split_once('=')
            .ok_or_else(|| format!("expected NODE=HOST:PORT, got '{text}'"))?;
        if node.trim().is_empty() {
            return Err(format!("missing node name in '{text}'"));
        }
        let address = address.parse::<NodeAddress>().map_err(|err| err.to_string())?;
        Ok(Self {
            node: node.trim().to_string(),
            address,
        })
    }
}

#[derive(Args, Debug)]
pub struct HostArgs {
    /// Node name to host.
    #[arg(long)]
    pub node: String,
    /// Action to host (repeatable). Invocations are printed.
    #[arg(long = "action", value_name = "ACTION")]
    pub actions: Vec<String>,
    /// Event to host (repeatable).
    #[arg(long = "event", value_name = "EVENT")]
    pub events: Vec<String>,
    /// Interface to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,
    /// Port to listen on (0 picks one).
    #[arg(long, default_value_t = 0)]
    pub port: u16,
    /// Known location of another node (repeatable).
    #[arg(long = "peer", value_name = "NODE=HOST:PORT")]
    pub peers: Vec<PeerSpec>,
    /// Read `EVENT [JSON]` lines from stdin and emit them.
    #[arg(long)]
    pub emit_stdin: bool,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Action to invoke, as NODE.ACTION.
    pub point: NodelPoint,
    /// JSON argument.
    #[arg(long)]
    pub arg: Option<String>,
    /// Known location of a node (repeatable).
    #[arg(long = "peer", value_name = "NODE=HOST:PORT")]
    pub peers: Vec<PeerSpec>,
    /// How long to wait for the action to be wired (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Event to watch, as NODE.EVENT.
    pub point: NodelPoint,
    /// Known location of a node (repeatable).
    #[arg(long = "peer", value_name = "NODE=HOST:PORT")]
    pub peers: Vec<PeerSpec>,
    /// Exit after N events.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn discovery_from(peers: &[PeerSpec]) -> Arc<dyn Discovery> {
    let discovery = StaticDiscovery::new();
    for peer in peers {
        discovery.insert(peer.node.as_str(), peer.address.clone());
    }
    Arc::new(discovery)
}

/// Host used by the client-side commands: loopback listener, ephemeral port.
pub fn client_host(peers: &[PeerSpec]) -> CliResult<NodelHost> {
    let config = NodelConfig::default()
        .with_listen("127.0.0.1", 0)
        .with_wiring_check_interval(Duration::from_secs(2))
        .with_retry_delay(Duration::from_millis(500))
        .with_connect_backoff(Duration::from_millis(500));
    NodelHost::start(config, discovery_from(peers)).map_err(|err| peer_error("start failed", err))
}

pub fn parse_arg(arg: Option<&str>) -> CliResult<Option<serde_json::Value>> {
    arg.map(|text| {
        serde_json::from_str(text)
            .map_err(|err| CliError::new(USAGE, format!("--arg is not valid JSON: {err}")))
    })
    .transpose()
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

/// Cleared when Ctrl-C arrives.
pub fn running_flag() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(running)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_spec_parses_node_and_address() {
        let peer: PeerSpec = "Lamp 1=127.0.0.1:9000".parse().expect("peer should parse");
        assert_eq!(peer.node, "Lamp 1");
        assert_eq!(peer.address.host(), "127.0.0.1");
        assert_eq!(peer.address.port(), 9000);

        assert!("Lamp1".parse::<PeerSpec>().is_err());
        assert!("=127.0.0.1:9000".parse::<PeerSpec>().is_err());
        assert!("Lamp1=nowhere".parse::<PeerSpec>().is_err());
    }

    #[test]
    fn discovery_resolves_by_reduced_name() {
        let discovery = discovery_from(&["Lamp 1=127.0.0.1:9000".parse().expect("peer")]);
        let found = discovery.resolve(&"lamp1".into()).expect("node should resolve");
        assert_eq!(found.port(), 9000);
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }

    #[test]
    fn arg_must_be_json() {
        assert_eq!(parse_arg(None).unwrap(), None);
        assert_eq!(parse_arg(Some("true")).unwrap(), Some(serde_json::json!(true)));
        assert_eq!(parse_arg(Some("{oops")).unwrap_err().code, USAGE);
    }
}
