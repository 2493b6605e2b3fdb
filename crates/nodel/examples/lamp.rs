//! Two hosts in one process: one serves `Lamp1`, the other switches it on
//! and watches its status.
//!
//! Run with:
//!   cargo run --example lamp

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nodel::{BindingState, Discovery, NodelConfig, NodelHost, StaticDiscovery};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Both hosts share one name table, standing in for network discovery.
    let discovery: Arc<dyn Discovery> = Arc::new(StaticDiscovery::new());
    let config = NodelConfig::default().with_listen("127.0.0.1", 0);

    let lamp_host = NodelHost::start(config.clone(), Arc::clone(&discovery))?;
    let switch_host = NodelHost::start(config, discovery)?;
    eprintln!("Lamp1 hosted on {}", lamp_host.address());

    let status = Arc::new(lamp_host.server_event("Lamp1", "Status"));
    status.register()?;
    let turn_on = lamp_host.server_action("Lamp1", "TurnOn");
    let emitter = Arc::clone(&status);
    turn_on.register(move |arg| {
        eprintln!("TurnOn invoked with {arg:?}");
        let _ = emitter.emit(Some(json!({ "on": true })));
    })?;

    let watch = switch_host.client_event("Lamp1", "Status");
    watch.add_handler(|delivery| eprintln!("{} -> {:?}", delivery.point, delivery.arg));
    watch.register_interest()?;

    let switch = switch_host.client_action("Lamp1", "TurnOn");
    switch.add_state_handler(|state| eprintln!("TurnOn binding is {state}"));
    switch.register_interest()?;

    let deadline = Instant::now() + Duration::from_secs(5);
    while switch.state() != BindingState::Wired || watch.state() != BindingState::Wired {
        if Instant::now() > deadline {
            return Err("bindings were not wired in time".into());
        }
        thread::sleep(Duration::from_millis(20));
    }

    switch.call(Some(json!(true)));
    thread::sleep(Duration::from_millis(500));
    Ok(())
}
