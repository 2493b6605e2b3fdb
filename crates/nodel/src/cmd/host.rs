use std::io::BufRead;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nodel_peer::{NodelConfig, NodelHost, NodelServerAction, NodelServerEvent, ServerRegistry};
use serde_json::Value;
use tracing::warn;

use crate::cmd::{discovery_from, running_flag, HostArgs};
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{flush, print_hosted, print_point, OutputFormat, PointRecord};

pub fn run(args: HostArgs, format: OutputFormat) -> CliResult<i32> {
    if args.actions.is_empty() && args.events.is_empty() {
        return Err(CliError::new(USAGE, "host needs at least one --action or --event"));
    }

    let config = NodelConfig::default().with_listen(args.bind.clone(), args.port);
    let host = NodelHost::start(config, discovery_from(&args.peers))
        .map_err(|err| peer_error("start failed", err))?;

    let mut actions = Vec::with_capacity(args.actions.len());
    for name in &args.actions {
        let action = host.server_action(args.node.as_str(), name.as_str());
        let point = action.point().clone();
        action
            .register(move |arg: Option<Value>| {
                print_point(&PointRecord::new("action", &point, &arg), format);
            })
            .map_err(|err| peer_error("register failed", err))?;
        actions.push(action);
    }

    let mut events = Vec::with_capacity(args.events.len());
    for name in &args.events {
        let event = host.server_event(args.node.as_str(), name.as_str());
        event.register().map_err(|err| peer_error("register failed", err))?;
        events.push(event);
    }

    println!("listening on {}", host.address());
    print_hosted(&host.servers().hosted(), format);
    flush();

    if args.emit_stdin {
        spawn_stdin_emitter(Arc::clone(host.servers()), args.node.clone());
    }

    let running = running_flag()?;
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    close_all(&actions, &events);
    host.shutdown();
    Ok(SUCCESS)
}

fn close_all(actions: &[NodelServerAction], events: &[NodelServerEvent]) {
    for action in actions {
        if let Err(err) = action.close() {
            warn!(point = %action.point(), error = %err, "unregister failed");
        }
    }
    for event in events {
        if let Err(err) = event.close() {
            warn!(point = %event.point(), error = %err, "unregister failed");
        }
    }
}

/// Each stdin line `EVENT [JSON]` emits one event of `node`.
fn spawn_stdin_emitter(servers: Arc<ServerRegistry>, node: String) {
    let spawned = thread::Builder::new()
        .name("nodel-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                match parse_emit_line(&line) {
                    Ok(Some((event, arg))) => {
                        let point = nodel_peer::NodelPoint::new(node.as_str(), event);
                        if let Err(err) = servers.emit_event(&point, arg) {
                            warn!(%point, error = %err, "emit failed");
                        }
                    }
                    Ok(None) => {}
                    Err(message) => warn!(%line, "{message}"),
                }
            }
        });
    if let Err(err) = spawned {
        warn!(error = %err, "stdin reader unavailable");
    }
}

fn parse_emit_line(line: &str) -> Result<Option<(&str, Option<Value>)>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    match line.split_once(char::is_whitespace) {
        None => Ok(Some((line, None))),
        Some((event, rest)) => {
            let arg = serde_json::from_str(rest.trim())
                .map_err(|err| format!("argument is not valid JSON: {err}"))?;
            Ok(Some((event, Some(arg))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emit_line_with_and_without_argument() {
        assert_eq!(parse_emit_line("Status").unwrap(), Some(("Status", None)));
        assert_eq!(
            parse_emit_line("Status  {\"on\": true}").unwrap(),
            Some(("Status", Some(json!({"on": true}))))
        );
        assert_eq!(parse_emit_line("   ").unwrap(), None);
        assert!(parse_emit_line("Status {nope").is_err());
    }
}
