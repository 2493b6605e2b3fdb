use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use nodel_peer::BindingState;

use crate::cmd::{client_host, parse_arg, parse_duration, CallArgs};
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_call, CallRecord, OutputFormat};

/// Invocations are fire-and-forget; give the writer thread a moment to put
/// the message on the wire before the channel closes.
const SEND_GRACE: Duration = Duration::from_millis(250);

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let arg = parse_arg(args.arg.as_deref())?;
    let host = client_host(&args.peers)?;

    let action = host.client_action(&args.point.node, &args.point.point);
    let (tx, rx) = channel::unbounded();
    action.add_state_handler(move |state| {
        let _ = tx.send(state);
    });

    let started = Instant::now();
    action
        .register_interest()
        .map_err(|err| peer_error("register failed", err))?;

    wait_until_wired(&rx, timeout).map_err(|last| {
        CliError::new(
            TIMEOUT,
            format!("{} not wired within {:?} (state: {last})", args.point, timeout),
        )
    })?;
    let wired_after = started.elapsed();

    action.call(arg.clone());
    thread::sleep(SEND_GRACE);

    print_call(
        &CallRecord {
            node: args.point.node.original(),
            action: args.point.point.original(),
            arg: &arg,
            wired_after_ms: wired_after.as_millis(),
        },
        format,
    );

    drop(action);
    host.shutdown();
    Ok(SUCCESS)
}

/// Returns the last state seen if `Wired` does not arrive in time.
fn wait_until_wired(
    states: &channel::Receiver<BindingState>,
    timeout: Duration,
) -> Result<(), BindingState> {
    let deadline = Instant::now() + timeout;
    let mut last = BindingState::Empty;
    loop {
        match states.recv_deadline(deadline) {
            Ok(BindingState::Wired) => return Ok(()),
            Ok(state) => last = state,
            Err(_) => return Err(last),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_through_intermediate_states() {
        let (tx, rx) = channel::unbounded();
        tx.send(BindingState::ResolutionFailure).unwrap();
        tx.send(BindingState::Resolved).unwrap();
        tx.send(BindingState::Wired).unwrap();
        assert!(wait_until_wired(&rx, Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn reports_last_state_on_timeout() {
        let (tx, rx) = channel::unbounded();
        tx.send(BindingState::ResolutionFailure).unwrap();
        assert_eq!(
            wait_until_wired(&rx, Duration::from_millis(50)),
            Err(BindingState::ResolutionFailure)
        );
    }
}
